//! Hand one end of each of two pipes to a child that upper-cases every
//! message it receives.
//!
//! ```text
//! cargo run -p ipcpipe --example echo-child
//! ```

#[cfg(unix)]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use ipcpipe::process::{spawn, SpawnConfig};
    use ipcpipe::{EndpointExt, Endpoint, FrameError};

    async fn shout(endpoints: Vec<Endpoint>, _: ()) -> Result<(), FrameError> {
        let mut endpoints = endpoints.into_iter();
        let (Some(input), Some(output)) = (endpoints.next(), endpoints.next()) else {
            return Err(ipcpipe::TransportError::Closed.into());
        };
        let (reader, writer) = (input.into_reader()?, output.into_writer()?);
        loop {
            match reader.get().await {
                Ok(line) => writer.put(&line.to_ascii_uppercase()).await?,
                Err(FrameError::Eof) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    let (child_in, requests) = ipcpipe::pipe()?;
    let (replies, child_out) = ipcpipe::pipe()?;
    let mut child = spawn(
        [child_in.into_endpoint(), child_out.into_endpoint()],
        shout,
        (),
        SpawnConfig::default().named("shouter"),
    )?;
    println!("spawned {} (pid {})", child.name(), child.pid());

    for line in ["hello", "from", "the parent"] {
        requests.put(line.as_bytes()).await?;
        let reply = replies.get().await?;
        println!("{line:>12} -> {}", String::from_utf8_lossy(&reply));
    }

    requests.close()?;
    println!("child exited with {:?}", child.join(None).await?);
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("echo-child needs fork-based process creation");
}
