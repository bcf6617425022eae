//! A child that sums batches of numbers sent as JSON.
//!
//! ```text
//! cargo run -p ipcpipe --example json-worker
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Batch {
    id: u32,
    values: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Total {
    id: u32,
    sum: i64,
}

#[cfg(unix)]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use ipcpipe::process::{get_value, put_value, spawn, ProcessError, SpawnConfig};
    use ipcpipe::{Endpoint, EndpointExt, FrameError};

    async fn worker(endpoints: Vec<Endpoint>, batches: u32) -> Result<(), ProcessError> {
        let mut endpoints = endpoints.into_iter();
        let (Some(input), Some(output)) = (endpoints.next(), endpoints.next()) else {
            return Err(FrameError::Eof.into());
        };
        let (reader, writer) = (input.into_reader()?, output.into_writer()?);
        for _ in 0..batches {
            let batch: Batch = get_value(&reader).await?;
            let total = Total {
                id: batch.id,
                sum: batch.values.iter().sum(),
            };
            put_value(&writer, &total).await?;
        }
        Ok(())
    }

    let batches = vec![
        Batch { id: 1, values: vec![1, 2, 3] },
        Batch { id: 2, values: vec![-5, 5] },
        Batch { id: 3, values: (1..=100).collect() },
    ];

    let (child_in, jobs) = ipcpipe::pipe()?;
    let (results, child_out) = ipcpipe::pipe()?;
    let mut child = spawn(
        [child_in.into_endpoint(), child_out.into_endpoint()],
        worker,
        batches.len() as u32,
        SpawnConfig::default(),
    )?;

    for batch in &batches {
        put_value(&jobs, batch).await?;
        let total: Total = get_value(&results).await?;
        println!("batch {} -> {}", total.id, total.sum);
    }

    println!("worker exited with {:?}", child.join(None).await?);
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("json-worker needs fork-based process creation");
}
