use std::fs;

use bytes::Bytes;
use futures_util::SinkExt;
use ipcpipe_frame::LengthPrefixCodec;
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::cmd::{block_on, SendArgs};
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: SendArgs) -> CliResult<i32> {
    let payload = Bytes::from(resolve_payload(&args)?);
    let repeat = args.repeat;

    block_on(async move {
        let mut sink = FramedWrite::new(tokio::io::stdout(), LengthPrefixCodec::new());
        for _ in 0..repeat {
            sink.feed(payload.clone())
                .await
                .map_err(|err| frame_error("send failed", err))?;
        }
        sink.flush()
            .await
            .map_err(|err| frame_error("flush failed", err))?;
        debug!(messages = repeat, size = payload.len(), "sent messages");
        Ok::<_, CliError>(SUCCESS)
    })?
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
