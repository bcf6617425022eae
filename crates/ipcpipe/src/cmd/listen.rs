use futures_util::StreamExt;
use ipcpipe_frame::{FrameConfig, LengthPrefixCodec};
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::cmd::{block_on, ListenArgs};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = FrameConfig::default();
    if let Some(max) = args.max_payload {
        config.max_payload_size = max;
    }
    let limit = args.count;

    block_on(async move {
        let mut stream = FramedRead::new(tokio::io::stdin(), LengthPrefixCodec::with_config(&config));
        let mut received = 0usize;
        while limit.map_or(true, |limit| received < limit) {
            let Some(next) = stream.next().await else {
                break;
            };
            let payload = next.map_err(|err| frame_error("receive failed", err))?;
            received += 1;
            print_message(received, &payload, format);
        }
        debug!(received, "input finished");
        Ok::<_, CliError>(SUCCESS)
    })?
}
