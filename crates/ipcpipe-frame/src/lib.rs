//! Length-prefixed message framing over anonymous pipes.
//!
//! Every message travels as a 4-byte big-endian length followed by exactly
//! that many payload bytes. [`PipeReader::get`] and [`PipeWriter::put`] move
//! whole messages, tolerating partial reads and writes underneath and yielding
//! to other tasks while the pipe is not ready.

pub mod codec;
pub mod error;
#[cfg(unix)]
mod io;
pub mod reader;
pub mod writer;

use ipcpipe_transport::Endpoint;

pub use codec::{
    decode_frame, encode_frame, FrameConfig, LengthPrefixCodec, HEADER_SIZE, MAX_WIRE_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::PipeReader;
pub use writer::PipeWriter;

/// Create a pipe and wrap its ends as a typed reader/writer pair.
pub fn pipe() -> Result<(PipeReader, PipeWriter)> {
    pipe_with_config(FrameConfig::default())
}

/// Like [`pipe`], applying `config` to both ends.
pub fn pipe_with_config(config: FrameConfig) -> Result<(PipeReader, PipeWriter)> {
    let (read, write) = ipcpipe_transport::create_pipe()?;
    Ok((
        PipeReader::with_config(read, config.clone())?,
        PipeWriter::with_config(write, config)?,
    ))
}

/// Conversions from untyped endpoints, checked against their direction.
pub trait EndpointExt {
    fn into_reader(self) -> Result<PipeReader>;
    fn into_writer(self) -> Result<PipeWriter>;
}

impl EndpointExt for Endpoint {
    fn into_reader(self) -> Result<PipeReader> {
        PipeReader::new(self)
    }

    fn into_writer(self) -> Result<PipeWriter> {
        PipeWriter::new(self)
    }
}
