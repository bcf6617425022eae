use ipcpipe_transport::TransportError;

/// Errors that can occur while framing messages over a pipe.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The endpoint could not be used (closed, foreign, locked, wrong direction).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer closed the pipe before any byte of the next message arrived.
    #[error("end of stream")]
    Eof,

    /// The peer closed the pipe part-way through a message.
    #[error("truncated message ({received} of {expected} bytes received)")]
    Truncated { expected: usize, received: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the peer went away, cleanly or mid-message.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Eof | Self::Truncated { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
