use crate::endpoint::Direction;

/// Errors raised by endpoint bookkeeping and pipe primitives.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint was closed before (in this process, or by the spawn hand-off).
    #[error("endpoint has been closed")]
    Closed,

    /// The endpoint is registered for a different process than the caller.
    #[error("endpoint belongs to process {owner}, not to the current process {current}")]
    CrossProcess { owner: u32, current: u32 },

    /// `close()` was attempted while a get/put holds the endpoint's I/O lock.
    #[error("endpoint is locked by an in-flight I/O operation")]
    Locked,

    /// The endpoint's resource is parked as a transfer token during process creation.
    #[error("endpoint is pending transfer to a child process")]
    InTransfer,

    /// A read endpoint was used where a write endpoint is required, or vice versa.
    #[error("expected a {expected} endpoint, got a {actual} endpoint")]
    WrongDirection {
        expected: Direction,
        actual: Direction,
    },

    /// An OS-level operation on the pipe failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation is not available on this platform.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
