/// Errors that can occur while spawning, joining or talking to a child.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Transport-level error (designated endpoint closed, foreign or busy).
    #[error("transport error: {0}")]
    Transport(#[from] ipcpipe_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ipcpipe_frame::FrameError),

    /// The child process could not be created.
    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting for or signalling the child failed.
    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
