//! Message-oriented IPC over anonymous pipes.
//!
//! A pipe is a linked pair of endpoints. Messages put on the writer arrive
//! whole and in order at the reader, and endpoints can be handed to child
//! processes created with [`spawn`](process::spawn). Each endpoint is usable
//! by exactly one process at a time.
//!
//! # Crate Structure
//!
//! - [`transport`] : Endpoints, the per-process registry and transfer strategies
//! - [`frame`] : Length-prefixed framing and cooperative `get`/`put`
//! - [`process`] : Spawning children with endpoint hand-off (behind `process` feature)
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (reader, writer) = ipcpipe::pipe()?;
//! writer.put(b"hello").await?;
//! assert_eq!(&reader.get().await?[..], b"hello");
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use ipcpipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ipcpipe_frame::*;
}

/// Re-export process types (requires `process` feature).
#[cfg(feature = "process")]
pub mod process {
    pub use ipcpipe_process::*;
}

pub use ipcpipe_frame::{pipe, EndpointExt, FrameError, PipeReader, PipeWriter};
pub use ipcpipe_transport::{create_pipe, Endpoint, TransportError};
