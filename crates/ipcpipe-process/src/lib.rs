//! Child processes that inherit a chosen set of pipe endpoints.
//!
//! [`spawn`] forks the calling process and runs an async target in the child
//! on a freshly built runtime. Only the endpoints passed to `spawn` survive in
//! the child; the parent gives them up. Everything else the parent had open is
//! closed on the child side before the target starts.
//!
//! Process creation is Unix-only for now.

pub mod codec;
pub mod config;
pub mod error;
pub mod runtime;

#[cfg(unix)]
mod boundary;
#[cfg(unix)]
pub mod handle;
#[cfg(unix)]
mod spawn;

pub use codec::{get_value, put_value};
pub use config::{SpawnConfig, DEFAULT_JOIN_POLL_INTERVAL};
pub use error::{ProcessError, Result};
#[cfg(unix)]
pub use handle::ProcessHandle;
pub use runtime::{EXIT_REINIT_FAILED, EXIT_SUCCESS, EXIT_TARGET_FAILED, EXIT_TARGET_PANICKED};
#[cfg(unix)]
pub use spawn::spawn;
