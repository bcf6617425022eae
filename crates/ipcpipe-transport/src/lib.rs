//! Anonymous pipe endpoints with per-process ownership tracking.
//!
//! This is the lowest layer of ipcpipe. It allocates pipes, tracks which
//! process may use each end, serialises access through a per-endpoint I/O
//! lock, and implements the strategies that carry endpoints across a
//! process-creation boundary.
//!
//! All endpoints live in one [`Registry`] per process. [`Endpoint`] values are
//! handles into it; the registry owns the OS resources.

pub mod endpoint;
pub mod error;
pub mod pipe;
pub mod registry;
pub mod strategy;
pub mod sys;

pub use endpoint::{Direction, Endpoint, EndpointId, EndpointState, IoGuard};
pub use error::{Result, TransportError};
pub use pipe::create_pipe;
pub use registry::{Registry, RegistryGuard, Snapshot};
pub use strategy::{TransferStrategy, STRATEGY_ENV};
pub use sys::current_pid;
