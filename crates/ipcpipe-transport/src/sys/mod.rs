//! Platform primitives behind endpoints: pipe allocation, blocking mode,
//! inheritable duplication and reconstruction.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{OwnedResource, RawResource};
#[cfg(unix)]
pub(crate) use unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{OwnedResource, RawResource};
#[cfg(windows)]
pub(crate) use windows::*;

/// Identifier of the calling process.
pub fn current_pid() -> u32 {
    std::process::id()
}
