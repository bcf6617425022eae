use tracing::debug;

use crate::endpoint::{Direction, Endpoint};
use crate::error::Result;
use crate::registry::Registry;
use crate::sys;

/// Allocate an anonymous pipe and register both ends with the calling
/// process.
///
/// Returns `(reader, writer)`. Both resources are non-blocking and
/// non-inheritable; they are only passed to a child through the spawn
/// hand-off.
pub fn create_pipe() -> Result<(Endpoint, Endpoint)> {
    // Allocation happens under the registry lock so a concurrent spawn never
    // inherits a descriptor its snapshot does not list.
    let mut registry = Registry::process().lock();
    let (read, write) = sys::pipe()?;
    sys::set_nonblocking(&read)?;
    sys::set_nonblocking(&write)?;

    let reader = registry.register(Direction::Read, read);
    let writer = registry.register(Direction::Write, write);
    drop(registry);

    debug!(reader = %reader, writer = %writer, "created pipe");
    Ok((reader, writer))
}
