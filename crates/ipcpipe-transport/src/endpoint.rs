use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::registry::{Registry, SlotState};
use crate::sys::{self, RawResource};

/// Process-unique identity of an endpoint. Shared by every handle to the
/// endpoint and preserved across process creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    pub(crate) fn random() -> Self {
        Self(rand::random())
    }

    /// Numeric form, for logs and diagnostics.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Which end of a pipe an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Externally visible endpoint state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Open,
    /// The resource is parked as an inheritable token during process creation.
    PendingTransfer,
    Closed,
}

/// Handle to one end of an anonymous pipe.
///
/// Cloning is cheap; clones share identity, I/O lock and registry slot. The
/// resource is released by [`Endpoint::close`], by the spawn hand-off, or when
/// the last handle in the owning process is dropped.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    id: EndpointId,
    direction: Direction,
    io_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        Registry::process().discard(self.id);
    }
}

impl Endpoint {
    pub(crate) fn from_parts(
        id: EndpointId,
        direction: Direction,
        io_lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                direction,
                io_lock,
            }),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.inner.id
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Current state as recorded in this process's registry.
    pub fn state(&self) -> EndpointState {
        Registry::process().state_of(self.inner.id)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == EndpointState::Closed
    }

    /// Process the endpoint is bound to, or `None` once closed.
    pub fn owner(&self) -> Option<u32> {
        Registry::process().owner_of(self.inner.id)
    }

    /// Fail with [`TransportError::WrongDirection`] unless this endpoint is
    /// `expected`.
    pub fn expect_direction(&self, expected: Direction) -> Result<()> {
        if self.inner.direction != expected {
            return Err(TransportError::WrongDirection {
                expected,
                actual: self.inner.direction,
            });
        }
        Ok(())
    }

    /// Check that the endpoint is open and owned by the calling process.
    pub fn validate(&self) -> Result<()> {
        Registry::process().lock().owned_slot(self.inner.id)?;
        Ok(())
    }

    /// Acquire the endpoint's I/O lock for one framed operation.
    ///
    /// Validity is checked before waiting and again once the lock is held,
    /// since the endpoint may have been handed off while this task waited.
    pub async fn lock_io(&self) -> Result<IoGuard<'_>> {
        self.validate()?;
        let lock = self.inner.io_lock.lock().await;
        let raw = {
            let mut registry = Registry::process().lock();
            let slot = registry.owned_slot(self.inner.id)?;
            match &slot.state {
                SlotState::Open(resource) => sys::raw(resource),
                SlotState::PendingTransfer(_) => return Err(TransportError::InTransfer),
            }
        };
        Ok(IoGuard {
            endpoint: self,
            raw,
            _lock: lock,
        })
    }

    /// Fail with [`TransportError::Locked`] if an operation is in flight.
    pub fn check_idle(&self) -> Result<()> {
        self.validate()?;
        self.inner
            .io_lock
            .try_lock()
            .map(drop)
            .map_err(|_| TransportError::Locked)
    }

    /// Release the underlying resource.
    ///
    /// Fails with [`TransportError::Locked`] while a get/put holds the I/O
    /// lock, and with [`TransportError::Closed`] on a second close.
    pub fn close(&self) -> Result<()> {
        self.validate()?;
        let _io = self
            .inner
            .io_lock
            .try_lock()
            .map_err(|_| TransportError::Locked)?;
        Registry::process().lock().release(self.inner.id)?;
        debug!(endpoint = %self, "closed endpoint");
        Ok(())
    }

    /// Bind the endpoint to `pid`. Used by the process boundary guard.
    pub fn legitimize(&self, pid: u32) -> Result<()> {
        Registry::process().lock().legitimize(self.inner.id, pid)
    }

    /// Kernel buffer size of the pipe, where the platform reports one.
    pub fn pipe_capacity(&self) -> Result<Option<usize>> {
        self.with_resource(|resource| Ok(sys::pipe_capacity(resource)))
    }

    /// Whether the resource is in non-blocking mode.
    pub fn is_nonblocking(&self) -> Result<bool> {
        self.with_resource(sys::is_nonblocking)
    }

    /// Whether the resource would be inherited by a child process.
    pub fn is_inheritable(&self) -> Result<bool> {
        self.with_resource(sys::is_inheritable)
    }

    fn with_resource<T>(
        &self,
        f: impl FnOnce(&sys::OwnedResource) -> io::Result<T>,
    ) -> Result<T> {
        let mut registry = Registry::process().lock();
        let slot = registry.owned_slot(self.inner.id)?;
        match &slot.state {
            SlotState::Open(resource) => Ok(f(resource)?),
            SlotState::PendingTransfer(_) => Err(TransportError::InTransfer),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner.direction {
            Direction::Read => "Reader",
            Direction::Write => "Writer",
        };
        write!(f, "{kind}_{}", self.inner.id)
    }
}

// Debug must not touch the registry: it is formatted from inside registry guards.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("busy", &self.inner.io_lock.try_lock().is_err())
            .finish()
    }
}

/// Proof that the caller holds an endpoint's I/O lock, carrying the raw
/// resource the operation may use until the guard is dropped.
pub struct IoGuard<'a> {
    endpoint: &'a Endpoint,
    raw: RawResource,
    _lock: tokio::sync::MutexGuard<'a, ()>,
}

impl IoGuard<'_> {
    pub fn endpoint(&self) -> &Endpoint {
        self.endpoint
    }

    pub fn raw(&self) -> RawResource {
        self.raw
    }

    /// One non-blocking read attempt.
    #[cfg(unix)]
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        sys::read(self.raw, buf)
    }

    /// One non-blocking write attempt.
    #[cfg(unix)]
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        sys::write(self.raw, buf)
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for IoGuard<'_> {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.raw
    }
}

impl fmt::Debug for IoGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoGuard")
            .field("endpoint", &self.endpoint.inner.id)
            .field("raw", &self.raw)
            .finish()
    }
}
