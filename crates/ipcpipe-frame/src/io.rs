//! Cooperative pipe I/O.
//!
//! Each framed operation registers the endpoint's descriptor with the current
//! tokio reactor for its own duration only, so no runtime state stays attached
//! to an endpoint across a fork. Waiting for readiness is the only point where
//! a get/put yields to other tasks.

use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, RawFd};

use ipcpipe_transport::IoGuard;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

struct Locked<'a, 'g>(&'a IoGuard<'g>);

impl AsRawFd for Locked<'_, '_> {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// A locked endpoint registered for readiness notifications.
pub(crate) struct Engine<'a, 'g> {
    fd: AsyncFd<Locked<'a, 'g>>,
}

impl<'a, 'g> Engine<'a, 'g> {
    pub(crate) fn readable(guard: &'a IoGuard<'g>) -> io::Result<Self> {
        Self::register(guard, Interest::READABLE)
    }

    pub(crate) fn writable(guard: &'a IoGuard<'g>) -> io::Result<Self> {
        Self::register(guard, Interest::WRITABLE)
    }

    fn register(guard: &'a IoGuard<'g>, interest: Interest) -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::with_interest(Locked(guard), interest)?,
        })
    }

    /// Read until `buf` is full or the peer closes. Returns the number of
    /// bytes read; anything short of `buf.len()` means end of stream.
    pub(crate) async fn read_fill(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let mut ready = self.fd.readable().await?;
            match ready.try_io(|fd| fd.get_ref().0.read(&mut buf[filled..])) {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(err)) if err.kind() == ErrorKind::Interrupted => {}
                Ok(Err(err)) => return Err(err),
                Err(_would_block) => {}
            }
        }
        Ok(filled)
    }

    /// Write all of `buf`, retrying the unwritten suffix after partial writes.
    pub(crate) async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let mut ready = self.fd.writable().await?;
            match ready.try_io(|fd| fd.get_ref().0.write(buf)) {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "pipe accepted no bytes",
                    ))
                }
                Ok(Ok(n)) => buf = &buf[n..],
                Ok(Err(err)) if err.kind() == ErrorKind::Interrupted => {}
                Ok(Err(err)) => return Err(err),
                Err(_would_block) => {}
            }
        }
        Ok(())
    }
}
