use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::c_int;

use crate::endpoint::Direction;

/// Owned OS resource backing an endpoint.
pub type OwnedResource = OwnedFd;

/// Raw numeric form of [`OwnedResource`], valid only in the owning process.
pub type RawResource = RawFd;

fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Allocate an anonymous pipe, both ends close-on-exec.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [c_int; 2] = [-1, -1];
    raw_pipe(&mut fds)?;
    // SAFETY: pipe(2) just returned two fresh descriptors that nothing else owns.
    let ends = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    )))]
    {
        set_cloexec(&ends.0)?;
        set_cloexec(&ends.1)?;
    }
    Ok(ends)
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
fn raw_pipe(fds: &mut [c_int; 2]) -> io::Result<()> {
    // SAFETY: `fds` is a writable two-element array as pipe2(2) requires.
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }).map(drop)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
fn raw_pipe(fds: &mut [c_int; 2]) -> io::Result<()> {
    // SAFETY: `fds` is a writable two-element array as pipe(2) requires.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) }).map(drop)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is an open descriptor borrowed from `fd` for the duration of the calls.
    let flags = cvt(unsafe { libc::fcntl(raw, libc::F_GETFD) })?;
    cvt(unsafe { libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) }).map(drop)
}

/// Put the descriptor in `O_NONBLOCK` mode. The flag lives on the open file
/// description, so every duplicate and every forked copy shares it.
pub(crate) fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is an open descriptor borrowed from `fd` for the duration of the calls.
    let flags = cvt(unsafe { libc::fcntl(raw, libc::F_GETFL) })?;
    if flags & libc::O_NONBLOCK == 0 {
        cvt(unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    }
    Ok(())
}

pub(crate) fn is_nonblocking(fd: &OwnedFd) -> io::Result<bool> {
    // SAFETY: the descriptor is open for the lifetime of the borrow.
    let flags = cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) })?;
    Ok(flags & libc::O_NONBLOCK != 0)
}

pub(crate) fn is_inheritable(fd: &OwnedFd) -> io::Result<bool> {
    // SAFETY: the descriptor is open for the lifetime of the borrow.
    let flags = cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) })?;
    Ok(flags & libc::FD_CLOEXEC == 0)
}

/// Duplicate `fd` with close-on-exec cleared, producing the transfer token a
/// child process inherits.
pub(crate) fn duplicate_inheritable(fd: &OwnedFd) -> io::Result<OwnedFd> {
    // SAFETY: F_DUPFD returns a new descriptor (FD_CLOEXEC clear) that we take ownership of.
    let dup = cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD, 0) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

/// Rebuild a process-local descriptor from an inherited transfer token.
///
/// The access mode of the token must match `direction`; the new descriptor is
/// close-on-exec and non-blocking. The token itself is left to the caller.
pub(crate) fn reopen(token: &OwnedFd, direction: Direction) -> io::Result<OwnedFd> {
    // SAFETY: F_DUPFD_CLOEXEC returns a new descriptor that we take ownership of.
    let dup = cvt(unsafe { libc::fcntl(token.as_raw_fd(), libc::F_DUPFD_CLOEXEC, 0) })?;
    let fd = unsafe { OwnedFd::from_raw_fd(dup) };

    // SAFETY: `fd` is open and owned here.
    let mode = cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) })? & libc::O_ACCMODE;
    let expected = match direction {
        Direction::Read => libc::O_RDONLY,
        Direction::Write => libc::O_WRONLY,
    };
    if mode != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("transfer token access mode {mode:#o} does not match {direction} endpoint"),
        ));
    }

    set_nonblocking(&fd)?;
    Ok(fd)
}

pub(crate) fn raw(fd: &OwnedFd) -> RawFd {
    fd.as_raw_fd()
}

/// Kernel pipe buffer size, where the platform exposes it.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn pipe_capacity(fd: &OwnedFd) -> Option<usize> {
    // SAFETY: the descriptor is open for the lifetime of the borrow.
    let size = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETPIPE_SZ) };
    usize::try_from(size).ok().filter(|size| *size > 0)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn pipe_capacity(_fd: &OwnedFd) -> Option<usize> {
    None
}

/// One non-blocking `read(2)` attempt.
pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` writable bytes; the caller holds the
    // endpoint I/O lock so `fd` stays open for the duration of the call.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// One non-blocking `write(2)` attempt.
pub(crate) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` readable bytes; the caller holds the
    // endpoint I/O lock so `fd` stays open for the duration of the call.
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
