use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr::{null, null_mut};

use windows_sys::Win32::Foundation::{DuplicateHandle, DUPLICATE_SAME_ACCESS, HANDLE};
use windows_sys::Win32::Foundation::{GetHandleInformation, HANDLE_FLAG_INHERIT};
use windows_sys::Win32::System::Pipes::{
    CreatePipe, SetNamedPipeHandleState, PIPE_NOWAIT, PIPE_READMODE_BYTE,
};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

use crate::endpoint::Direction;

/// Owned OS resource backing an endpoint.
pub type OwnedResource = OwnedHandle;

/// Raw numeric form of [`OwnedResource`], valid only in the owning process.
pub type RawResource = RawHandle;

/// Allocate an anonymous pipe. Handles are not inheritable.
pub(crate) fn pipe() -> io::Result<(OwnedHandle, OwnedHandle)> {
    let mut read: HANDLE = null_mut();
    let mut write: HANDLE = null_mut();
    // SAFETY: both out-pointers are valid; null attributes yield non-inheritable handles.
    if unsafe { CreatePipe(&mut read, &mut write, null(), 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: CreatePipe succeeded and handed us ownership of both handles.
    Ok(unsafe {
        (
            OwnedHandle::from_raw_handle(read as RawHandle),
            OwnedHandle::from_raw_handle(write as RawHandle),
        )
    })
}

/// Switch the pipe handle to `PIPE_NOWAIT`. Handle state does not survive
/// duplication, so this is reapplied after every transfer.
pub(crate) fn set_nonblocking(handle: &OwnedHandle) -> io::Result<()> {
    let mode = PIPE_READMODE_BYTE | PIPE_NOWAIT;
    // SAFETY: `handle` is open for the duration of the call; `mode` outlives it.
    let ok = unsafe {
        SetNamedPipeHandleState(handle.as_raw_handle() as HANDLE, &mode, null(), null())
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn is_nonblocking(_handle: &OwnedHandle) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pipe wait mode cannot be queried on anonymous pipes",
    ))
}

pub(crate) fn is_inheritable(handle: &OwnedHandle) -> io::Result<bool> {
    let mut flags = 0u32;
    // SAFETY: `handle` is open and `flags` is a valid out-pointer.
    if unsafe { GetHandleInformation(handle.as_raw_handle() as HANDLE, &mut flags) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & HANDLE_FLAG_INHERIT != 0)
}

fn duplicate(handle: &OwnedHandle, inheritable: bool) -> io::Result<OwnedHandle> {
    let mut dup: HANDLE = null_mut();
    // SAFETY: source and target are the current process; `dup` is a valid out-pointer.
    let ok = unsafe {
        DuplicateHandle(
            GetCurrentProcess(),
            handle.as_raw_handle() as HANDLE,
            GetCurrentProcess(),
            &mut dup,
            0,
            i32::from(inheritable),
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: DuplicateHandle succeeded and the duplicate is ours to close.
    Ok(unsafe { OwnedHandle::from_raw_handle(dup as RawHandle) })
}

/// Duplicate `handle` as inheritable, producing the transfer token.
pub(crate) fn duplicate_inheritable(handle: &OwnedHandle) -> io::Result<OwnedHandle> {
    duplicate(handle, true)
}

/// Rebuild a process-local, non-inheritable handle from a transfer token.
///
/// Access rights travel with `DUPLICATE_SAME_ACCESS`, so `direction` only
/// selects how the reopened handle is reported.
pub(crate) fn reopen(token: &OwnedHandle, direction: Direction) -> io::Result<OwnedHandle> {
    let handle = duplicate(token, false)?;
    set_nonblocking(&handle)?;
    tracing::trace!(%direction, raw = ?handle.as_raw_handle(), "reopened transfer token");
    Ok(handle)
}

pub(crate) fn raw(handle: &OwnedHandle) -> RawHandle {
    handle.as_raw_handle()
}

pub(crate) fn pipe_capacity(_handle: &OwnedHandle) -> Option<usize> {
    None
}
