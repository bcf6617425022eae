use std::fmt::Display;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use ipcpipe_transport::{Endpoint, Registry, RegistryGuard, Snapshot};
use tracing::{debug, error, info};

use crate::boundary;
use crate::config::SpawnConfig;
use crate::error::{ProcessError, Result};
use crate::handle::ProcessHandle;
use crate::runtime::{self, EXIT_REINIT_FAILED};

static NEXT_CHILD: AtomicU64 = AtomicU64::new(1);

/// Fork a child that runs `target(endpoints, args)` on its own runtime.
///
/// The designated `endpoints` move to the child: they are closed in the
/// parent once the child exists, and every other endpoint the parent knows
/// about is closed in the child before `target` runs. Designated endpoints
/// must be open, owned by the caller and idle, or no child is created.
///
/// The child exits with `0` when `target` returns `Ok`, `1` when it returns an
/// error, `101` when it panics and `70` when its runtime or endpoints could
/// not be set up.
pub fn spawn<F, Fut, A, E>(
    endpoints: impl IntoIterator<Item = Endpoint>,
    target: F,
    args: A,
    config: SpawnConfig,
) -> Result<ProcessHandle>
where
    F: FnOnce(Vec<Endpoint>, A) -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<(), E>>,
    A: Send + 'static,
    E: Display,
{
    let endpoints: Vec<Endpoint> = endpoints.into_iter().collect();

    let name = config.name.clone().unwrap_or_else(|| {
        let n = NEXT_CHILD.fetch_add(1, Ordering::Relaxed);
        format!("ipcpipe-child-{n}")
    });
    let strategy = config.strategy;

    let mut registry = Registry::process().lock();
    let snapshot = match boundary::before_create(&mut registry, &endpoints, strategy) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            drop(registry);
            return Err(err);
        }
    };

    // SAFETY: the child only touches state it owns (its copy of the registry
    // guard and the values moved into it) and leaves through `_exit`.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => {
            let err = io::Error::last_os_error();
            boundary::after_create(registry, strategy);
            Err(ProcessError::Spawn(err))
        }
        0 => run_child(registry, &snapshot, endpoints, target, args, &name, &config),
        pid => {
            boundary::after_create(registry, strategy);
            boundary::release_designated(&endpoints);
            info!(
                child = %name,
                pid,
                designated = endpoints.len(),
                known = snapshot.len(),
                %strategy,
                "spawned child process"
            );
            Ok(ProcessHandle::new(
                pid,
                name,
                config.daemon,
                config.join_poll_interval,
            ))
        }
    }
}

fn run_child<F, Fut, A, E>(
    mut registry: RegistryGuard<'_>,
    snapshot: &Snapshot,
    endpoints: Vec<Endpoint>,
    target: F,
    args: A,
    name: &str,
    config: &SpawnConfig,
) -> !
where
    F: FnOnce(Vec<Endpoint>, A) -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<(), E>>,
    A: Send + 'static,
    E: Display,
{
    name_process(name, config.daemon);
    boundary::reset(&mut registry, snapshot);

    let runtime = match runtime::build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(child = name, %err, "failed to rebuild runtime in child");
            exit(EXIT_REINIT_FAILED)
        }
    };

    if let Err(code) = boundary::adopt(&mut registry, &endpoints, config.strategy) {
        exit(code)
    }
    drop(registry);
    debug!(child = name, pid = std::process::id(), "child ready");

    exit(runtime::run(runtime, name, move || target(endpoints, args)))
}

fn exit(code: i32) -> ! {
    // SAFETY: `_exit` skips the parent's atexit handlers and destructors that
    // were duplicated into this process.
    unsafe { libc::_exit(code) }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn name_process(name: &str, daemon: bool) {
    // The kernel keeps 15 bytes plus the terminator.
    let short: Vec<u8> = name.bytes().filter(|b| *b != 0).take(15).collect();
    if let Ok(name) = std::ffi::CString::new(short) {
        // SAFETY: `name` is NUL-terminated and outlives the call.
        unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr()) };
    }
    if daemon {
        // SAFETY: plain prctl with integer arguments.
        unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn name_process(_name: &str, _daemon: bool) {}
