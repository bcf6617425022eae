//! Child-side runtime.
//!
//! A forked child inherits the parent's memory image, including the
//! thread-local runtime context of whichever task called `spawn`. The child
//! therefore builds a brand-new current-thread runtime and drives the target on
//! a fresh OS thread.

use std::fmt::Display;
use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Runtime};
use tracing::error;

/// Child exit status: target returned `Ok`.
pub const EXIT_SUCCESS: i32 = 0;
/// Child exit status: target returned an error.
pub const EXIT_TARGET_FAILED: i32 = 1;
/// Child exit status: the runtime or endpoint hand-off could not be set up;
/// the target never ran.
pub const EXIT_REINIT_FAILED: i32 = 70;
/// Child exit status: target panicked.
pub const EXIT_TARGET_PANICKED: i32 = 101;

/// Build the child's runtime. Nothing from the parent's reactor is reused.
pub(crate) fn build() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

/// Run `make_target` to completion on `runtime` and map the outcome to an
/// exit status.
pub(crate) fn run<F, Fut, E>(runtime: Runtime, name: &str, make_target: F) -> i32
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let spawned = std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            runtime
                .block_on(async move { make_target().await })
                .map_err(|err| err.to_string())
        });
    let worker = match spawned {
        Ok(worker) => worker,
        Err(err) => {
            error!(child = name, %err, "failed to start child runtime thread");
            return EXIT_REINIT_FAILED;
        }
    };

    match worker.join() {
        Ok(Ok(())) => EXIT_SUCCESS,
        Ok(Err(message)) => {
            error!(child = name, error = %message, "child target failed");
            EXIT_TARGET_FAILED
        }
        Err(_panic) => EXIT_TARGET_PANICKED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_target_outcomes_to_exit_status() {
        let ok = run(build().unwrap(), "ok", || async { Ok::<_, String>(()) });
        assert_eq!(ok, EXIT_SUCCESS);

        let failed = run(build().unwrap(), "failed", || async { Err("boom") });
        assert_eq!(failed, EXIT_TARGET_FAILED);

        let panicked = run(build().unwrap(), "panicked", || async {
            if true {
                panic!("target panicked");
            }
            Ok::<_, String>(())
        });
        assert_eq!(panicked, EXIT_TARGET_PANICKED);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn target_runs_outside_the_callers_runtime() {
        // block_on inside a runtime would panic; the fresh thread avoids it.
        let status = run(build().unwrap(), "nested", || async {
            tokio::task::yield_now().await;
            Ok::<_, String>(())
        });
        assert_eq!(status, EXIT_SUCCESS);
    }
}
