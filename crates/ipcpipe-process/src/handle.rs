use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{ProcessError, Result};

/// Time a dropped daemon handle gives its child to exit after `SIGTERM`
/// before sending `SIGKILL`.
const TERMINATE_GRACE: Duration = Duration::from_millis(250);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A spawned child process.
///
/// The child is reaped lazily by [`is_alive`](Self::is_alive) and
/// [`join`](Self::join). Dropping the handle of a live daemon child
/// terminates and reaps it. Dropping the handle of any other child reaps it
/// only if it has already exited; a child still running at that point is
/// left to finish unreaped, so call `join` before letting the handle go.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: libc::pid_t,
    name: String,
    daemon: bool,
    poll_interval: Duration,
    exit_code: Option<i32>,
}

impl ProcessHandle {
    pub(crate) fn new(
        pid: libc::pid_t,
        name: String,
        daemon: bool,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pid,
            name,
            daemon,
            poll_interval,
            exit_code: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Exit status once reaped: the exit code, or the negated signal number
    /// if the child was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Non-blocking liveness check; reaps the child if it has exited.
    pub fn is_alive(&mut self) -> Result<bool> {
        Ok(self.try_reap()?.is_none())
    }

    /// Wait for the child to exit, sleeping cooperatively between checks.
    ///
    /// With a timeout, gives up waiting once it elapses but still performs a
    /// final non-blocking reap. Returns the exit status, or `None` if the
    /// child is still running.
    pub async fn join(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }

        let interval = self.poll_interval;
        let poll = async {
            loop {
                if let Some(code) = self.try_reap()? {
                    return Ok::<_, ProcessError>(code);
                }
                tokio::time::sleep(interval).await;
            }
        };

        match timeout {
            None => poll.await.map(Some),
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, poll).await;
                match outcome {
                    Ok(code) => code.map(Some),
                    Err(_elapsed) => {
                        debug!(child = %self.name, pid = self.pid, ?limit, "join timed out");
                        self.try_reap()
                    }
                }
            }
        }
    }

    /// Ask the child to exit (`SIGTERM`). A reaped child is left alone.
    pub fn terminate(&self) -> Result<()> {
        if self.exit_code.is_some() {
            return Ok(());
        }
        // SAFETY: plain syscall on a pid we forked and have not reaped yet.
        if unsafe { libc::kill(self.pid, libc::SIGTERM) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(ProcessError::Wait(err));
            }
        }
        Ok(())
    }

    fn try_reap(&mut self) -> Result<Option<i32>> {
        self.wait(libc::WNOHANG)
    }

    fn wait(&mut self, flags: libc::c_int) -> Result<Option<i32>> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }
        let mut status = 0;
        loop {
            // SAFETY: `status` is a valid out-pointer for waitpid(2).
            let ret = unsafe { libc::waitpid(self.pid, &mut status, flags) };
            match ret {
                0 => return Ok(None),
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(ProcessError::Wait(err));
                }
                _ => break,
            }
        }

        let code = if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else if libc::WIFSIGNALED(status) {
            -libc::WTERMSIG(status)
        } else {
            return Ok(None);
        };
        info!(child = %self.name, pid = self.pid, code, "child exited");
        self.exit_code = Some(code);
        Ok(Some(code))
    }

    /// SIGTERM, a bounded wait, then SIGKILL and a blocking reap.
    fn stop(&mut self) {
        debug!(child = %self.name, pid = self.pid, "terminating daemon child");
        if let Err(err) = self.terminate() {
            warn!(child = %self.name, %err, "failed to terminate daemon child");
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        loop {
            match self.try_reap() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL_INTERVAL),
                Ok(None) => break,
                Err(err) => {
                    warn!(child = %self.name, %err, "failed to reap daemon child");
                    return;
                }
            }
        }

        warn!(child = %self.name, pid = self.pid, "daemon child ignored SIGTERM; killing it");
        // SAFETY: plain syscall on a pid we forked and have not reaped yet.
        unsafe { libc::kill(self.pid, libc::SIGKILL) };
        if let Err(err) = self.wait(0) {
            warn!(child = %self.name, %err, "failed to reap killed daemon child");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        match self.try_reap() {
            Ok(Some(_)) => {}
            Ok(None) if self.daemon => self.stop(),
            Ok(None) => debug!(
                child = %self.name,
                pid = self.pid,
                "handle dropped while child still running; it will not be reaped"
            ),
            Err(err) => warn!(child = %self.name, %err, "failed to check child"),
        }
    }
}
