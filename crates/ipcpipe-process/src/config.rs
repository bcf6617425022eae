use std::time::Duration;

use ipcpipe_transport::TransferStrategy;

/// Default interval between liveness checks in [`ProcessHandle::join`](crate::ProcessHandle::join).
pub const DEFAULT_JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options for [`spawn`](crate::spawn).
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Child name, used for logs and (on Linux) the kernel thread name.
    /// Generated when unset.
    pub name: Option<String>,
    /// Kill the child when its parent goes away or drops the handle.
    pub daemon: bool,
    /// How endpoints cross the process boundary.
    pub strategy: TransferStrategy,
    /// Sleep between liveness checks while joining.
    pub join_poll_interval: Duration,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            name: None,
            daemon: false,
            strategy: TransferStrategy::from_env(),
            join_poll_interval: DEFAULT_JOIN_POLL_INTERVAL,
        }
    }
}

impl SpawnConfig {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn strategy(mut self, strategy: TransferStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}
