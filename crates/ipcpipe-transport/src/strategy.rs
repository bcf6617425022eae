use std::fmt;
use std::io;
use std::str::FromStr;

use tracing::debug;

use crate::endpoint::Direction;
use crate::registry::SlotState;
use crate::sys;

/// Environment variable consulted by [`TransferStrategy::from_env`].
pub const STRATEGY_ENV: &str = "IPCPIPE_TRANSFER_STRATEGY";

/// How endpoint resources cross a process-creation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// Resources stay numerically valid in the child (fork semantics).
    /// Only closing unwanted endpoints matters.
    DirectInheritance,
    /// Resources are process-local. Before creation each one is duplicated as
    /// inheritable and the original is discarded; afterwards a local resource is
    /// rebuilt from the inherited duplicate.
    ExplicitDuplication,
}

impl TransferStrategy {
    /// Native strategy of the build target.
    pub const fn platform_default() -> Self {
        if cfg!(windows) {
            Self::ExplicitDuplication
        } else {
            Self::DirectInheritance
        }
    }

    /// Strategy named by `IPCPIPE_TRANSFER_STRATEGY`, falling back to the
    /// platform default when unset or unrecognised.
    pub fn from_env() -> Self {
        match std::env::var(STRATEGY_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                tracing::warn!(%value, %err, "ignoring {STRATEGY_ENV}");
                Self::platform_default()
            }),
            Err(_) => Self::platform_default(),
        }
    }

    /// Short name used in diagnostics and configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::DirectInheritance => "direct",
            Self::ExplicitDuplication => "duplicate",
        }
    }

    /// Whether endpoints need reconstruction after process creation.
    pub fn needs_reconstruction(self) -> bool {
        matches!(self, Self::ExplicitDuplication)
    }

    /// Pre-creation hook for one registry slot.
    ///
    /// Busy slots (an operation holds their I/O lock and the raw resource) are
    /// left untouched: they cannot be handed to a child anyway.
    pub(crate) fn before_create(
        self,
        id: impl fmt::Display,
        state: &mut SlotState,
        busy: bool,
    ) -> io::Result<()> {
        if self == Self::DirectInheritance {
            return Ok(());
        }
        if busy {
            debug!(%id, "skipping duplication of busy endpoint");
            return Ok(());
        }
        if let SlotState::Open(resource) = state {
            let token = sys::duplicate_inheritable(resource)?;
            debug!(%id, token = ?sys::raw(&token), "duplicated endpoint as inheritable");
            // Dropping the replaced `Open` closes the original resource.
            *state = SlotState::PendingTransfer(token);
        }
        Ok(())
    }

    /// Post-creation hook for one registry slot, run in whichever process needs
    /// a usable local resource again.
    pub(crate) fn after_create(
        self,
        id: impl fmt::Display,
        direction: Direction,
        state: &mut SlotState,
    ) -> io::Result<()> {
        if let SlotState::PendingTransfer(token) = state {
            let resource = sys::reopen(token, direction)?;
            debug!(%id, raw = ?sys::raw(&resource), "reconstructed endpoint from transfer token");
            *state = SlotState::Open(resource);
        }
        Ok(())
    }
}

impl Default for TransferStrategy {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransferStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "inherit" | "direct-inheritance" => Ok(Self::DirectInheritance),
            "duplicate" | "explicit" | "explicit-duplication" => Ok(Self::ExplicitDuplication),
            other => Err(format!("unknown transfer strategy {other:?}")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!(
            "direct".parse::<TransferStrategy>().unwrap(),
            TransferStrategy::DirectInheritance
        );
        assert_eq!(
            " Duplicate ".parse::<TransferStrategy>().unwrap(),
            TransferStrategy::ExplicitDuplication
        );
        assert!("carrier-pigeon".parse::<TransferStrategy>().is_err());
    }

    #[test]
    fn unix_default_is_direct_inheritance() {
        assert_eq!(
            TransferStrategy::default(),
            TransferStrategy::DirectInheritance
        );
        assert!(!TransferStrategy::DirectInheritance.needs_reconstruction());
        assert!(TransferStrategy::ExplicitDuplication.needs_reconstruction());
    }

    #[test]
    fn duplication_round_trip_restores_open_state() {
        let (read, _write) = sys::pipe().unwrap();
        sys::set_nonblocking(&read).unwrap();
        assert!(!sys::is_inheritable(&read).unwrap());
        let mut state = SlotState::Open(read);

        TransferStrategy::ExplicitDuplication
            .before_create("t", &mut state, false)
            .unwrap();
        let SlotState::PendingTransfer(token) = &state else {
            panic!("expected pending transfer");
        };
        assert!(sys::is_inheritable(token).unwrap());

        TransferStrategy::ExplicitDuplication
            .after_create("t", Direction::Read, &mut state)
            .unwrap();
        let SlotState::Open(resource) = &state else {
            panic!("expected open state");
        };
        assert!(!sys::is_inheritable(resource).unwrap());
        assert!(sys::is_nonblocking(resource).unwrap());
    }

    #[test]
    fn busy_slots_are_not_duplicated() {
        let (read, _write) = sys::pipe().unwrap();
        let raw = sys::raw(&read);
        let mut state = SlotState::Open(read);

        TransferStrategy::ExplicitDuplication
            .before_create("t", &mut state, true)
            .unwrap();
        assert!(matches!(&state, SlotState::Open(fd) if sys::raw(fd) == raw));
    }

    #[test]
    fn reconstruction_rejects_mismatched_direction() {
        let (_read, write) = sys::pipe().unwrap();
        let mut state = SlotState::Open(write);
        let strategy = TransferStrategy::ExplicitDuplication;

        strategy.before_create("t", &mut state, false).unwrap();
        let err = strategy
            .after_create("t", Direction::Read, &mut state)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(matches!(state, SlotState::PendingTransfer(_)));
    }
}
