//! Endpoint reconciliation around process creation.
//!
//! The parent holds the registry lock from the pre-creation hook until the
//! post-creation hook, so the snapshot handed to the child lists exactly the
//! descriptors the child inherits.

use std::collections::HashSet;

use ipcpipe_transport::{
    current_pid, Endpoint, EndpointId, RegistryGuard, Snapshot, TransferStrategy, TransportError,
};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::runtime::EXIT_REINIT_FAILED;

/// Parent, before the child exists.
///
/// Designated endpoints must be open, owned by the caller and idle. They are
/// checked under the same guard that covers the fork, so no other task can
/// close or start using one before the child inherits it.
pub(crate) fn before_create(
    registry: &mut RegistryGuard<'_>,
    designated: &[Endpoint],
    strategy: TransferStrategy,
) -> Result<Snapshot> {
    for endpoint in designated {
        registry.check_transferable(endpoint.id()).map_err(|err| {
            debug!(id = %endpoint.id(), %err, "refusing to hand over endpoint");
            err
        })?;
    }
    registry.prepare_transfer(strategy)?;
    Ok(registry.snapshot())
}

/// Parent, after the child exists or creation failed. Consumes the guard.
pub(crate) fn after_create(mut registry: RegistryGuard<'_>, strategy: TransferStrategy) {
    for (id, err) in registry.complete_transfer(strategy) {
        warn!(%id, %err, "endpoint could not be reconstructed in parent; it is now closed");
    }
}

/// Parent, once the guard is released: the designated endpoints belong to the
/// child now.
pub(crate) fn release_designated(endpoints: &[Endpoint]) {
    for endpoint in endpoints {
        match endpoint.close() {
            Ok(()) | Err(TransportError::Closed) => {}
            Err(err) => warn!(%endpoint, %err, "failed to close handed-over endpoint in parent"),
        }
    }
}

/// Child, first thing after creation: only what the parent saw at spawn time
/// is known here.
pub(crate) fn reset(registry: &mut RegistryGuard<'_>, snapshot: &Snapshot) {
    let stale = registry.reset_to(snapshot);
    if stale > 0 {
        warn!(stale, "dropped registry entries missing from the spawn snapshot");
    }
}

/// Child, once the runtime is rebuilt: take ownership of the designated
/// endpoints and close everything else.
///
/// On failure returns the exit status the child must leave with; the caller
/// exits without running destructors.
pub(crate) fn adopt(
    registry: &mut RegistryGuard<'_>,
    designated: &[Endpoint],
    strategy: TransferStrategy,
) -> std::result::Result<(), i32> {
    let pid = current_pid();
    registry.legitimize_all(pid);

    let keep: HashSet<EndpointId> = designated.iter().map(Endpoint::id).collect();
    for (id, err) in registry.complete_transfer(strategy) {
        if keep.contains(&id) {
            error!(%id, %err, "designated endpoint could not be reconstructed in child");
            return Err(EXIT_REINIT_FAILED);
        }
        debug!(%id, %err, "undesignated endpoint lost during reconstruction");
    }

    let closed = registry.retain_only(&keep);
    debug!(pid, kept = keep.len(), closed, "child adopted endpoints");
    Ok(())
}

#[cfg(test)]
mod tests {
    use ipcpipe_transport::{create_pipe, EndpointState, Registry};

    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn busy_designated_endpoint_is_refused_before_any_transfer() {
        let (read, write) = create_pipe().unwrap();
        let in_flight = read.lock_io().await.unwrap();

        let designated = [read.clone()];
        let mut registry = Registry::process().lock();
        let outcome = before_create(
            &mut registry,
            &designated,
            TransferStrategy::ExplicitDuplication,
        );
        drop(registry);

        assert!(matches!(
            outcome,
            Err(crate::ProcessError::Transport(TransportError::Locked))
        ));
        // Nothing was converted for transfer.
        assert_eq!(write.state(), EndpointState::Open);
        drop(in_flight);
        assert_eq!(read.state(), EndpointState::Open);
    }

    #[test]
    fn closed_designated_endpoint_is_refused_under_the_guard() {
        let (read, _write) = create_pipe().unwrap();
        read.close().unwrap();

        let designated = [read.clone()];
        let mut registry = Registry::process().lock();
        let outcome = before_create(
            &mut registry,
            &designated,
            TransferStrategy::DirectInheritance,
        );
        drop(registry);

        assert!(matches!(
            outcome,
            Err(crate::ProcessError::Transport(TransportError::Closed))
        ));
    }
}
