use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::endpoint::{Direction, Endpoint, EndpointId, EndpointState};
use crate::error::{Result, TransportError};
use crate::strategy::TransferStrategy;
use crate::sys::{self, OwnedResource};

/// Tagged validity of a registered resource. A closed endpoint has no slot.
pub(crate) enum SlotState {
    Open(OwnedResource),
    PendingTransfer(OwnedResource),
}

pub(crate) struct Slot {
    pub(crate) direction: Direction,
    pub(crate) owner: u32,
    pub(crate) state: SlotState,
    pub(crate) io_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Slot {
    fn endpoint_state(&self) -> EndpointState {
        match self.state {
            SlotState::Open(_) => EndpointState::Open,
            SlotState::PendingTransfer(_) => EndpointState::PendingTransfer,
        }
    }

    fn is_busy(&self) -> bool {
        self.io_lock.try_lock().is_err()
    }
}

static PROCESS_REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry {
    slots: Mutex::new(HashMap::new()),
});

/// Every endpoint created in, or inherited by, the current process.
///
/// The registry owns the OS resources; [`Endpoint`] handles only name a slot.
/// There is one registry per process: it starts empty, is filled by pipe
/// creation and by inheritance at spawn time, and disappears with the process.
/// It crosses a process boundary as a [`Snapshot`] taken under its lock.
pub struct Registry {
    slots: Mutex<HashMap<EndpointId, Slot>>,
}

impl Registry {
    /// The registry of the calling process.
    pub fn process() -> &'static Registry {
        &PROCESS_REGISTRY
    }

    /// Lock the registry for a multi-step boundary operation.
    ///
    /// Dropping an [`Endpoint`] handle while holding the guard deadlocks.
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            slots: self.slots.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether no endpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is registered in this process.
    pub fn contains(&self, id: EndpointId) -> bool {
        self.lock().slots.contains_key(&id)
    }

    /// Point-in-time list of registered endpoints.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub(crate) fn state_of(&self, id: EndpointId) -> EndpointState {
        self.lock()
            .slots
            .get(&id)
            .map_or(EndpointState::Closed, Slot::endpoint_state)
    }

    pub(crate) fn owner_of(&self, id: EndpointId) -> Option<u32> {
        self.lock().slots.get(&id).map(|slot| slot.owner)
    }

    /// Release `id` when its last handle goes away, if this process owns it.
    pub(crate) fn discard(&self, id: EndpointId) {
        let mut guard = self.lock();
        let owned = guard
            .slots
            .get(&id)
            .is_some_and(|slot| slot.owner == sys::current_pid());
        if owned {
            guard.slots.remove(&id);
            debug!(%id, "released dropped endpoint");
        }
    }
}

/// Exclusive access to the process registry.
pub struct RegistryGuard<'a> {
    slots: MutexGuard<'a, HashMap<EndpointId, Slot>>,
}

impl RegistryGuard<'_> {
    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no endpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record the current membership. Taken under the same lock that is held
    /// across process creation, it matches the inherited descriptor table.
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Vec<_> = self
            .slots
            .iter()
            .map(|(id, slot)| (*id, slot.direction))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        Snapshot {
            entries,
            taken_by: sys::current_pid(),
        }
    }

    /// Register a freshly allocated resource owned by the current process.
    pub(crate) fn register(&mut self, direction: Direction, resource: OwnedResource) -> Endpoint {
        let mut id = EndpointId::random();
        while self.slots.contains_key(&id) {
            id = EndpointId::random();
        }
        let io_lock = Arc::new(tokio::sync::Mutex::new(()));
        debug!(%id, %direction, raw = ?sys::raw(&resource), "registered endpoint");
        self.slots.insert(
            id,
            Slot {
                direction,
                owner: sys::current_pid(),
                state: SlotState::Open(resource),
                io_lock: Arc::clone(&io_lock),
            },
        );
        Endpoint::from_parts(id, direction, io_lock)
    }

    /// Look up a slot usable by the current process: closed first, then owner.
    pub(crate) fn owned_slot(&mut self, id: EndpointId) -> Result<&mut Slot> {
        let slot = self.slots.get_mut(&id).ok_or(TransportError::Closed)?;
        let current = sys::current_pid();
        if slot.owner != current {
            return Err(TransportError::CrossProcess {
                owner: slot.owner,
                current,
            });
        }
        Ok(slot)
    }

    /// Remove an owned slot, closing its resource while the lock is held.
    pub(crate) fn release(&mut self, id: EndpointId) -> Result<()> {
        self.owned_slot(id)?;
        self.slots.remove(&id);
        Ok(())
    }

    /// Rebind `id` to `pid`.
    pub(crate) fn legitimize(&mut self, id: EndpointId, pid: u32) -> Result<()> {
        let slot = self.slots.get_mut(&id).ok_or(TransportError::Closed)?;
        if slot.owner != pid {
            debug!(%id, from = slot.owner, to = pid, "legitimized endpoint");
            slot.owner = pid;
        }
        Ok(())
    }

    /// Fail unless `id` is open, owned by the current process and idle.
    ///
    /// Run under the same guard as [`prepare_transfer`](Self::prepare_transfer)
    /// so nothing can close or start using the endpoint in between.
    pub fn check_transferable(&mut self, id: EndpointId) -> Result<()> {
        if self.owned_slot(id)?.is_busy() {
            return Err(TransportError::Locked);
        }
        Ok(())
    }

    /// Bind every registered endpoint to `pid`.
    pub fn legitimize_all(&mut self, pid: u32) {
        for (id, slot) in self.slots.iter_mut() {
            debug!(%id, from = slot.owner, to = pid, "legitimized endpoint");
            slot.owner = pid;
        }
    }

    /// Run the strategy's pre-creation hook over every endpoint.
    ///
    /// On failure the endpoints already converted are restored before the
    /// error is returned.
    pub fn prepare_transfer(&mut self, strategy: TransferStrategy) -> Result<()> {
        let mut failure = None;
        for (id, slot) in self.slots.iter_mut() {
            let busy = slot.is_busy();
            if let Err(err) = strategy.before_create(id, &mut slot.state, busy) {
                failure = Some(err);
                break;
            }
        }
        match failure {
            None => Ok(()),
            Some(err) => {
                for (id, err) in self.complete_transfer(strategy) {
                    warn!(%id, %err, "endpoint lost while rolling back transfer");
                }
                Err(TransportError::Io(err))
            }
        }
    }

    /// Run the strategy's post-creation hook over every endpoint.
    ///
    /// Endpoints that cannot be reconstructed are unusable; they are dropped
    /// from the registry and reported to the caller.
    pub fn complete_transfer(&mut self, strategy: TransferStrategy) -> Vec<(EndpointId, io::Error)> {
        let mut failures = Vec::new();
        for (id, slot) in self.slots.iter_mut() {
            if let Err(err) = strategy.after_create(id, slot.direction, &mut slot.state) {
                failures.push((*id, err));
            }
        }
        for (id, _) in &failures {
            self.slots.remove(id);
        }
        failures
    }

    /// Restrict the registry to the members of `snapshot`. Returns the number
    /// of slots dropped.
    pub fn reset_to(&mut self, snapshot: &Snapshot) -> usize {
        let before = self.slots.len();
        self.slots.retain(|id, _| snapshot.contains(*id));
        for (id, _) in &snapshot.entries {
            if !self.slots.contains_key(id) {
                warn!(%id, "snapshot entry missing from inherited registry");
            }
        }
        before - self.slots.len()
    }

    /// Close every endpoint not listed in `keep`. Returns the number closed.
    ///
    /// This is the boundary-guard path: it bypasses the I/O lock because no
    /// operation can be in flight in a freshly created process.
    pub fn retain_only(&mut self, keep: &HashSet<EndpointId>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|id, slot| {
            let retained = keep.contains(id);
            if !retained {
                debug!(%id, direction = %slot.direction, "invalidating endpoint");
            }
            retained
        });
        before - self.slots.len()
    }
}

/// Membership of a registry at the moment of process creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(EndpointId, Direction)>,
    taken_by: u32,
}

impl Snapshot {
    /// Registered identifiers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Whether `id` was registered when the snapshot was taken.
    pub fn contains(&self, id: EndpointId) -> bool {
        self.entries.binary_search_by_key(&id, |(id, _)| *id).is_ok()
    }

    /// Direction of `id`, if registered.
    pub fn direction_of(&self, id: EndpointId) -> Option<Direction> {
        self.entries
            .binary_search_by_key(&id, |(id, _)| *id)
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// Number of endpoints recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Process that took the snapshot.
    pub fn taken_by(&self) -> u32 {
        self.taken_by
    }
}
