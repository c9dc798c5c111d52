//! The allocation table shared by every node of a pipeline run.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use accelfarm_core::{BufferId, DeviceHandle, FarmError, Result};

/// Tracks live device allocations keyed by host-buffer identity.
///
/// A task that retains an allocation records it here; that record is what
/// makes a later task's reuse directive resolvable, including across
/// pipeline stages and across worker threads. The table is lock-protected
/// so any node may touch it concurrently, but it does not order tasks:
/// a reuse only resolves if the retaining task already ran, and providing
/// that ordering (stage sequencing, emission order) is the caller's job.
pub struct DeviceAllocator {
    entries: Mutex<HashMap<BufferId, DeviceHandle>>,
}

impl DeviceAllocator {
    pub fn new() -> Self {
        DeviceAllocator {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a staged allocation under the host region's identity.
    ///
    /// Re-registering an identity replaces the old record; the previous
    /// handle is returned so the caller can decide whether to free it.
    pub fn register(&self, id: BufferId, handle: DeviceHandle) -> Option<DeviceHandle> {
        let replaced = self.entries.lock().insert(id, handle);
        if let Some(old) = replaced {
            warn!(
                buffer = %id,
                old_id = old.id,
                new_id = handle.id,
                "host region re-registered while its previous allocation was still live"
            );
        }
        replaced
    }

    /// Look up the live allocation for a host region.
    pub fn resolve(&self, id: BufferId) -> Result<DeviceHandle> {
        self.entries
            .lock()
            .get(&id)
            .copied()
            .ok_or(FarmError::UnresolvedBuffer { addr: id.0 })
    }

    /// Remove a host region's record, handing its allocation to the caller.
    ///
    /// Returns `None` when no allocation is live for the region, which the
    /// caller should treat as an already-released buffer rather than an
    /// error: two directives in one task may legitimately release the same
    /// identity.
    pub fn release(&self, id: BufferId) -> Option<DeviceHandle> {
        let removed = self.entries.lock().remove(&id);
        match removed {
            Some(handle) => debug!(buffer = %id, handle = handle.id, "released allocation record"),
            None => warn!(buffer = %id, "release of a host region with no live allocation"),
        }
        removed
    }

    /// Number of live allocation records.
    pub fn live(&self) -> usize {
        self.entries.lock().len()
    }

    /// Remove and return every live record. Used at teardown so retained
    /// allocations can be freed in one sweep.
    pub fn drain(&self) -> Vec<DeviceHandle> {
        let mut entries = self.entries.lock();
        let handles: Vec<DeviceHandle> = entries.values().copied().collect();
        entries.clear();
        handles
    }
}

impl Default for DeviceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
