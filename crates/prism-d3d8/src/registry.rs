//! Device-owned resource catalog.
//!
//! The registry holds weak references only; ownership stays with the
//! application-facing wrappers. Reset walks the live set to tear down and
//! recreate pool-dependent GPU storage.

use std::sync::{Arc, Mutex, Weak};

use hashbrown::HashMap;

use crate::error::D3dResult;
use crate::pool::Pool;

/// Process-unique identity of a registered resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Reset participation contract implemented by every registered resource.
pub(crate) trait PoolResource: Send + Sync {
    fn resource_id(&self) -> ResourceId;
    fn pool(&self) -> Pool;
    fn kind(&self) -> &'static str;
    /// Drop the GPU-side allocation, keeping descriptors and shadows.
    fn release_gpu_storage(&self);
    /// Allocate fresh GPU storage from the retained descriptor.
    fn recreate_gpu_storage(&self) -> D3dResult<()>;
    /// Re-upload the full CPU shadow (managed fast path).
    fn restore_from_shadow(&self) -> D3dResult<()>;
}

#[derive(Default)]
pub(crate) struct ResourceRegistry {
    entries: Mutex<HashMap<ResourceId, Weak<dyn PoolResource>>>,
}

impl ResourceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: ResourceId, resource: Weak<dyn PoolResource>) {
        let mut entries = self.entries.lock().expect("registry poisoned");
        let previous = entries.insert(id, resource);
        debug_assert!(previous.is_none(), "resource id registered twice");
    }

    pub(crate) fn unregister(&self, id: ResourceId) {
        self.entries.lock().expect("registry poisoned").remove(&id);
    }

    /// Snapshot of the live resources, pruning dead entries on the way.
    ///
    /// Returned as owned strong references so callers never invoke resource
    /// methods while the registry lock is held.
    pub(crate) fn live(&self) -> Vec<Arc<dyn PoolResource>> {
        let mut entries = self.entries.lock().expect("registry poisoned");
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|_, weak| match weak.upgrade() {
            Some(strong) => {
                live.push(strong);
                true
            }
            None => false,
        });
        live.sort_by_key(|r| r.resource_id());
        live
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live().len()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().expect("registry poisoned");
        f.debug_struct("ResourceRegistry")
            .field("entries", &entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeResource {
        id: ResourceId,
    }

    impl PoolResource for FakeResource {
        fn resource_id(&self) -> ResourceId {
            self.id
        }
        fn pool(&self) -> Pool {
            Pool::Managed
        }
        fn kind(&self) -> &'static str {
            "fake"
        }
        fn release_gpu_storage(&self) {}
        fn recreate_gpu_storage(&self) -> D3dResult<()> {
            Ok(())
        }
        fn restore_from_shadow(&self) -> D3dResult<()> {
            Ok(())
        }
    }

    fn fake(id: u64) -> Arc<FakeResource> {
        Arc::new(FakeResource { id: ResourceId(id) })
    }

    #[test]
    fn live_prunes_dropped_resources() {
        let registry = ResourceRegistry::new();
        let a = fake(1);
        let b = fake(2);
        registry.register(ResourceId(1), Arc::downgrade(&a) as Weak<dyn PoolResource>);
        registry.register(ResourceId(2), Arc::downgrade(&b) as Weak<dyn PoolResource>);
        assert_eq!(registry.live_count(), 2);

        drop(b);
        let live = registry.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].resource_id(), ResourceId(1));
        // The dead entry is gone from the map, not just skipped.
        assert_eq!(registry.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = ResourceRegistry::new();
        let a = fake(7);
        registry.register(ResourceId(7), Arc::downgrade(&a) as Weak<dyn PoolResource>);
        registry.unregister(ResourceId(7));
        assert_eq!(registry.live_count(), 0);
    }
}
