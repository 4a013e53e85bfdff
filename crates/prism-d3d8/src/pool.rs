//! Storage pools and their lifecycle policy.

use crate::error::{D3dError, D3dResult};
use crate::types::UsageFlags;

/// Storage class of a resource, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Device-optimal storage. No CPU shadow; destroyed and recreated by
    /// reset; locking requires a full pipeline drain.
    Default,
    /// GPU storage plus an authoritative CPU shadow. Survives reset via the
    /// shadow fast path.
    Managed,
    /// CPU-only storage directly lockable by the application.
    SystemMem,
    /// CPU-only storage invisible to the GPU entirely.
    Scratch,
}

impl Pool {
    /// Whether the pool keeps an authoritative CPU copy of the contents.
    pub fn has_cpu_shadow(self) -> bool {
        !matches!(self, Pool::Default)
    }

    /// Whether reset tears down the resource's GPU storage.
    pub fn destroyed_on_reset(self) -> bool {
        matches!(self, Pool::Default)
    }

    /// Whether a lock must drain in-flight GPU work first.
    pub fn lock_needs_drain(self) -> bool {
        matches!(self, Pool::Default)
    }

    /// Whether reset restores the resource from its shadow without
    /// application involvement.
    pub fn recreate_fast_path(self) -> bool {
        matches!(self, Pool::Managed)
    }

    /// Whether the resource owns a GPU-side allocation at all.
    pub fn has_gpu_handle(self) -> bool {
        matches!(self, Pool::Default | Pool::Managed)
    }

    /// Whether writes accumulate in a dirty tracker for lazy upload.
    pub fn tracks_dirty(self) -> bool {
        matches!(self, Pool::Managed | Pool::SystemMem)
    }

    /// Creation-time pool/usage validation, applied before any allocation.
    pub fn validate_creation(self, usage: UsageFlags) -> D3dResult<()> {
        let gpu_output = usage.intersects(UsageFlags::RENDER_TARGET | UsageFlags::DEPTH_STENCIL);
        if gpu_output && self != Pool::Default {
            return Err(D3dError::InvalidCall);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_table() {
        for (pool, shadow, destroyed, drain, fast, handle, dirty) in [
            (Pool::Default, false, true, true, false, true, false),
            (Pool::Managed, true, false, false, true, true, true),
            (Pool::SystemMem, true, false, false, false, false, true),
            (Pool::Scratch, true, false, false, false, false, false),
        ] {
            assert_eq!(pool.has_cpu_shadow(), shadow, "{pool:?}");
            assert_eq!(pool.destroyed_on_reset(), destroyed, "{pool:?}");
            assert_eq!(pool.lock_needs_drain(), drain, "{pool:?}");
            assert_eq!(pool.recreate_fast_path(), fast, "{pool:?}");
            assert_eq!(pool.has_gpu_handle(), handle, "{pool:?}");
            assert_eq!(pool.tracks_dirty(), dirty, "{pool:?}");
        }
    }

    #[test]
    fn render_targets_must_live_in_default() {
        assert!(Pool::Default.validate_creation(UsageFlags::RENDER_TARGET).is_ok());
        assert_eq!(
            Pool::Managed.validate_creation(UsageFlags::RENDER_TARGET),
            Err(D3dError::InvalidCall)
        );
        assert_eq!(
            Pool::SystemMem.validate_creation(UsageFlags::DEPTH_STENCIL),
            Err(D3dError::InvalidCall)
        );
        assert!(Pool::Managed.validate_creation(UsageFlags::DYNAMIC).is_ok());
    }
}
