use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of a GPU-side object (texture, buffer or framebuffer).
///
/// Handles are allocated monotonically and never reused within a process, so
/// a resource that is destroyed and recreated is observably a new object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(NonZeroU64);

impl GpuHandle {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic handle allocator shared by backends.
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn allocate(&self) -> GpuHandle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // `next` starts at 1 and only ever increments.
        GpuHandle(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_monotonic() {
        let alloc = HandleAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert!(a < b && b < c);
        assert_eq!(a.get(), 1);
        assert_eq!(c.get(), 3);
    }
}
