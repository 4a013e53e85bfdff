//! COM-style reference counting.
//!
//! Wrapper types clone on `add_ref` and release on drop; the thread that
//! takes the count to zero runs destruction exactly once. Counts are plain
//! atomics, never locks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::warn;

/// Lock-free reference count starting at 1.
#[derive(Debug)]
pub struct RefCount {
    count: AtomicU32,
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

impl RefCount {
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(1),
        }
    }

    /// Increment; returns the new count.
    pub fn add_ref(&self) -> u32 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement; returns the new count. Exactly one caller observes 0.
    pub fn release(&self) -> u32 {
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => {
                warn!("release called on a dead reference count");
                0
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// One-shot destruction latch.
///
/// Destruction side effects must run once even if release and an explicit
/// teardown path race; whoever wins the swap does the work.
#[derive(Debug, Default)]
pub struct DestroyLatch {
    destroyed: AtomicBool,
}

impl DestroyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once.
    pub fn arm(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Capability sets a resource can be queried for.
///
/// Querying never creates a new object: a successful query hands back the
/// same identity with the count bumped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InterfaceId {
    Resource,
    BaseTexture,
    Texture2d,
    CubeTexture,
    VolumeTexture,
    Surface,
    VertexBuffer,
    IndexBuffer,
}
