//! Lock guard shared by all lockable resources.
//!
//! A lock copies the requested region into a staging buffer; the unlock
//! writes it back (into the CPU shadow, or straight to the GPU for
//! default-pool storage) and records dirty regions as the flags dictate.

use std::sync::Arc;

use tracing::warn;

use crate::error::D3dResult;
use crate::types::{Box3, LockFlags};

/// Implemented by resource inners that hand out locks.
pub(crate) trait LockBacking: Send + Sync {
    /// Write `bytes` back for the locked region and clear the lock flag.
    fn finish_unlock(
        &self,
        subresource: u32,
        region: Box3,
        bytes: &[u8],
        flags: LockFlags,
    ) -> D3dResult<()>;

    /// Clear the lock flag without writing anything back.
    fn abandon_lock(&self, subresource: u32);

    fn kind(&self) -> &'static str;
}

/// Exclusive access to one locked subresource region.
///
/// The staging bytes are tightly packed: `row_pitch` bytes per row,
/// `slice_pitch` bytes per depth slice. Dropping the guard unlocks with
/// best-effort write-back; use [`LockGuard::unlock`] to observe errors.
pub struct LockGuard {
    backing: Arc<dyn LockBacking>,
    subresource: u32,
    region: Box3,
    row_pitch: u32,
    slice_pitch: u32,
    flags: LockFlags,
    bytes: Vec<u8>,
    unlocked: bool,
}

impl LockGuard {
    pub(crate) fn new(
        backing: Arc<dyn LockBacking>,
        subresource: u32,
        region: Box3,
        row_pitch: u32,
        slice_pitch: u32,
        flags: LockFlags,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            backing,
            subresource,
            region,
            row_pitch,
            slice_pitch,
            flags,
            bytes,
            unlocked: false,
        }
    }

    pub fn region(&self) -> Box3 {
        self.region
    }

    pub fn row_pitch(&self) -> u32 {
        self.row_pitch
    }

    pub fn slice_pitch(&self) -> u32 {
        self.slice_pitch
    }

    pub fn flags(&self) -> LockFlags {
        self.flags
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// View the staging bytes as typed texels/elements.
    pub fn texels_mut<T: bytemuck::Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut self.bytes)
    }

    pub fn texels<T: bytemuck::Pod>(&self) -> &[T] {
        bytemuck::cast_slice(&self.bytes)
    }

    fn finish(&mut self) -> D3dResult<()> {
        if self.unlocked {
            return Ok(());
        }
        self.unlocked = true;
        if self.flags.contains(LockFlags::READ_ONLY) {
            self.backing.abandon_lock(self.subresource);
            Ok(())
        } else {
            self.backing
                .finish_unlock(self.subresource, self.region, &self.bytes, self.flags)
        }
    }

    /// Unlock explicitly, surfacing write-back failures.
    pub fn unlock(mut self) -> D3dResult<()> {
        self.finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(
                kind = self.backing.kind(),
                subresource = self.subresource,
                %err,
                "unlock write-back failed during drop"
            );
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("kind", &self.backing.kind())
            .field("subresource", &self.subresource)
            .field("region", &self.region)
            .field("flags", &self.flags)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Copy a box out of a tightly packed subresource shadow.
pub(crate) fn copy_box_out(
    shadow: &[u8],
    extent: (u32, u32, u32),
    bytes_per_texel: u32,
    region: &Box3,
) -> Vec<u8> {
    let (w, h, _) = extent;
    let bpt = bytes_per_texel as usize;
    let row_bytes = region.width() as usize * bpt;
    let mut out = Vec::with_capacity(row_bytes * region.height() as usize * region.depth() as usize);
    for z in region.front..region.back {
        for y in region.top..region.bottom {
            let off = ((z as usize * h as usize + y as usize) * w as usize
                + region.left as usize)
                * bpt;
            out.extend_from_slice(&shadow[off..off + row_bytes]);
        }
    }
    out
}

/// Copy tightly packed region bytes back into a subresource shadow.
pub(crate) fn copy_box_in(
    shadow: &mut [u8],
    extent: (u32, u32, u32),
    bytes_per_texel: u32,
    region: &Box3,
    bytes: &[u8],
) {
    let (w, h, _) = extent;
    let bpt = bytes_per_texel as usize;
    let row_bytes = region.width() as usize * bpt;
    let mut src = 0usize;
    for z in region.front..region.back {
        for y in region.top..region.bottom {
            let off = ((z as usize * h as usize + y as usize) * w as usize
                + region.left as usize)
                * bpt;
            shadow[off..off + row_bytes].copy_from_slice(&bytes[src..src + row_bytes]);
            src += row_bytes;
        }
    }
}
