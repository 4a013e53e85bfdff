//! Deterministic in-memory backend.
//!
//! Stands in for a real graphics context in tests and the headless path. All
//! storage lives in plain `Vec<u8>`s, uploads and readbacks are bounds
//! checked, and a shared control block lets tests inject allocation failures
//! and observe allocation counts from outside the executor thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::backend::{
    BackendError, BufferStorageDesc, FramebufferStorageDesc, RenderBackend, TextureRegion,
    TextureStorageDesc,
};
use crate::handle::HandleAllocator;
use crate::GpuHandle;

/// Shared knobs and counters for a [`SoftwareBackend`].
///
/// Cloning shares the underlying state, so tests keep one clone while the
/// backend itself moves onto the executor thread.
#[derive(Clone, Debug, Default)]
pub struct SoftwareBackendControls {
    inner: Arc<ControlsInner>,
}

#[derive(Debug, Default)]
struct ControlsInner {
    fail_next_allocs: AtomicU64,
    live_allocations: AtomicU64,
    total_allocations: AtomicU64,
}

impl SoftwareBackendControls {
    /// Make the next `n` allocation attempts fail with `OutOfMemory`.
    pub fn fail_next_allocs(&self, n: u64) {
        self.inner.fail_next_allocs.store(n, Ordering::SeqCst);
    }

    pub fn live_allocations(&self) -> u64 {
        self.inner.live_allocations.load(Ordering::SeqCst)
    }

    pub fn total_allocations(&self) -> u64 {
        self.inner.total_allocations.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .fail_next_allocs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn note_alloc(&self) {
        self.inner.live_allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.total_allocations.fetch_add(1, Ordering::SeqCst);
    }

    fn note_free(&self) {
        self.inner.live_allocations.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
enum Allocation {
    Texture {
        desc: TextureStorageDesc,
        /// One tightly packed byte store per subresource.
        subresources: Vec<Vec<u8>>,
    },
    Buffer {
        bytes: Vec<u8>,
    },
    Framebuffer {
        desc: FramebufferStorageDesc,
        pixels: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct SoftwareBackend {
    allocator: HandleAllocator,
    allocations: HashMap<GpuHandle, Allocation>,
    controls: SoftwareBackendControls,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            allocator: HandleAllocator::new(),
            allocations: HashMap::new(),
            controls: SoftwareBackendControls::default(),
        }
    }

    pub fn controls(&self) -> SoftwareBackendControls {
        self.controls.clone()
    }

    fn check_alloc(&self) -> Result<(), BackendError> {
        if self.controls.take_injected_failure() {
            debug!("software backend: injected allocation failure");
            return Err(BackendError::OutOfMemory);
        }
        Ok(())
    }

    fn insert(&mut self, allocation: Allocation) -> GpuHandle {
        let handle = self.allocator.allocate();
        self.allocations.insert(handle, allocation);
        self.controls.note_alloc();
        handle
    }

    fn texture_mut(
        &mut self,
        handle: GpuHandle,
    ) -> Result<(&TextureStorageDesc, &mut Vec<Vec<u8>>), BackendError> {
        match self.allocations.get_mut(&handle) {
            Some(Allocation::Texture { desc, subresources }) => Ok((desc, subresources)),
            Some(_) => Err(BackendError::Unsupported("handle is not a texture")),
            None => Err(BackendError::UnknownHandle(handle)),
        }
    }
}

fn region_in_bounds(region: &TextureRegion, extent: (u32, u32, u32)) -> bool {
    let (w, h, d) = extent;
    region.width > 0
        && region.height > 0
        && region.depth > 0
        && region.x.checked_add(region.width).is_some_and(|e| e <= w)
        && region.y.checked_add(region.height).is_some_and(|e| e <= h)
        && region.z.checked_add(region.depth).is_some_and(|e| e <= d)
}

impl RenderBackend for SoftwareBackend {
    fn create_texture(&mut self, desc: &TextureStorageDesc) -> Result<GpuHandle, BackendError> {
        self.check_alloc()?;
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(BackendError::Unsupported("zero-sized texture"));
        }
        if desc.layers == 0 || desc.levels == 0 {
            return Err(BackendError::Unsupported("texture without subresources"));
        }
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        for layer in 0..desc.layers {
            let _ = layer;
            for level in 0..desc.levels {
                let (w, h, d) = desc.level_extent(level);
                let size = w as usize * h as usize * d as usize * desc.bytes_per_texel as usize;
                subresources.push(vec![0u8; size]);
            }
        }
        Ok(self.insert(Allocation::Texture {
            desc: *desc,
            subresources,
        }))
    }

    fn create_buffer(&mut self, desc: &BufferStorageDesc) -> Result<GpuHandle, BackendError> {
        self.check_alloc()?;
        if desc.size == 0 {
            return Err(BackendError::Unsupported("zero-sized buffer"));
        }
        Ok(self.insert(Allocation::Buffer {
            bytes: vec![0u8; desc.size as usize],
        }))
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferStorageDesc,
    ) -> Result<GpuHandle, BackendError> {
        self.check_alloc()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::Unsupported("zero-sized framebuffer"));
        }
        let size = desc.width as usize * desc.height as usize * desc.bytes_per_pixel as usize;
        Ok(self.insert(Allocation::Framebuffer {
            desc: *desc,
            pixels: vec![0u8; size],
        }))
    }

    fn destroy(&mut self, handle: GpuHandle) {
        if self.allocations.remove(&handle).is_some() {
            self.controls.note_free();
        }
    }

    fn upload_texture(
        &mut self,
        handle: GpuHandle,
        subresource: u32,
        region: TextureRegion,
        row_pitch: u32,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        let (desc, subresources) = self.texture_mut(handle)?;
        let levels = desc.levels;
        let bpt = desc.bytes_per_texel as usize;
        let level = subresource % levels;
        let extent = desc.level_extent(level);
        if subresource >= desc.subresource_count() {
            return Err(BackendError::OutOfBounds("subresource index"));
        }
        if !region_in_bounds(&region, extent) {
            return Err(BackendError::OutOfBounds("texture region"));
        }
        let row_bytes = region.width as usize * bpt;
        if (row_pitch as usize) < row_bytes {
            return Err(BackendError::OutOfBounds("row pitch"));
        }
        let slice_pitch = row_pitch as usize * region.height as usize;
        if bytes.len() < slice_pitch * region.depth as usize {
            return Err(BackendError::OutOfBounds("source byte length"));
        }

        let (w, h, _) = extent;
        let dst = &mut subresources[subresource as usize];
        for dz in 0..region.depth as usize {
            for dy in 0..region.height as usize {
                let src_off = dz * slice_pitch + dy * row_pitch as usize;
                let dst_off = (((region.z as usize + dz) * h as usize
                    + (region.y as usize + dy))
                    * w as usize
                    + region.x as usize)
                    * bpt;
                dst[dst_off..dst_off + row_bytes].copy_from_slice(&bytes[src_off..src_off + row_bytes]);
            }
        }
        Ok(())
    }

    fn upload_buffer(
        &mut self,
        handle: GpuHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        match self.allocations.get_mut(&handle) {
            Some(Allocation::Buffer { bytes: store }) => {
                let offset = offset as usize;
                let end = offset
                    .checked_add(bytes.len())
                    .ok_or(BackendError::OutOfBounds("buffer range"))?;
                if end > store.len() {
                    return Err(BackendError::OutOfBounds("buffer range"));
                }
                store[offset..end].copy_from_slice(bytes);
                Ok(())
            }
            Some(_) => Err(BackendError::Unsupported("handle is not a buffer")),
            None => Err(BackendError::UnknownHandle(handle)),
        }
    }

    fn read_texture(
        &mut self,
        handle: GpuHandle,
        subresource: u32,
        region: TextureRegion,
    ) -> Result<Vec<u8>, BackendError> {
        let (desc, subresources) = self.texture_mut(handle)?;
        if subresource >= desc.subresource_count() {
            return Err(BackendError::OutOfBounds("subresource index"));
        }
        let level = subresource % desc.levels;
        let extent = desc.level_extent(level);
        if !region_in_bounds(&region, extent) {
            return Err(BackendError::OutOfBounds("texture region"));
        }
        let bpt = desc.bytes_per_texel as usize;
        let (w, h, _) = extent;
        let src = &subresources[subresource as usize];
        let row_bytes = region.width as usize * bpt;
        let mut out = Vec::with_capacity(row_bytes * region.height as usize * region.depth as usize);
        for dz in 0..region.depth as usize {
            for dy in 0..region.height as usize {
                let src_off = (((region.z as usize + dz) * h as usize
                    + (region.y as usize + dy))
                    * w as usize
                    + region.x as usize)
                    * bpt;
                out.extend_from_slice(&src[src_off..src_off + row_bytes]);
            }
        }
        Ok(out)
    }

    fn read_buffer(
        &mut self,
        handle: GpuHandle,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, BackendError> {
        match self.allocations.get(&handle) {
            Some(Allocation::Buffer { bytes }) => {
                let offset = offset as usize;
                let end = offset
                    .checked_add(len as usize)
                    .ok_or(BackendError::OutOfBounds("buffer range"))?;
                if end > bytes.len() {
                    return Err(BackendError::OutOfBounds("buffer range"));
                }
                Ok(bytes[offset..end].to_vec())
            }
            Some(_) => Err(BackendError::Unsupported("handle is not a buffer")),
            None => Err(BackendError::UnknownHandle(handle)),
        }
    }

    fn read_framebuffer(&mut self, handle: GpuHandle) -> Result<Vec<u8>, BackendError> {
        match self.allocations.get(&handle) {
            Some(Allocation::Framebuffer { pixels, .. }) => Ok(pixels.clone()),
            Some(_) => Err(BackendError::Unsupported("handle is not a framebuffer")),
            None => Err(BackendError::UnknownHandle(handle)),
        }
    }
}
