//! Texture resources: 2D, cube and volume.
//!
//! All three share one inner representation; the wrappers expose the
//! type-specific lock and dirty entry points and the capability sets a
//! `query_interface` can reach.

use std::sync::{Arc, Mutex};

use prism_gpu::{GpuHandle, TextureRegion, TextureStorageDesc};
use tracing::debug;

use crate::device::DeviceShared;
use crate::dirty::{DirtyState, DirtyTracker, MarkOutcome};
use crate::error::{D3dError, D3dResult};
use crate::pool::Pool;
use crate::refcount::{DestroyLatch, InterfaceId, RefCount};
use crate::registry::{PoolResource, ResourceId};
use crate::resources::lock::{copy_box_in, copy_box_out, LockBacking, LockGuard};
use crate::resources::{impl_refcounted, ResourceRef};
use crate::types::{Box3, Format, LockFlags, Rect, UsageFlags};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TextureKind {
    Tex2d,
    Cube,
    Volume,
}

/// Immutable creation-time shape, retained verbatim for reset recreation.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub levels: u32,
    pub format: Format,
    pub usage: UsageFlags,
    pub pool: Pool,
}

impl TextureDesc {
    pub(crate) fn layers(&self) -> u32 {
        match self.kind {
            TextureKind::Cube => 6,
            _ => 1,
        }
    }

    pub(crate) fn subresource_count(&self) -> u32 {
        self.layers() * self.levels
    }

    pub(crate) fn level_extent(&self, level: u32) -> (u32, u32, u32) {
        (
            (self.width >> level).max(1),
            (self.height >> level).max(1),
            (self.depth >> level).max(1),
        )
    }

    /// Extent of a subresource; only the level component matters since all
    /// layers of a level share dimensions.
    pub(crate) fn subresource_extent(&self, subresource: u32) -> (u32, u32, u32) {
        self.level_extent(subresource % self.levels)
    }

    pub(crate) fn subresource_bytes(&self, subresource: u32) -> usize {
        let (w, h, d) = self.subresource_extent(subresource);
        w as usize * h as usize * d as usize * self.format.bytes_per_texel() as usize
    }

    fn storage_desc(&self) -> TextureStorageDesc {
        TextureStorageDesc {
            width: self.width,
            height: self.height,
            depth: self.depth,
            layers: self.layers(),
            levels: self.levels,
            bytes_per_texel: self.format.bytes_per_texel(),
            render_target: self
                .usage
                .intersects(UsageFlags::RENDER_TARGET | UsageFlags::DEPTH_STENCIL),
        }
    }

    fn subresource_bounds(&self) -> impl Iterator<Item = Box3> + '_ {
        (0..self.subresource_count()).map(|sub| {
            let (w, h, d) = self.subresource_extent(sub);
            Box3::whole(w, h, d)
        })
    }
}

/// Mutable CPU-side state, guarded together so lock bookkeeping and dirty
/// tracking stay consistent.
#[derive(Debug)]
struct TextureCpu {
    /// One tightly packed shadow per subresource; empty vectors for pools
    /// without a CPU copy.
    shadows: Vec<Vec<u8>>,
    locked: Vec<bool>,
    dirty: Option<DirtyTracker>,
}

#[derive(Debug)]
pub(crate) struct TextureInner {
    id: ResourceId,
    device: Arc<DeviceShared>,
    pub(crate) refs: RefCount,
    latch: DestroyLatch,
    desc: TextureDesc,
    handle: Mutex<Option<GpuHandle>>,
    cpu: Mutex<TextureCpu>,
}

impl TextureInner {
    /// Allocate GPU storage (when the pool has any), build the CPU side and
    /// register. All-or-nothing: a failed allocation leaves no trace.
    pub(crate) fn create(
        device: &Arc<DeviceShared>,
        desc: TextureDesc,
    ) -> D3dResult<Arc<TextureInner>> {
        let handle = if desc.pool.has_gpu_handle() {
            let storage = desc.storage_desc();
            Some(
                device
                    .executor()
                    .call(move |backend| backend.create_texture(&storage))?,
            )
        } else {
            None
        };

        let shadows = if desc.pool.has_cpu_shadow() {
            (0..desc.subresource_count())
                .map(|sub| vec![0u8; desc.subresource_bytes(sub)])
                .collect()
        } else {
            vec![Vec::new(); desc.subresource_count() as usize]
        };
        let dirty = desc
            .pool
            .tracks_dirty()
            .then(|| DirtyTracker::new(desc.subresource_bounds()));

        let inner = Arc::new(TextureInner {
            id: device.allocate_resource_id(),
            device: Arc::clone(device),
            refs: RefCount::new(),
            latch: DestroyLatch::new(),
            desc,
            handle: Mutex::new(handle),
            cpu: Mutex::new(TextureCpu {
                shadows,
                locked: vec![false; desc.subresource_count() as usize],
                dirty,
            }),
        });
        let weak = Arc::downgrade(&inner);
        device.registry().register(inner.id, weak);
        device.stats().inc_resources_created();
        Ok(inner)
    }

    pub(crate) fn destroy(&self) {
        if !self.latch.arm() {
            return;
        }
        self.device.registry().unregister(self.id);
        if let Some(handle) = self.handle.lock().expect("texture handle poisoned").take() {
            self.device
                .executor()
                .submit(move |backend| backend.destroy(handle));
        }
        self.device.stats().inc_resources_destroyed();
    }

    pub(crate) fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub(crate) fn device(&self) -> &Arc<DeviceShared> {
        &self.device
    }

    pub(crate) fn gpu_handle(&self) -> Option<GpuHandle> {
        *self.handle.lock().expect("texture handle poisoned")
    }

    /// Lock one subresource. `region == None` locks the whole extent.
    pub(crate) fn lock_subresource(
        self: &Arc<Self>,
        subresource: u32,
        region: Option<Box3>,
        flags: LockFlags,
    ) -> D3dResult<LockGuard> {
        self.device.ensure_not_lost()?;
        if subresource >= self.desc.subresource_count() {
            return Err(D3dError::InvalidCall);
        }
        if flags.contains(LockFlags::READ_ONLY)
            && flags.intersects(LockFlags::DISCARD | LockFlags::NO_OVERWRITE)
        {
            return Err(D3dError::InvalidCall);
        }

        let (w, h, d) = self.desc.subresource_extent(subresource);
        let bounds = Box3::whole(w, h, d);
        let region = match region {
            None => bounds,
            Some(region) => {
                region.validate()?;
                let clamped = region.clamped_to(&bounds);
                if clamped.is_empty() {
                    return Err(D3dError::InvalidCall);
                }
                clamped
            }
        };

        {
            let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
            if cpu.locked[subresource as usize] {
                return Err(D3dError::InvalidCall);
            }
            cpu.locked[subresource as usize] = true;
        }

        let bpt = self.desc.format.bytes_per_texel();
        let row_pitch = region.width() * bpt;
        let slice_pitch = row_pitch * region.height();
        let discard =
            flags.contains(LockFlags::DISCARD) && self.desc.usage.contains(UsageFlags::DYNAMIC);

        let bytes = if discard {
            Ok(vec![0u8; slice_pitch as usize * region.depth() as usize])
        } else if self.desc.pool.has_cpu_shadow() {
            let cpu = self.cpu.lock().expect("texture cpu state poisoned");
            Ok(copy_box_out(
                &cpu.shadows[subresource as usize],
                (w, h, d),
                bpt,
                &region,
            ))
        } else {
            self.read_back(subresource, region)
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
                cpu.locked[subresource as usize] = false;
                return Err(err);
            }
        };

        Ok(LockGuard::new(
            Arc::clone(self) as Arc<dyn LockBacking>,
            subresource,
            region,
            row_pitch,
            slice_pitch,
            flags,
            bytes,
        ))
    }

    /// Default-pool staging read: drain in-flight work, then read the
    /// current GPU contents.
    fn read_back(&self, subresource: u32, region: Box3) -> D3dResult<Vec<u8>> {
        let handle = self.gpu_handle().ok_or(D3dError::InvalidCall)?;
        self.device.executor().drain();
        let tex_region = to_texture_region(&region);
        Ok(self
            .device
            .executor()
            .call(move |backend| backend.read_texture(handle, subresource, tex_region))?)
    }

    /// Record an application-declared dirty region on a subresource.
    pub(crate) fn add_dirty(&self, subresource: u32, region: Option<Box3>) -> D3dResult<()> {
        self.device.ensure_not_lost()?;
        if subresource >= self.desc.subresource_count() {
            return Err(D3dError::InvalidCall);
        }
        if let Some(region) = &region {
            region.validate()?;
        }
        let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
        let Some(tracker) = cpu.dirty.as_mut() else {
            // Pools without tracking accept and ignore the call.
            return Ok(());
        };
        let outcome = tracker.mark(subresource as usize, region)?;
        if outcome == MarkOutcome::Degraded {
            self.device.stats().inc_dirty_degradations();
        }
        Ok(())
    }

    /// Upload every pending dirty region from the shadow, leaving the
    /// tracker clean. A second flush with no new marks uploads nothing.
    pub(crate) fn flush_dirty(&self) -> D3dResult<()> {
        let Some(handle) = self.gpu_handle() else {
            // CPU-only pools just clear their pending state.
            let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
            if let Some(tracker) = cpu.dirty.as_mut() {
                for sub in 0..tracker.subresource_count() {
                    tracker.take(sub);
                }
            }
            return Ok(());
        };

        let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
        let TextureCpu {
            shadows,
            dirty: Some(tracker),
            ..
        } = &mut *cpu
        else {
            return Ok(());
        };

        for sub in 0..tracker.subresource_count() {
            let pending = tracker.take(sub);
            let boxes = match pending {
                DirtyState::Clean => continue,
                DirtyState::Whole => {
                    let (w, h, d) = self.desc.subresource_extent(sub as u32);
                    vec![Box3::whole(w, h, d)]
                }
                DirtyState::Boxes(boxes) => boxes,
            };
            let extent = self.desc.subresource_extent(sub as u32);
            let bpt = self.desc.format.bytes_per_texel();
            for region in boxes {
                let bytes = copy_box_out(&shadows[sub], extent, bpt, &region);
                let row_pitch = region.width() * bpt;
                let tex_region = to_texture_region(&region);
                let sub = sub as u32;
                self.device.executor().call(move |backend| {
                    backend.upload_texture(handle, sub, tex_region, row_pitch, &bytes)
                })?;
                self.device.stats().inc_dirty_flush_uploads();
            }
        }
        Ok(())
    }
}

pub(crate) fn to_texture_region(region: &Box3) -> TextureRegion {
    TextureRegion {
        x: region.left as u32,
        y: region.top as u32,
        z: region.front as u32,
        width: region.width(),
        height: region.height(),
        depth: region.depth(),
    }
}

impl LockBacking for TextureInner {
    fn finish_unlock(
        &self,
        subresource: u32,
        region: Box3,
        bytes: &[u8],
        flags: LockFlags,
    ) -> D3dResult<()> {
        let result = if self.desc.pool.has_cpu_shadow() {
            let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
            let extent = self.desc.subresource_extent(subresource);
            let bpt = self.desc.format.bytes_per_texel();
            let TextureCpu { shadows, dirty, .. } = &mut *cpu;
            copy_box_in(&mut shadows[subresource as usize], extent, bpt, &region, bytes);
            if !flags.contains(LockFlags::NO_DIRTY_UPDATE) {
                if let Some(tracker) = dirty.as_mut() {
                    match tracker.mark(subresource as usize, Some(region)) {
                        Ok(MarkOutcome::Degraded) => {
                            self.device.stats().inc_dirty_degradations()
                        }
                        _ => {}
                    }
                }
            }
            Ok(())
        } else {
            match self.gpu_handle() {
                Some(handle) => {
                    let bpt = self.desc.format.bytes_per_texel();
                    let row_pitch = region.width() * bpt;
                    let tex_region = to_texture_region(&region);
                    let bytes = bytes.to_vec();
                    self.device
                        .executor()
                        .call(move |backend| {
                            backend.upload_texture(handle, subresource, tex_region, row_pitch, &bytes)
                        })
                        .map_err(D3dError::from)
                }
                // Storage went away mid-lock (device loss); the write is dropped.
                None => Ok(()),
            }
        };
        self.abandon_lock(subresource);
        result
    }

    fn abandon_lock(&self, subresource: u32) {
        let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
        cpu.locked[subresource as usize] = false;
    }

    fn kind(&self) -> &'static str {
        match self.desc.kind {
            TextureKind::Tex2d => "texture2d",
            TextureKind::Cube => "cube_texture",
            TextureKind::Volume => "volume_texture",
        }
    }
}

impl PoolResource for TextureInner {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn pool(&self) -> Pool {
        self.desc.pool
    }

    fn kind(&self) -> &'static str {
        LockBacking::kind(self)
    }

    fn release_gpu_storage(&self) {
        if let Some(handle) = self.handle.lock().expect("texture handle poisoned").take() {
            debug!(id = self.id.get(), %handle, "releasing texture storage");
            self.device
                .executor()
                .submit(move |backend| backend.destroy(handle));
        }
    }

    fn recreate_gpu_storage(&self) -> D3dResult<()> {
        if !self.desc.pool.has_gpu_handle() {
            return Ok(());
        }
        let storage = self.desc.storage_desc();
        let handle = self
            .device
            .executor()
            .call(move |backend| backend.create_texture(&storage))?;
        debug!(id = self.id.get(), %handle, "recreated texture storage");
        *self.handle.lock().expect("texture handle poisoned") = Some(handle);
        Ok(())
    }

    fn restore_from_shadow(&self) -> D3dResult<()> {
        if !self.desc.pool.recreate_fast_path() {
            return Ok(());
        }
        {
            let mut cpu = self.cpu.lock().expect("texture cpu state poisoned");
            if let Some(tracker) = cpu.dirty.as_mut() {
                tracker.mark_all_whole();
            }
        }
        self.flush_dirty()
    }
}

/// Level shape reported by the `*_desc` accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: Format,
}

/// Face of a cube texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(self) -> u32 {
        match self {
            CubeFace::PositiveX => 0,
            CubeFace::NegativeX => 1,
            CubeFace::PositiveY => 2,
            CubeFace::NegativeY => 3,
            CubeFace::PositiveZ => 4,
            CubeFace::NegativeZ => 5,
        }
    }
}

/// A 2D mip-mapped texture.
#[derive(Debug)]
pub struct Texture2d {
    pub(crate) inner: Arc<TextureInner>,
}

impl_refcounted!(Texture2d);

impl Texture2d {
    pub(crate) fn from_inner(inner: Arc<TextureInner>) -> Self {
        Self { inner }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn levels(&self) -> u32 {
        self.inner.desc.levels
    }

    pub fn format(&self) -> Format {
        self.inner.desc.format
    }

    pub fn usage(&self) -> UsageFlags {
        self.inner.desc.usage
    }

    pub fn pool(&self) -> Pool {
        self.inner.desc.pool
    }

    /// Current GPU-side identity; `None` for CPU-only pools and while the
    /// device is torn down between reset steps.
    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.inner.gpu_handle()
    }

    pub fn level_desc(&self, level: u32) -> D3dResult<LevelDesc> {
        if level >= self.levels() {
            return Err(D3dError::InvalidCall);
        }
        let (width, height, depth) = self.inner.desc.level_extent(level);
        Ok(LevelDesc {
            width,
            height,
            depth,
            format: self.format(),
        })
    }

    pub fn lock_rect(
        &self,
        level: u32,
        rect: Option<Rect>,
        flags: LockFlags,
    ) -> D3dResult<LockGuard> {
        self.inner
            .lock_subresource(level, rect.map(Box3::from_rect), flags)
    }

    /// Declare a region of the base level dirty (shadowed pools).
    pub fn add_dirty_rect(&self, rect: Option<Rect>) -> D3dResult<()> {
        self.inner.add_dirty(0, rect.map(Box3::from_rect))
    }

    pub fn query_interface(&self, id: InterfaceId) -> D3dResult<ResourceRef> {
        match id {
            InterfaceId::Resource | InterfaceId::BaseTexture | InterfaceId::Texture2d => {
                Ok(ResourceRef::Texture2d(self.clone()))
            }
            _ => Err(D3dError::NoInterface),
        }
    }
}

/// A six-faced cube texture.
#[derive(Debug)]
pub struct CubeTexture {
    pub(crate) inner: Arc<TextureInner>,
}

impl_refcounted!(CubeTexture);

impl CubeTexture {
    pub(crate) fn from_inner(inner: Arc<TextureInner>) -> Self {
        Self { inner }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn edge_length(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn levels(&self) -> u32 {
        self.inner.desc.levels
    }

    pub fn format(&self) -> Format {
        self.inner.desc.format
    }

    pub fn pool(&self) -> Pool {
        self.inner.desc.pool
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.inner.gpu_handle()
    }

    fn subresource(&self, face: CubeFace, level: u32) -> u32 {
        face.index() * self.levels() + level
    }

    pub fn lock_face_rect(
        &self,
        face: CubeFace,
        level: u32,
        rect: Option<Rect>,
        flags: LockFlags,
    ) -> D3dResult<LockGuard> {
        if level >= self.levels() {
            return Err(D3dError::InvalidCall);
        }
        self.inner.lock_subresource(
            self.subresource(face, level),
            rect.map(Box3::from_rect),
            flags,
        )
    }

    /// Declare a region of one face's base level dirty.
    pub fn add_dirty_rect(&self, face: CubeFace, rect: Option<Rect>) -> D3dResult<()> {
        self.inner
            .add_dirty(self.subresource(face, 0), rect.map(Box3::from_rect))
    }

    /// A counted surface view of one face level. The surface holds its own
    /// reference on this texture, so releasing the texture wrapper while
    /// face surfaces are alive keeps the storage valid.
    pub fn face_surface(&self, face: CubeFace, level: u32) -> D3dResult<Surface> {
        if level >= self.levels() {
            return Err(D3dError::InvalidCall);
        }
        Ok(Surface::new_texture_face(self.clone(), face, level))
    }

    pub fn query_interface(&self, id: InterfaceId) -> D3dResult<ResourceRef> {
        match id {
            InterfaceId::Resource | InterfaceId::BaseTexture | InterfaceId::CubeTexture => {
                Ok(ResourceRef::CubeTexture(self.clone()))
            }
            _ => Err(D3dError::NoInterface),
        }
    }
}

/// A 3D mip-mapped texture.
#[derive(Debug)]
pub struct VolumeTexture {
    pub(crate) inner: Arc<TextureInner>,
}

impl_refcounted!(VolumeTexture);

impl VolumeTexture {
    pub(crate) fn from_inner(inner: Arc<TextureInner>) -> Self {
        Self { inner }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn depth(&self) -> u32 {
        self.inner.desc.depth
    }

    pub fn levels(&self) -> u32 {
        self.inner.desc.levels
    }

    pub fn format(&self) -> Format {
        self.inner.desc.format
    }

    pub fn pool(&self) -> Pool {
        self.inner.desc.pool
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.inner.gpu_handle()
    }

    pub fn level_desc(&self, level: u32) -> D3dResult<LevelDesc> {
        if level >= self.levels() {
            return Err(D3dError::InvalidCall);
        }
        let (width, height, depth) = self.inner.desc.level_extent(level);
        Ok(LevelDesc {
            width,
            height,
            depth,
            format: self.format(),
        })
    }

    pub fn lock_box(
        &self,
        level: u32,
        region: Option<Box3>,
        flags: LockFlags,
    ) -> D3dResult<LockGuard> {
        self.inner.lock_subresource(level, region, flags)
    }

    /// Declare a region of the base level dirty.
    pub fn add_dirty_box(&self, region: Option<Box3>) -> D3dResult<()> {
        self.inner.add_dirty(0, region)
    }

    pub fn query_interface(&self, id: InterfaceId) -> D3dResult<ResourceRef> {
        match id {
            InterfaceId::Resource | InterfaceId::BaseTexture | InterfaceId::VolumeTexture => {
                Ok(ResourceRef::VolumeTexture(self.clone()))
            }
            _ => Err(D3dError::NoInterface),
        }
    }
}

use crate::resources::surface::Surface;
