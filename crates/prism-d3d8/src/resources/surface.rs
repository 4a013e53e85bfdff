//! 2D surfaces: standalone targets and views into parent objects.
//!
//! A surface is either storage of its own (render target, depth-stencil,
//! image surface) or a counted view into a cube texture face or a swap
//! chain back buffer. Views delegate locking to their parent; back buffers
//! are never lockable.

use std::sync::{Arc, Mutex, Weak};

use prism_gpu::{GpuHandle, TextureStorageDesc};
use tracing::debug;

use crate::device::DeviceShared;
use crate::dirty::{DirtyState, DirtyTracker, MarkOutcome};
use crate::error::{D3dError, D3dResult};
use crate::pool::Pool;
use crate::refcount::{DestroyLatch, InterfaceId, RefCount};
use crate::registry::{PoolResource, ResourceId};
use crate::resources::lock::{copy_box_in, copy_box_out, LockBacking, LockGuard};
use crate::resources::texture::{to_texture_region, CubeFace, CubeTexture};
use crate::resources::{impl_refcounted, ResourceRef};
use crate::swapchain::SwapChainShared;
use crate::types::{Box3, Format, LockFlags, Rect, UsageFlags};

/// Shape of a surface, retained verbatim for reset recreation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: UsageFlags,
    pub pool: Pool,
}

impl SurfaceDesc {
    fn bounds(&self) -> Box3 {
        Box3::whole(self.width, self.height, 1)
    }

    fn shadow_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_texel() as usize
    }

    fn storage_desc(&self) -> TextureStorageDesc {
        TextureStorageDesc {
            width: self.width,
            height: self.height,
            depth: 1,
            layers: 1,
            levels: 1,
            bytes_per_texel: self.format.bytes_per_texel(),
            render_target: self
                .usage
                .intersects(UsageFlags::RENDER_TARGET | UsageFlags::DEPTH_STENCIL),
        }
    }
}

#[derive(Debug)]
struct SurfaceCpu {
    shadow: Vec<u8>,
    locked: bool,
    dirty: Option<DirtyTracker>,
}

#[derive(Debug)]
enum SurfaceBacking {
    /// The surface owns its storage and participates in reset.
    Owned {
        handle: Mutex<Option<GpuHandle>>,
        cpu: Mutex<SurfaceCpu>,
    },
    /// View of one cube face level; the texture owns the storage.
    TextureFace {
        texture: CubeTexture,
        face: CubeFace,
        level: u32,
    },
    /// View of a swap-chain buffer; the chain owns the storage.
    BackBuffer {
        chain: Weak<SwapChainShared>,
        index: u32,
    },
}

#[derive(Debug)]
pub(crate) struct SurfaceInner {
    id: ResourceId,
    device: Arc<DeviceShared>,
    pub(crate) refs: RefCount,
    latch: DestroyLatch,
    desc: SurfaceDesc,
    backing: SurfaceBacking,
}

impl SurfaceInner {
    fn destroy(&self) {
        if !self.latch.arm() {
            return;
        }
        if let SurfaceBacking::Owned { handle, .. } = &self.backing {
            self.device.registry().unregister(self.id);
            if let Some(handle) = handle.lock().expect("surface handle poisoned").take() {
                self.device
                    .executor()
                    .submit(move |backend| backend.destroy(handle));
            }
            self.device.stats().inc_resources_destroyed();
        }
    }

    fn lock_owned(
        self: &Arc<Self>,
        rect: Option<Rect>,
        flags: LockFlags,
    ) -> D3dResult<LockGuard> {
        self.device.ensure_not_lost()?;
        if !self.desc.pool.has_cpu_shadow() {
            return Err(D3dError::InvalidCall);
        }
        if flags.contains(LockFlags::READ_ONLY)
            && flags.intersects(LockFlags::DISCARD | LockFlags::NO_OVERWRITE)
        {
            return Err(D3dError::InvalidCall);
        }

        let bounds = self.desc.bounds();
        let region = match rect {
            None => bounds,
            Some(rect) => {
                let region = Box3::from_rect(rect);
                region.validate()?;
                let clamped = region.clamped_to(&bounds);
                if clamped.is_empty() {
                    return Err(D3dError::InvalidCall);
                }
                clamped
            }
        };

        let SurfaceBacking::Owned { cpu, .. } = &self.backing else {
            return Err(D3dError::InvalidCall);
        };
        let bpt = self.desc.format.bytes_per_texel();
        let row_pitch = region.width() * bpt;
        let slice_pitch = row_pitch * region.height();
        let bytes = {
            let mut cpu = cpu.lock().expect("surface cpu state poisoned");
            if cpu.locked {
                return Err(D3dError::InvalidCall);
            }
            cpu.locked = true;
            if flags.contains(LockFlags::DISCARD)
                && self.desc.usage.contains(UsageFlags::DYNAMIC)
            {
                vec![0u8; slice_pitch as usize]
            } else {
                copy_box_out(
                    &cpu.shadow,
                    (self.desc.width, self.desc.height, 1),
                    bpt,
                    &region,
                )
            }
        };

        Ok(LockGuard::new(
            Arc::clone(self) as Arc<dyn LockBacking>,
            0,
            region,
            row_pitch,
            slice_pitch,
            flags,
            bytes,
        ))
    }

    /// Upload pending dirty regions from the shadow (managed surfaces).
    fn flush_dirty(&self) -> D3dResult<()> {
        let SurfaceBacking::Owned { handle, cpu } = &self.backing else {
            return Ok(());
        };
        let handle = *handle.lock().expect("surface handle poisoned");
        let mut cpu = cpu.lock().expect("surface cpu state poisoned");
        let SurfaceCpu {
            shadow,
            dirty: Some(tracker),
            ..
        } = &mut *cpu
        else {
            return Ok(());
        };
        let pending = tracker.take(0);
        let Some(handle) = handle else {
            return Ok(());
        };
        let boxes = match pending {
            DirtyState::Clean => return Ok(()),
            DirtyState::Whole => vec![self.desc.bounds()],
            DirtyState::Boxes(boxes) => boxes,
        };
        let extent = (self.desc.width, self.desc.height, 1);
        let bpt = self.desc.format.bytes_per_texel();
        for region in boxes {
            let bytes = copy_box_out(shadow, extent, bpt, &region);
            let row_pitch = region.width() * bpt;
            let tex_region = to_texture_region(&region);
            self.device.executor().call(move |backend| {
                backend.upload_texture(handle, 0, tex_region, row_pitch, &bytes)
            })?;
            self.device.stats().inc_dirty_flush_uploads();
        }
        Ok(())
    }
}

impl LockBacking for SurfaceInner {
    fn finish_unlock(
        &self,
        _subresource: u32,
        region: Box3,
        bytes: &[u8],
        flags: LockFlags,
    ) -> D3dResult<()> {
        if let SurfaceBacking::Owned { cpu, .. } = &self.backing {
            let mut cpu = cpu.lock().expect("surface cpu state poisoned");
            let bpt = self.desc.format.bytes_per_texel();
            let SurfaceCpu { shadow, dirty, locked } = &mut *cpu;
            copy_box_in(
                shadow,
                (self.desc.width, self.desc.height, 1),
                bpt,
                &region,
                bytes,
            );
            if !flags.contains(LockFlags::NO_DIRTY_UPDATE) {
                if let Some(tracker) = dirty.as_mut() {
                    if let Ok(MarkOutcome::Degraded) = tracker.mark(0, Some(region)) {
                        self.device.stats().inc_dirty_degradations();
                    }
                }
            }
            *locked = false;
        }
        Ok(())
    }

    fn abandon_lock(&self, _subresource: u32) {
        if let SurfaceBacking::Owned { cpu, .. } = &self.backing {
            cpu.lock().expect("surface cpu state poisoned").locked = false;
        }
    }

    fn kind(&self) -> &'static str {
        "surface"
    }
}

impl PoolResource for SurfaceInner {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn pool(&self) -> Pool {
        self.desc.pool
    }

    fn kind(&self) -> &'static str {
        "surface"
    }

    fn release_gpu_storage(&self) {
        if let SurfaceBacking::Owned { handle, .. } = &self.backing {
            if let Some(handle) = handle.lock().expect("surface handle poisoned").take() {
                debug!(id = self.id.get(), %handle, "releasing surface storage");
                self.device
                    .executor()
                    .submit(move |backend| backend.destroy(handle));
            }
        }
    }

    fn recreate_gpu_storage(&self) -> D3dResult<()> {
        let SurfaceBacking::Owned { handle, .. } = &self.backing else {
            return Ok(());
        };
        if !self.desc.pool.has_gpu_handle() {
            return Ok(());
        }
        let storage = self.desc.storage_desc();
        let new = self
            .device
            .executor()
            .call(move |backend| backend.create_texture(&storage))?;
        debug!(id = self.id.get(), %new, "recreated surface storage");
        *handle.lock().expect("surface handle poisoned") = Some(new);
        Ok(())
    }

    fn restore_from_shadow(&self) -> D3dResult<()> {
        if !self.desc.pool.recreate_fast_path() {
            return Ok(());
        }
        if let SurfaceBacking::Owned { cpu, .. } = &self.backing {
            let mut cpu = cpu.lock().expect("surface cpu state poisoned");
            if let Some(tracker) = cpu.dirty.as_mut() {
                tracker.mark_all_whole();
            }
        }
        self.flush_dirty()
    }
}

/// A single 2D plane of pixels.
#[derive(Debug)]
pub struct Surface {
    pub(crate) inner: Arc<SurfaceInner>,
}

impl_refcounted!(Surface);

impl Surface {
    /// Standalone surface owning its storage; registered for reset.
    pub(crate) fn new_owned(device: &Arc<DeviceShared>, desc: SurfaceDesc) -> D3dResult<Surface> {
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
        let shadow = if desc.pool.has_cpu_shadow() {
            vec![0u8; desc.shadow_bytes()]
        } else {
            Vec::new()
        };
        let dirty = desc
            .pool
            .tracks_dirty()
            .then(|| DirtyTracker::new(std::iter::once(desc.bounds())));
        let inner = Arc::new(SurfaceInner {
            id: device.allocate_resource_id(),
            device: Arc::clone(device),
            refs: RefCount::new(),
            latch: DestroyLatch::new(),
            desc,
            backing: SurfaceBacking::Owned {
                handle: Mutex::new(handle),
                cpu: Mutex::new(SurfaceCpu {
                    shadow,
                    locked: false,
                    dirty,
                }),
            },
        });
        let weak = Arc::downgrade(&inner);
        device.registry().register(inner.id, weak);
        device.stats().inc_resources_created();
        Ok(Surface { inner })
    }

    /// View of one cube face level, holding a counted texture reference.
    pub(crate) fn new_texture_face(texture: CubeTexture, face: CubeFace, level: u32) -> Surface {
        let tex_desc = *texture.inner.desc();
        let (width, height, _) = tex_desc.level_extent(level);
        let device = Arc::clone(texture.inner.device());
        Surface {
            inner: Arc::new(SurfaceInner {
                id: device.allocate_resource_id(),
                device,
                refs: RefCount::new(),
                latch: DestroyLatch::new(),
                desc: SurfaceDesc {
                    width,
                    height,
                    format: tex_desc.format,
                    usage: tex_desc.usage,
                    pool: tex_desc.pool,
                },
                backing: SurfaceBacking::TextureFace {
                    texture,
                    face,
                    level,
                },
            }),
        }
    }

    /// View of one swap-chain buffer. Not lockable; the chain owns storage.
    pub(crate) fn new_back_buffer(
        device: &Arc<DeviceShared>,
        chain: Weak<SwapChainShared>,
        index: u32,
        width: u32,
        height: u32,
        format: Format,
    ) -> Surface {
        Surface {
            inner: Arc::new(SurfaceInner {
                id: device.allocate_resource_id(),
                device: Arc::clone(device),
                refs: RefCount::new(),
                latch: DestroyLatch::new(),
                desc: SurfaceDesc {
                    width,
                    height,
                    format,
                    usage: UsageFlags::RENDER_TARGET,
                    pool: Pool::Default,
                },
                backing: SurfaceBacking::BackBuffer { chain, index },
            }),
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn desc(&self) -> SurfaceDesc {
        self.inner.desc
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn format(&self) -> Format {
        self.inner.desc.format
    }

    pub fn pool(&self) -> Pool {
        self.inner.desc.pool
    }

    /// GPU identity of whatever storage backs this surface right now.
    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        match &self.inner.backing {
            SurfaceBacking::Owned { handle, .. } => {
                *handle.lock().expect("surface handle poisoned")
            }
            SurfaceBacking::TextureFace { texture, .. } => texture.gpu_handle(),
            SurfaceBacking::BackBuffer { chain, index } => {
                chain.upgrade().and_then(|chain| chain.buffer_handle(*index))
            }
        }
    }

    /// Lock a rectangle; `None` locks the whole surface.
    pub fn lock_rect(&self, rect: Option<Rect>, flags: LockFlags) -> D3dResult<LockGuard> {
        match &self.inner.backing {
            SurfaceBacking::Owned { .. } => self.inner.lock_owned(rect, flags),
            SurfaceBacking::TextureFace {
                texture,
                face,
                level,
            } => texture.inner.lock_subresource(
                face.index() * texture.levels() + level,
                rect.map(Box3::from_rect),
                flags,
            ),
            SurfaceBacking::BackBuffer { .. } => Err(D3dError::InvalidCall),
        }
    }

    pub fn query_interface(&self, id: InterfaceId) -> D3dResult<ResourceRef> {
        match id {
            InterfaceId::Resource | InterfaceId::Surface => {
                Ok(ResourceRef::Surface(self.clone()))
            }
            _ => Err(D3dError::NoInterface),
        }
    }
}
