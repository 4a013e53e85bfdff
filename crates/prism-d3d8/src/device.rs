//! Device lifecycle: cooperative state machine, resource factories,
//! transient bind state and the reset sequence.
//!
//! The device owns the GPU executor, the resource registry and the implicit
//! swap chain. Children hold counted references back to the device; the
//! swap chains reach it through weak back-references so the wrapper's last
//! release can tear the whole graph down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use prism_gpu::{BlitRequest, BlitTarget, GpuExecutor, WindowId};
use tracing::{debug, warn};

use crate::error::{D3dError, D3dResult};
use crate::pool::Pool;
use crate::refcount::{DestroyLatch, RefCount};
use crate::registry::{PoolResource, ResourceId, ResourceRegistry};
use crate::resources::buffer::{IndexBuffer, IndexBufferDesc, VertexBuffer, VertexBufferDesc};
use crate::resources::impl_refcounted;
use crate::resources::surface::{Surface, SurfaceDesc};
use crate::resources::texture::{
    CubeTexture, Texture2d, TextureDesc, TextureInner, TextureKind, VolumeTexture,
};
use crate::stats::{DeviceStats, DeviceStatsSnapshot};
use crate::swapchain::{SwapChain, SwapChainShared};
use crate::types::{
    full_mip_levels, Format, IndexFormat, PresentParams, PrimitiveType, Rect, UsageFlags,
    Viewport,
};

pub const MAX_TEXTURE_STAGES: usize = 8;
pub const MAX_STREAMS: usize = 16;

/// Where the device currently stands in the loss/recovery cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooperativeState {
    /// Rendering and presentation proceed normally.
    Operational,
    /// The GPU context is gone; most calls fail or fall silent.
    Lost,
    /// Hardware is back; a `reset` can restore operation.
    NotReset,
}

/// A texture of any shape bound to a sampler stage.
#[derive(Clone, Debug)]
pub enum TextureBinding {
    Texture2d(Texture2d),
    CubeTexture(CubeTexture),
    VolumeTexture(VolumeTexture),
}

impl TextureBinding {
    fn flush_dirty(&self) -> D3dResult<()> {
        match self {
            TextureBinding::Texture2d(t) => t.inner.flush_dirty(),
            TextureBinding::CubeTexture(t) => t.inner.flush_dirty(),
            TextureBinding::VolumeTexture(t) => t.inner.flush_dirty(),
        }
    }
}

/// Transient render state. Dropped wholesale on reset.
#[derive(Debug)]
struct BindState {
    textures: [Option<TextureBinding>; MAX_TEXTURE_STAGES],
    streams: [Option<VertexBuffer>; MAX_STREAMS],
    indices: Option<IndexBuffer>,
    viewport: Viewport,
}

impl BindState {
    fn fresh(width: u32, height: u32) -> Self {
        Self {
            textures: std::array::from_fn(|_| None),
            streams: std::array::from_fn(|_| None),
            indices: None,
            viewport: Viewport::full(width, height),
        }
    }
}

pub(crate) struct DeviceShared {
    executor: GpuExecutor,
    registry: ResourceRegistry,
    stats: DeviceStats,
    state: Mutex<CooperativeState>,
    params: Mutex<PresentParams>,
    next_resource_id: AtomicU64,
    blit: Mutex<Box<dyn BlitTarget>>,
    implicit_chain: Mutex<Option<SwapChain>>,
    extra_chains: Mutex<Vec<Weak<SwapChainShared>>>,
    bind: Mutex<BindState>,
    pub(crate) refs: RefCount,
    latch: DestroyLatch,
}

impl DeviceShared {
    pub(crate) fn executor(&self) -> &GpuExecutor {
        &self.executor
    }

    pub(crate) fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub(crate) fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub(crate) fn allocate_resource_id(&self) -> ResourceId {
        ResourceId(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }

    fn state(&self) -> CooperativeState {
        *self.state.lock().expect("device state poisoned")
    }

    fn set_state(&self, state: CooperativeState) {
        *self.state.lock().expect("device state poisoned") = state;
    }

    /// Creation, lock and dirty entry points refuse to run on a lost device.
    pub(crate) fn ensure_not_lost(&self) -> D3dResult<()> {
        if self.state() == CooperativeState::Lost {
            Err(D3dError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Present gating: `Ok(true)` proceed, `Ok(false)` drop silently.
    pub(crate) fn presentable(&self) -> D3dResult<bool> {
        match self.state() {
            CooperativeState::Operational => Ok(true),
            CooperativeState::Lost => Ok(false),
            CooperativeState::NotReset => Err(D3dError::DeviceNotReset),
        }
    }

    pub(crate) fn blit(&self, request: &BlitRequest) -> bool {
        self.blit.lock().expect("blit target poisoned").blit(request)
    }

    fn destroy(&self) {
        if !self.latch.arm() {
            return;
        }
        {
            let params = *self.params.lock().expect("device params poisoned");
            let mut bind = self.bind.lock().expect("device bind state poisoned");
            *bind = BindState::fresh(params.width, params.height);
        }
        self.extra_chains
            .lock()
            .expect("device chain list poisoned")
            .clear();
        // Dropping the implicit chain breaks the back-buffer reference cycle.
        *self
            .implicit_chain
            .lock()
            .expect("device chain poisoned") = None;
        self.executor.drain();
        debug!("device destroyed");
    }

    fn implicit(&self) -> D3dResult<SwapChain> {
        self.implicit_chain
            .lock()
            .expect("device chain poisoned")
            .clone()
            .ok_or(D3dError::InvalidCall)
    }

    /// Live additional chains, pruning dead entries on the way.
    fn live_extra_chains(&self) -> Vec<Arc<SwapChainShared>> {
        let mut chains = self.extra_chains.lock().expect("device chain list poisoned");
        let mut live = Vec::with_capacity(chains.len());
        chains.retain(|weak| match weak.upgrade() {
            Some(strong) => {
                live.push(strong);
                true
            }
            None => false,
        });
        live
    }

    /// Reset steps 4-5: swap chains first, then registered resources.
    fn reset_storage(
        &self,
        live: &[Arc<dyn PoolResource>],
        new_params: PresentParams,
    ) -> D3dResult<()> {
        if let Ok(chain) = self.implicit() {
            chain.inner.reset(new_params)?;
        }
        for chain in self.live_extra_chains() {
            let params = chain.params();
            chain.reset(params)?;
        }
        for resource in live {
            if resource.pool().destroyed_on_reset() {
                resource.recreate_gpu_storage()?;
            }
        }
        for resource in live {
            if resource.pool().recreate_fast_path() {
                resource.restore_from_shadow()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceShared")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish()
    }
}

/// The rendering device.
#[derive(Debug)]
pub struct Device {
    pub(crate) inner: Arc<DeviceShared>,
}

impl_refcounted!(Device);

impl Device {
    /// Bring up a device over `executor`, presenting through `blit`.
    /// Allocates the implicit swap chain before returning.
    pub fn create(
        executor: GpuExecutor,
        blit: Box<dyn BlitTarget>,
        params: PresentParams,
    ) -> D3dResult<Device> {
        params.validate()?;
        let shared = Arc::new(DeviceShared {
            executor,
            registry: ResourceRegistry::new(),
            stats: DeviceStats::new(),
            state: Mutex::new(CooperativeState::Operational),
            params: Mutex::new(params),
            next_resource_id: AtomicU64::new(1),
            blit: Mutex::new(blit),
            implicit_chain: Mutex::new(None),
            extra_chains: Mutex::new(Vec::new()),
            bind: Mutex::new(BindState::fresh(params.width, params.height)),
            refs: RefCount::new(),
            latch: DestroyLatch::new(),
        });
        let chain = SwapChainShared::create(&shared, params)?;
        *shared
            .implicit_chain
            .lock()
            .expect("device chain poisoned") = Some(SwapChain::from_inner(chain));
        debug!(
            width = params.width,
            height = params.height,
            "device created"
        );
        Ok(Device { inner: shared })
    }

    pub fn params(&self) -> PresentParams {
        *self.inner.params.lock().expect("device params poisoned")
    }

    pub fn stats(&self) -> DeviceStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn live_resources(&self) -> usize {
        self.inner.registry.live_count()
    }

    // --- cooperative state -------------------------------------------------

    /// Side-effect-free state query.
    pub fn query_state(&self) -> CooperativeState {
        self.inner.state()
    }

    /// Original-API shape of the state query.
    pub fn test_cooperative_level(&self) -> D3dResult<()> {
        match self.inner.state() {
            CooperativeState::Operational => Ok(()),
            CooperativeState::Lost => Err(D3dError::DeviceLost),
            CooperativeState::NotReset => Err(D3dError::DeviceNotReset),
        }
    }

    /// External notification that the GPU context is gone. No teardown
    /// happens here; resources keep their descriptors and shadows.
    pub fn notify_lost(&self) {
        let mut state = self.inner.state.lock().expect("device state poisoned");
        if *state != CooperativeState::Lost {
            debug!(from = ?*state, "device lost");
            *state = CooperativeState::Lost;
        }
    }

    /// External notification that the hardware can be reacquired.
    pub fn notify_hardware_ready(&self) {
        let mut state = self.inner.state.lock().expect("device state poisoned");
        if *state == CooperativeState::Lost {
            debug!("device ready for reset");
            *state = CooperativeState::NotReset;
        }
    }

    /// Rebuild pool-dependent storage under new presentation parameters.
    ///
    /// Valid from `NotReset` (recovery) and `Operational` (voluntary
    /// resize). Any storage failure mid-sequence leaves the device `Lost`;
    /// `notify_hardware_ready` plus a second `reset` may still recover it.
    pub fn reset(&self, new_params: PresentParams) -> D3dResult<()> {
        new_params.validate()?;
        if self.inner.state() == CooperativeState::Lost {
            return Err(D3dError::DeviceLost);
        }
        let shared = &self.inner;
        shared.stats.inc_resets_attempted();
        debug!(
            width = new_params.width,
            height = new_params.height,
            "device reset"
        );
        shared.executor.drain();

        let live = shared.registry.live();
        for resource in &live {
            if resource.pool().destroyed_on_reset() {
                resource.release_gpu_storage();
            }
        }
        *shared.params.lock().expect("device params poisoned") = new_params;

        match shared.reset_storage(&live, new_params) {
            Ok(()) => {
                let mut bind = shared.bind.lock().expect("device bind state poisoned");
                *bind = BindState::fresh(new_params.width, new_params.height);
                drop(bind);
                shared.set_state(CooperativeState::Operational);
                shared.stats.inc_resets_succeeded();
                Ok(())
            }
            Err(err) => {
                warn!(%err, "reset failed, device is lost");
                shared.set_state(CooperativeState::Lost);
                Err(err)
            }
        }
    }

    // --- factories ---------------------------------------------------------

    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        levels: u32,
        usage: UsageFlags,
        format: Format,
        pool: Pool,
    ) -> D3dResult<Texture2d> {
        self.inner.ensure_not_lost()?;
        let levels = validate_texture_shape(width, height, 1, levels, usage, format, pool)?;
        let inner = TextureInner::create(
            &self.inner,
            TextureDesc {
                kind: TextureKind::Tex2d,
                width,
                height,
                depth: 1,
                levels,
                format,
                usage,
                pool,
            },
        )?;
        Ok(Texture2d::from_inner(inner))
    }

    pub fn create_cube_texture(
        &self,
        edge_length: u32,
        levels: u32,
        usage: UsageFlags,
        format: Format,
        pool: Pool,
    ) -> D3dResult<CubeTexture> {
        self.inner.ensure_not_lost()?;
        let levels =
            validate_texture_shape(edge_length, edge_length, 1, levels, usage, format, pool)?;
        let inner = TextureInner::create(
            &self.inner,
            TextureDesc {
                kind: TextureKind::Cube,
                width: edge_length,
                height: edge_length,
                depth: 1,
                levels,
                format,
                usage,
                pool,
            },
        )?;
        Ok(CubeTexture::from_inner(inner))
    }

    pub fn create_volume_texture(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        levels: u32,
        usage: UsageFlags,
        format: Format,
        pool: Pool,
    ) -> D3dResult<VolumeTexture> {
        self.inner.ensure_not_lost()?;
        // Volumes cannot serve as render output.
        if usage.intersects(UsageFlags::RENDER_TARGET | UsageFlags::DEPTH_STENCIL) {
            return Err(D3dError::InvalidCall);
        }
        let levels = validate_texture_shape(width, height, depth, levels, usage, format, pool)?;
        let inner = TextureInner::create(
            &self.inner,
            TextureDesc {
                kind: TextureKind::Volume,
                width,
                height,
                depth,
                levels,
                format,
                usage,
                pool,
            },
        )?;
        Ok(VolumeTexture::from_inner(inner))
    }

    pub fn create_vertex_buffer(
        &self,
        size: u32,
        usage: UsageFlags,
        fvf: u32,
        pool: Pool,
    ) -> D3dResult<VertexBuffer> {
        VertexBuffer::create(
            &self.inner,
            VertexBufferDesc {
                size,
                usage,
                fvf,
                pool,
            },
        )
    }

    pub fn create_index_buffer(
        &self,
        size: u32,
        usage: UsageFlags,
        format: IndexFormat,
        pool: Pool,
    ) -> D3dResult<IndexBuffer> {
        IndexBuffer::create(
            &self.inner,
            IndexBufferDesc {
                size,
                usage,
                format,
                pool,
            },
        )
    }

    pub fn create_render_target(
        &self,
        width: u32,
        height: u32,
        format: Format,
    ) -> D3dResult<Surface> {
        self.inner.ensure_not_lost()?;
        if width == 0 || height == 0 {
            return Err(D3dError::InvalidCall);
        }
        if !format.is_render_target_capable() {
            return Err(D3dError::NotAvailable);
        }
        Surface::new_owned(
            &self.inner,
            SurfaceDesc {
                width,
                height,
                format,
                usage: UsageFlags::RENDER_TARGET,
                pool: Pool::Default,
            },
        )
    }

    pub fn create_depth_stencil_surface(
        &self,
        width: u32,
        height: u32,
        format: Format,
    ) -> D3dResult<Surface> {
        self.inner.ensure_not_lost()?;
        if width == 0 || height == 0 {
            return Err(D3dError::InvalidCall);
        }
        if !format.is_depth() {
            return Err(D3dError::NotAvailable);
        }
        Surface::new_owned(
            &self.inner,
            SurfaceDesc {
                width,
                height,
                format,
                usage: UsageFlags::DEPTH_STENCIL,
                pool: Pool::Default,
            },
        )
    }

    /// System-memory surface for CPU-side image work; any format goes.
    pub fn create_image_surface(
        &self,
        width: u32,
        height: u32,
        format: Format,
    ) -> D3dResult<Surface> {
        self.inner.ensure_not_lost()?;
        if width == 0 || height == 0 {
            return Err(D3dError::InvalidCall);
        }
        Surface::new_owned(
            &self.inner,
            SurfaceDesc {
                width,
                height,
                format,
                usage: UsageFlags::empty(),
                pool: Pool::SystemMem,
            },
        )
    }

    // --- presentation ------------------------------------------------------

    /// Counted handle on the implicit swap chain.
    pub fn swap_chain(&self) -> D3dResult<SwapChain> {
        self.inner.implicit()
    }

    pub fn back_buffer(&self, index: u32) -> D3dResult<Surface> {
        self.inner.implicit()?.back_buffer(index)
    }

    /// An independent swap chain participating in device reset.
    pub fn create_additional_swap_chain(&self, params: PresentParams) -> D3dResult<SwapChain> {
        self.inner.ensure_not_lost()?;
        let shared = SwapChainShared::create(&self.inner, params)?;
        self.inner
            .extra_chains
            .lock()
            .expect("device chain list poisoned")
            .push(Arc::downgrade(&shared));
        Ok(SwapChain::from_inner(shared))
    }

    /// Present the implicit chain's current back buffer.
    pub fn present(
        &self,
        src: Option<Rect>,
        dst: Option<Rect>,
        window_override: Option<WindowId>,
    ) -> D3dResult<()> {
        self.inner.implicit()?.present(src, dst, window_override)
    }

    // --- transient bind state ----------------------------------------------

    /// Bind a texture to a sampler stage. Pending dirty regions of the
    /// incoming texture are flushed first, so the GPU copy is current by the
    /// time anything samples it.
    pub fn set_texture(&self, stage: usize, binding: Option<TextureBinding>) -> D3dResult<()> {
        if stage >= MAX_TEXTURE_STAGES {
            return Err(D3dError::InvalidCall);
        }
        if let Some(binding) = &binding {
            if self.inner.state() == CooperativeState::Operational {
                binding.flush_dirty()?;
            }
        }
        self.inner.bind.lock().expect("device bind state poisoned").textures[stage] = binding;
        Ok(())
    }

    pub fn texture(&self, stage: usize) -> D3dResult<Option<TextureBinding>> {
        if stage >= MAX_TEXTURE_STAGES {
            return Err(D3dError::InvalidCall);
        }
        Ok(self
            .inner
            .bind
            .lock()
            .expect("device bind state poisoned")
            .textures[stage]
            .clone())
    }

    pub fn set_stream_source(
        &self,
        stream: usize,
        buffer: Option<VertexBuffer>,
    ) -> D3dResult<()> {
        if stream >= MAX_STREAMS {
            return Err(D3dError::InvalidCall);
        }
        if let Some(buffer) = &buffer {
            if self.inner.state() == CooperativeState::Operational {
                buffer.inner.flush_dirty()?;
            }
        }
        self.inner.bind.lock().expect("device bind state poisoned").streams[stream] = buffer;
        Ok(())
    }

    pub fn set_indices(&self, buffer: Option<IndexBuffer>) -> D3dResult<()> {
        if let Some(buffer) = &buffer {
            if self.inner.state() == CooperativeState::Operational {
                buffer.inner.flush_dirty()?;
            }
        }
        self.inner.bind.lock().expect("device bind state poisoned").indices = buffer;
        Ok(())
    }

    pub fn set_viewport(&self, viewport: Viewport) -> D3dResult<()> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(D3dError::InvalidCall);
        }
        self.inner.bind.lock().expect("device bind state poisoned").viewport = viewport;
        Ok(())
    }

    pub fn viewport(&self) -> Viewport {
        self.inner
            .bind
            .lock()
            .expect("device bind state poisoned")
            .viewport
    }

    // --- drawing -----------------------------------------------------------

    /// Non-indexed draw. Falls silent on a non-operational device so a
    /// render loop can keep running across loss.
    pub fn draw_primitive(&self, _primitive: PrimitiveType, vertex_count: u32) -> D3dResult<()> {
        if self.inner.state() != CooperativeState::Operational {
            return Ok(());
        }
        if vertex_count == 0 {
            return Err(D3dError::InvalidCall);
        }
        let bind = self.inner.bind.lock().expect("device bind state poisoned");
        if bind.streams[0].is_none() {
            return Err(D3dError::InvalidCall);
        }
        Ok(())
    }

    /// Indexed draw; requires stream 0 and an index buffer.
    pub fn draw_indexed_primitive(
        &self,
        _primitive: PrimitiveType,
        index_count: u32,
    ) -> D3dResult<()> {
        if self.inner.state() != CooperativeState::Operational {
            return Ok(());
        }
        if index_count == 0 {
            return Err(D3dError::InvalidCall);
        }
        let bind = self.inner.bind.lock().expect("device bind state poisoned");
        if bind.streams[0].is_none() || bind.indices.is_none() {
            return Err(D3dError::InvalidCall);
        }
        Ok(())
    }
}

/// Shared texture creation checks; returns the resolved level count
/// (`0` requests the full chain).
fn validate_texture_shape(
    width: u32,
    height: u32,
    depth: u32,
    levels: u32,
    usage: UsageFlags,
    format: Format,
    pool: Pool,
) -> D3dResult<u32> {
    if width == 0 || height == 0 || depth == 0 {
        return Err(D3dError::InvalidCall);
    }
    if !format.supports_usage(usage) {
        return Err(D3dError::NotAvailable);
    }
    pool.validate_creation(usage)?;
    let full = full_mip_levels(width, height, depth);
    match levels {
        0 => Ok(full),
        n if n <= full => Ok(n),
        _ => Err(D3dError::InvalidCall),
    }
}
