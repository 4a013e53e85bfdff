//! Vertex and index buffers.
//!
//! Both kinds share one inner; locks are byte ranges expressed as 1-D
//! boxes on the x axis so dirty tracking reuses the box machinery.

use std::sync::{Arc, Mutex};

use prism_gpu::{BufferStorageDesc, GpuHandle};
use tracing::debug;

use crate::device::DeviceShared;
use crate::dirty::{DirtyState, DirtyTracker, MarkOutcome};
use crate::error::{D3dError, D3dResult};
use crate::pool::Pool;
use crate::refcount::{DestroyLatch, InterfaceId, RefCount};
use crate::registry::{PoolResource, ResourceId};
use crate::resources::lock::{LockBacking, LockGuard};
use crate::resources::{impl_refcounted, ResourceRef};
use crate::types::{Box3, IndexFormat, LockFlags, UsageFlags};

/// Shape of a vertex buffer, retained verbatim for reset recreation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBufferDesc {
    pub size: u32,
    pub usage: UsageFlags,
    /// Flexible vertex format code declared by the application; opaque to
    /// the runtime.
    pub fvf: u32,
    pub pool: Pool,
}

/// Shape of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBufferDesc {
    pub size: u32,
    pub usage: UsageFlags,
    pub format: IndexFormat,
    pub pool: Pool,
}

#[derive(Clone, Copy, Debug)]
enum BufferPayload {
    Vertex { fvf: u32 },
    Index { format: IndexFormat },
}

#[derive(Debug)]
struct BufferCpu {
    shadow: Vec<u8>,
    locked: bool,
    dirty: Option<DirtyTracker>,
}

#[derive(Debug)]
pub(crate) struct BufferInner {
    id: ResourceId,
    device: Arc<DeviceShared>,
    pub(crate) refs: RefCount,
    latch: DestroyLatch,
    size: u32,
    usage: UsageFlags,
    pool: Pool,
    payload: BufferPayload,
    handle: Mutex<Option<GpuHandle>>,
    cpu: Mutex<BufferCpu>,
}

/// Resolve an `(offset, size)` request against the buffer length.
/// `size == 0` extends to the end.
fn resolve_range(total: u32, offset: u32, size: u32) -> D3dResult<Box3> {
    if offset >= total {
        return Err(D3dError::InvalidCall);
    }
    let end = if size == 0 {
        total
    } else {
        offset.checked_add(size).filter(|end| *end <= total).ok_or(D3dError::InvalidCall)?
    };
    Ok(Box3::new(offset as i32, 0, 0, end as i32, 1, 1))
}

impl BufferInner {
    fn create(
        device: &Arc<DeviceShared>,
        size: u32,
        usage: UsageFlags,
        pool: Pool,
        payload: BufferPayload,
    ) -> D3dResult<Arc<BufferInner>> {
        if size == 0 {
            return Err(D3dError::InvalidCall);
        }
        pool.validate_creation(usage)?;
        device.ensure_not_lost()?;
        let handle = if pool.has_gpu_handle() {
            let storage = BufferStorageDesc { size: size as u64 };
            Some(
                device
                    .executor()
                    .call(move |backend| backend.create_buffer(&storage))?,
            )
        } else {
            None
        };
        let shadow = if pool.has_cpu_shadow() {
            vec![0u8; size as usize]
        } else {
            Vec::new()
        };
        let dirty = pool
            .tracks_dirty()
            .then(|| DirtyTracker::new(std::iter::once(Box3::whole(size, 1, 1))));
        let inner = Arc::new(BufferInner {
            id: device.allocate_resource_id(),
            device: Arc::clone(device),
            refs: RefCount::new(),
            latch: DestroyLatch::new(),
            size,
            usage,
            pool,
            payload,
            handle: Mutex::new(handle),
            cpu: Mutex::new(BufferCpu {
                shadow,
                locked: false,
                dirty,
            }),
        });
        let weak = Arc::downgrade(&inner);
        device.registry().register(inner.id, weak);
        device.stats().inc_resources_created();
        Ok(inner)
    }

    fn destroy(&self) {
        if !self.latch.arm() {
            return;
        }
        self.device.registry().unregister(self.id);
        if let Some(handle) = self.handle.lock().expect("buffer handle poisoned").take() {
            self.device
                .executor()
                .submit(move |backend| backend.destroy(handle));
        }
        self.device.stats().inc_resources_destroyed();
    }

    fn gpu_handle(&self) -> Option<GpuHandle> {
        *self.handle.lock().expect("buffer handle poisoned")
    }

    fn lock_range(
        self: &Arc<Self>,
        offset: u32,
        size: u32,
        flags: LockFlags,
    ) -> D3dResult<LockGuard> {
        self.device.ensure_not_lost()?;
        if flags.contains(LockFlags::READ_ONLY)
            && flags.intersects(LockFlags::DISCARD | LockFlags::NO_OVERWRITE)
        {
            return Err(D3dError::InvalidCall);
        }
        let region = resolve_range(self.size, offset, size)?;
        {
            let mut cpu = self.cpu.lock().expect("buffer cpu state poisoned");
            if cpu.locked {
                return Err(D3dError::InvalidCall);
            }
            cpu.locked = true;
        }

        let len = region.width();
        let discard = flags.contains(LockFlags::DISCARD) && self.usage.contains(UsageFlags::DYNAMIC);
        let bytes = if discard {
            Ok(vec![0u8; len as usize])
        } else if self.pool.has_cpu_shadow() {
            let cpu = self.cpu.lock().expect("buffer cpu state poisoned");
            Ok(cpu.shadow[region.left as usize..region.right as usize].to_vec())
        } else {
            self.read_back(region)
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(err) => {
                self.cpu.lock().expect("buffer cpu state poisoned").locked = false;
                return Err(err);
            }
        };

        Ok(LockGuard::new(
            Arc::clone(self) as Arc<dyn LockBacking>,
            0,
            region,
            len,
            len,
            flags,
            bytes,
        ))
    }

    /// Default-pool staging read: drain in-flight work, then read the
    /// current GPU contents.
    fn read_back(&self, region: Box3) -> D3dResult<Vec<u8>> {
        let handle = self.gpu_handle().ok_or(D3dError::InvalidCall)?;
        self.device.executor().drain();
        let offset = region.left as u64;
        let len = region.width() as u64;
        Ok(self
            .device
            .executor()
            .call(move |backend| backend.read_buffer(handle, offset, len))?)
    }

    /// Upload every pending dirty range from the shadow.
    pub(crate) fn flush_dirty(&self) -> D3dResult<()> {
        let handle = self.gpu_handle();
        let mut cpu = self.cpu.lock().expect("buffer cpu state poisoned");
        let BufferCpu {
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
        let ranges = match pending {
            DirtyState::Clean => return Ok(()),
            DirtyState::Whole => vec![Box3::whole(self.size, 1, 1)],
            DirtyState::Boxes(boxes) => boxes,
        };
        for range in ranges {
            let bytes = shadow[range.left as usize..range.right as usize].to_vec();
            let offset = range.left as u64;
            self.device
                .executor()
                .call(move |backend| backend.upload_buffer(handle, offset, &bytes))?;
            self.device.stats().inc_dirty_flush_uploads();
        }
        Ok(())
    }

    fn kind_name(&self) -> &'static str {
        match self.payload {
            BufferPayload::Vertex { .. } => "vertex_buffer",
            BufferPayload::Index { .. } => "index_buffer",
        }
    }
}

impl LockBacking for BufferInner {
    fn finish_unlock(
        &self,
        _subresource: u32,
        region: Box3,
        bytes: &[u8],
        flags: LockFlags,
    ) -> D3dResult<()> {
        let result = if self.pool.has_cpu_shadow() {
            let mut cpu = self.cpu.lock().expect("buffer cpu state poisoned");
            let BufferCpu { shadow, dirty, .. } = &mut *cpu;
            shadow[region.left as usize..region.right as usize].copy_from_slice(bytes);
            if !flags.contains(LockFlags::NO_DIRTY_UPDATE) {
                if let Some(tracker) = dirty.as_mut() {
                    if let Ok(MarkOutcome::Degraded) = tracker.mark(0, Some(region)) {
                        self.device.stats().inc_dirty_degradations();
                    }
                }
            }
            Ok(())
        } else {
            match self.gpu_handle() {
                Some(handle) => {
                    let offset = region.left as u64;
                    let bytes = bytes.to_vec();
                    self.device
                        .executor()
                        .call(move |backend| backend.upload_buffer(handle, offset, &bytes))
                        .map_err(D3dError::from)
                }
                // Storage went away mid-lock (device loss); the write is dropped.
                None => Ok(()),
            }
        };
        self.abandon_lock(0);
        result
    }

    fn abandon_lock(&self, _subresource: u32) {
        self.cpu.lock().expect("buffer cpu state poisoned").locked = false;
    }

    fn kind(&self) -> &'static str {
        self.kind_name()
    }
}

impl PoolResource for BufferInner {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn pool(&self) -> Pool {
        self.pool
    }

    fn kind(&self) -> &'static str {
        self.kind_name()
    }

    fn release_gpu_storage(&self) {
        if let Some(handle) = self.handle.lock().expect("buffer handle poisoned").take() {
            debug!(id = self.id.get(), %handle, "releasing buffer storage");
            self.device
                .executor()
                .submit(move |backend| backend.destroy(handle));
        }
    }

    fn recreate_gpu_storage(&self) -> D3dResult<()> {
        if !self.pool.has_gpu_handle() {
            return Ok(());
        }
        let storage = BufferStorageDesc {
            size: self.size as u64,
        };
        let handle = self
            .device
            .executor()
            .call(move |backend| backend.create_buffer(&storage))?;
        debug!(id = self.id.get(), %handle, "recreated buffer storage");
        *self.handle.lock().expect("buffer handle poisoned") = Some(handle);
        Ok(())
    }

    fn restore_from_shadow(&self) -> D3dResult<()> {
        if !self.pool.recreate_fast_path() {
            return Ok(());
        }
        {
            let mut cpu = self.cpu.lock().expect("buffer cpu state poisoned");
            if let Some(tracker) = cpu.dirty.as_mut() {
                tracker.mark_all_whole();
            }
        }
        self.flush_dirty()
    }
}

/// A buffer of application-defined vertex data.
#[derive(Debug)]
pub struct VertexBuffer {
    pub(crate) inner: Arc<BufferInner>,
}

impl_refcounted!(VertexBuffer);

impl VertexBuffer {
    pub(crate) fn create(
        device: &Arc<DeviceShared>,
        desc: VertexBufferDesc,
    ) -> D3dResult<VertexBuffer> {
        let inner = BufferInner::create(
            device,
            desc.size,
            desc.usage,
            desc.pool,
            BufferPayload::Vertex { fvf: desc.fvf },
        )?;
        Ok(VertexBuffer { inner })
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn desc(&self) -> VertexBufferDesc {
        let BufferPayload::Vertex { fvf } = self.inner.payload else {
            unreachable!("vertex wrapper over index payload");
        };
        VertexBufferDesc {
            size: self.inner.size,
            usage: self.inner.usage,
            fvf,
            pool: self.inner.pool,
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.size
    }

    pub fn pool(&self) -> Pool {
        self.inner.pool
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.inner.gpu_handle()
    }

    /// Lock a byte range; `size == 0` extends to the end of the buffer.
    pub fn lock(&self, offset: u32, size: u32, flags: LockFlags) -> D3dResult<LockGuard> {
        self.inner.lock_range(offset, size, flags)
    }

    pub fn query_interface(&self, id: InterfaceId) -> D3dResult<ResourceRef> {
        match id {
            InterfaceId::Resource | InterfaceId::VertexBuffer => {
                Ok(ResourceRef::VertexBuffer(self.clone()))
            }
            _ => Err(D3dError::NoInterface),
        }
    }
}

/// A buffer of 16- or 32-bit indices.
#[derive(Debug)]
pub struct IndexBuffer {
    pub(crate) inner: Arc<BufferInner>,
}

impl_refcounted!(IndexBuffer);

impl IndexBuffer {
    pub(crate) fn create(
        device: &Arc<DeviceShared>,
        desc: IndexBufferDesc,
    ) -> D3dResult<IndexBuffer> {
        if desc.size % desc.format.stride() != 0 {
            return Err(D3dError::InvalidCall);
        }
        let inner = BufferInner::create(
            device,
            desc.size,
            desc.usage,
            desc.pool,
            BufferPayload::Index {
                format: desc.format,
            },
        )?;
        Ok(IndexBuffer { inner })
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.id
    }

    pub fn desc(&self) -> IndexBufferDesc {
        let BufferPayload::Index { format } = self.inner.payload else {
            unreachable!("index wrapper over vertex payload");
        };
        IndexBufferDesc {
            size: self.inner.size,
            usage: self.inner.usage,
            format,
            pool: self.inner.pool,
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.size
    }

    pub fn format(&self) -> IndexFormat {
        let BufferPayload::Index { format } = self.inner.payload else {
            unreachable!("index wrapper over vertex payload");
        };
        format
    }

    pub fn pool(&self) -> Pool {
        self.inner.pool
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.inner.gpu_handle()
    }

    /// Lock a byte range; `size == 0` extends to the end of the buffer.
    pub fn lock(&self, offset: u32, size: u32, flags: LockFlags) -> D3dResult<LockGuard> {
        self.inner.lock_range(offset, size, flags)
    }

    pub fn query_interface(&self, id: InterfaceId) -> D3dResult<ResourceRef> {
        match id {
            InterfaceId::Resource | InterfaceId::IndexBuffer => {
                Ok(ResourceRef::IndexBuffer(self.clone()))
            }
            _ => Err(D3dError::NoInterface),
        }
    }
}
