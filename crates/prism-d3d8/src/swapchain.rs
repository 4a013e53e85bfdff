//! Presentation: back-buffer rings and the blit to a window.
//!
//! A swap chain owns a ring of framebuffers plus counted `Surface` views of
//! them. Allocation is all-or-nothing; a partial failure frees everything
//! already allocated. The chain reaches its device through a weak
//! back-reference, so releasing the device wrapper tears the ring down.

use std::sync::{Arc, Mutex, Weak};

use prism_gpu::{BlitRect, BlitRequest, FramebufferStorageDesc, GpuHandle, WindowId};
use tracing::{debug, warn};

use crate::device::DeviceShared;
use crate::error::{D3dError, D3dResult};
use crate::refcount::{DestroyLatch, RefCount};
use crate::resources::{impl_refcounted, Surface};
use crate::types::{PresentParams, Rect};

#[derive(Debug, Default)]
struct BufferRing {
    framebuffers: Vec<GpuHandle>,
    surfaces: Vec<Surface>,
    current: usize,
}

#[derive(Debug)]
pub(crate) struct SwapChainShared {
    device: Weak<DeviceShared>,
    pub(crate) refs: RefCount,
    latch: DestroyLatch,
    params: Mutex<PresentParams>,
    ring: Mutex<BufferRing>,
}

/// Allocate the framebuffer ring, freeing everything on partial failure.
fn allocate_ring(device: &DeviceShared, params: &PresentParams) -> D3dResult<Vec<GpuHandle>> {
    let desc = FramebufferStorageDesc {
        width: params.width,
        height: params.height,
        bytes_per_pixel: params.format.bytes_per_texel(),
    };
    let count = params.effective_buffer_count();
    let mut handles = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match device
            .executor()
            .call(move |backend| backend.create_framebuffer(&desc))
        {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                for handle in handles {
                    device
                        .executor()
                        .submit(move |backend| backend.destroy(handle));
                }
                return Err(err.into());
            }
        }
    }
    Ok(handles)
}

impl SwapChainShared {
    pub(crate) fn create(
        device: &Arc<DeviceShared>,
        params: PresentParams,
    ) -> D3dResult<Arc<SwapChainShared>> {
        params.validate()?;
        let framebuffers = allocate_ring(device, &params)?;
        let shared = Arc::new_cyclic(|weak: &Weak<SwapChainShared>| {
            let surfaces = (0..framebuffers.len() as u32)
                .map(|index| {
                    Surface::new_back_buffer(
                        device,
                        weak.clone(),
                        index,
                        params.width,
                        params.height,
                        params.format,
                    )
                })
                .collect();
            SwapChainShared {
                device: Arc::downgrade(device),
                refs: RefCount::new(),
                latch: DestroyLatch::new(),
                params: Mutex::new(params),
                ring: Mutex::new(BufferRing {
                    framebuffers,
                    surfaces,
                    current: 0,
                }),
            }
        });
        debug!(buffers = params.effective_buffer_count(), "swap chain created");
        Ok(shared)
    }

    pub(crate) fn destroy(&self) {
        if !self.latch.arm() {
            return;
        }
        if let Some(device) = self.device.upgrade() {
            self.release_buffers(&device);
        }
    }

    pub(crate) fn params(&self) -> PresentParams {
        *self.params.lock().expect("swap chain params poisoned")
    }

    pub(crate) fn buffer_handle(&self, index: u32) -> Option<GpuHandle> {
        self.ring
            .lock()
            .expect("swap chain ring poisoned")
            .framebuffers
            .get(index as usize)
            .copied()
    }

    pub(crate) fn back_buffer(&self, index: u32) -> D3dResult<Surface> {
        self.ring
            .lock()
            .expect("swap chain ring poisoned")
            .surfaces
            .get(index as usize)
            .cloned()
            .ok_or(D3dError::InvalidCall)
    }

    /// Free the ring, leaving the chain empty until the next reset.
    pub(crate) fn release_buffers(&self, device: &DeviceShared) {
        let mut ring = self.ring.lock().expect("swap chain ring poisoned");
        for handle in ring.framebuffers.drain(..) {
            device
                .executor()
                .submit(move |backend| backend.destroy(handle));
        }
        ring.surfaces.clear();
        ring.current = 0;
    }

    /// Tear down and reallocate under `new_params`, ring index back to 0.
    pub(crate) fn reset(self: &Arc<Self>, new_params: PresentParams) -> D3dResult<()> {
        new_params.validate()?;
        let device = self.device.upgrade().ok_or(D3dError::InvalidCall)?;
        self.release_buffers(&device);
        let framebuffers = allocate_ring(&device, &new_params)?;
        let surfaces = (0..framebuffers.len() as u32)
            .map(|index| {
                Surface::new_back_buffer(
                    &device,
                    Arc::downgrade(self),
                    index,
                    new_params.width,
                    new_params.height,
                    new_params.format,
                )
            })
            .collect();
        let mut ring = self.ring.lock().expect("swap chain ring poisoned");
        *ring = BufferRing {
            framebuffers,
            surfaces,
            current: 0,
        };
        *self.params.lock().expect("swap chain params poisoned") = new_params;
        Ok(())
    }

    pub(crate) fn present(
        &self,
        src: Option<Rect>,
        dst: Option<Rect>,
        window_override: Option<WindowId>,
    ) -> D3dResult<()> {
        let device = self.device.upgrade().ok_or(D3dError::InvalidCall)?;
        device.stats().inc_presents_attempted();
        if !device.presentable()? {
            return Ok(());
        }

        let (handle, width, height, bytes_per_pixel, window) = {
            let ring = self.ring.lock().expect("swap chain ring poisoned");
            let params = self.params.lock().expect("swap chain params poisoned");
            let handle = ring
                .framebuffers
                .get(ring.current)
                .copied()
                .ok_or(D3dError::InvalidCall)?;
            (
                handle,
                params.width,
                params.height,
                params.format.bytes_per_texel(),
                window_override.or(params.window),
            )
        };

        let delivered = match window {
            // Headless: the frame completes without leaving the runtime.
            None => true,
            Some(window) => {
                let pixels = device
                    .executor()
                    .call(move |backend| backend.read_framebuffer(handle))?;
                let request = BlitRequest {
                    window,
                    width,
                    height,
                    bytes_per_pixel,
                    pixels,
                    src_rect: src.map(to_blit_rect),
                    dst_rect: dst.map(to_blit_rect),
                };
                device.blit(&request)
            }
        };
        if delivered {
            device.stats().inc_presents_succeeded();
        } else {
            warn!(window = ?window, "frame dropped by blit target");
        }

        let mut ring = self.ring.lock().expect("swap chain ring poisoned");
        if ring.framebuffers.len() > 1 {
            ring.current = (ring.current + 1) % ring.framebuffers.len();
        }
        Ok(())
    }
}

fn to_blit_rect(rect: Rect) -> BlitRect {
    BlitRect {
        x: rect.left,
        y: rect.top,
        width: (rect.right - rect.left).max(0) as u32,
        height: (rect.bottom - rect.top).max(0) as u32,
    }
}

/// A presentable ring of back buffers.
#[derive(Debug)]
pub struct SwapChain {
    pub(crate) inner: Arc<SwapChainShared>,
}

impl_refcounted!(SwapChain);

impl SwapChain {
    pub(crate) fn from_inner(inner: Arc<SwapChainShared>) -> Self {
        Self { inner }
    }

    pub fn params(&self) -> PresentParams {
        self.inner.params()
    }

    pub fn buffer_count(&self) -> u32 {
        self.inner.params().effective_buffer_count()
    }

    /// Counted view of one back buffer.
    pub fn back_buffer(&self, index: u32) -> D3dResult<Surface> {
        self.inner.back_buffer(index)
    }

    /// Present the current buffer and advance the ring.
    pub fn present(
        &self,
        src: Option<Rect>,
        dst: Option<Rect>,
        window_override: Option<WindowId>,
    ) -> D3dResult<()> {
        self.inner.present(src, dst, window_override)
    }
}
