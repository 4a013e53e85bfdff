//! Legacy fixed-function device emulation: pooled resources, cooperative
//! device loss and reset recovery.
//!
//! The crate models the resource-lifecycle half of an early-2000s 3D API:
//! applications create textures, buffers and surfaces out of storage pools
//! with different loss behavior, lock them for CPU access, and survive
//! device loss by resetting. GPU work is funneled through the
//! context-affine executor of [`prism_gpu`]; presentation leaves through a
//! [`prism_gpu::BlitTarget`].
//!
//! The entry point is [`Device::create`]. Everything an application holds
//! (`Texture2d`, `Surface`, `SwapChain`, the device itself) is a counted
//! wrapper: clones add references, drops release them, and the last release
//! runs destruction exactly once.

pub mod device;
pub mod dirty;
pub mod error;
pub mod pool;
pub mod refcount;
pub mod registry;
pub mod resources;
pub mod stats;
pub mod swapchain;
pub mod types;

pub use device::{
    CooperativeState, Device, TextureBinding, MAX_STREAMS, MAX_TEXTURE_STAGES,
};
pub use error::{D3dError, D3dResult};
pub use pool::Pool;
pub use refcount::InterfaceId;
pub use registry::ResourceId;
pub use resources::{
    CubeFace, CubeTexture, IndexBuffer, IndexBufferDesc, LevelDesc, LockGuard, ResourceRef,
    Surface, SurfaceDesc, Texture2d, VertexBuffer, VertexBufferDesc, VolumeTexture,
};
pub use stats::{DeviceStats, DeviceStatsSnapshot};
pub use swapchain::SwapChain;
pub use types::{
    Box3, Format, IndexFormat, LockFlags, PresentParams, PrimitiveType, Rect, UsageFlags,
    Viewport, MAX_BACK_BUFFERS,
};
