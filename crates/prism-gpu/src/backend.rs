//! GPU backend abstraction.
//!
//! The device runtime is backend-agnostic; in production builds this trait is
//! implemented over a real graphics context. Tests use the deterministic
//! [`crate::SoftwareBackend`].

use thiserror::Error;

use crate::GpuHandle;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend allocation failed")]
    OutOfMemory,
    #[error("unknown handle {0}")]
    UnknownHandle(GpuHandle),
    #[error("access out of bounds: {0}")]
    OutOfBounds(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Storage shape of a texture allocation.
///
/// `layers` is the number of array layers (6 for a cube map, 1 otherwise);
/// `levels` is the mip chain length. Subresources are addressed as
/// `layer * levels + level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureStorageDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layers: u32,
    pub levels: u32,
    pub bytes_per_texel: u32,
    pub render_target: bool,
}

impl TextureStorageDesc {
    pub fn subresource_count(&self) -> u32 {
        self.layers * self.levels
    }

    /// Dimensions of one mip level (minimum 1 per axis).
    pub fn level_extent(&self, level: u32) -> (u32, u32, u32) {
        (
            (self.width >> level).max(1),
            (self.height >> level).max(1),
            (self.depth >> level).max(1),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferStorageDesc {
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferStorageDesc {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel of the color storage (4 for RGBA8-style formats).
    pub bytes_per_pixel: u32,
}

/// Texel-space region of one texture subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl TextureRegion {
    pub fn whole(width: u32, height: u32, depth: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            width,
            height,
            depth,
        }
    }
}

/// The execution target owned by the [`crate::GpuExecutor`].
///
/// All methods take `&mut self`: the executor serializes access on its worker
/// thread, which is also what keeps a context-affine implementation legal.
pub trait RenderBackend: Send {
    fn create_texture(&mut self, desc: &TextureStorageDesc) -> Result<GpuHandle, BackendError>;
    fn create_buffer(&mut self, desc: &BufferStorageDesc) -> Result<GpuHandle, BackendError>;
    fn create_framebuffer(
        &mut self,
        desc: &FramebufferStorageDesc,
    ) -> Result<GpuHandle, BackendError>;

    /// Destroying an unknown handle is a no-op.
    fn destroy(&mut self, handle: GpuHandle);

    /// Upload `bytes` into `region` of one subresource. `row_pitch` is the
    /// source stride in bytes; slices within a 3D region are `row_pitch *
    /// region.height` apart.
    fn upload_texture(
        &mut self,
        handle: GpuHandle,
        subresource: u32,
        region: TextureRegion,
        row_pitch: u32,
        bytes: &[u8],
    ) -> Result<(), BackendError>;

    fn upload_buffer(
        &mut self,
        handle: GpuHandle,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BackendError>;

    /// Read back `region` of one subresource, tightly packed.
    fn read_texture(
        &mut self,
        handle: GpuHandle,
        subresource: u32,
        region: TextureRegion,
    ) -> Result<Vec<u8>, BackendError>;

    fn read_buffer(
        &mut self,
        handle: GpuHandle,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, BackendError>;

    /// Read back the full color contents of a framebuffer, row-major.
    fn read_framebuffer(&mut self, handle: GpuHandle) -> Result<Vec<u8>, BackendError>;
}
