//! `prism-gpu` contains the GPU-side collaborators used by the prism D3D8
//! runtime.
//!
//! This crate provides:
//! - The [`RenderBackend`] trait: the execution target that owns real GPU
//!   storage (textures, buffers, framebuffers).
//! - A deterministic in-memory [`SoftwareBackend`] used by tests and the
//!   headless path.
//! - [`GpuExecutor`]: a single context-affine worker thread that owns the
//!   backend; all GPU work flows through it.
//! - The [`BlitTarget`] trait: the platform presentation sink that copies
//!   rendered pixels to a window.

mod backend;
mod blit;
mod executor;
mod handle;
mod software;

pub use backend::{
    BackendError, BufferStorageDesc, FramebufferStorageDesc, RenderBackend, TextureRegion,
    TextureStorageDesc,
};
pub use blit::{BlitRect, BlitRequest, BlitTarget, RecordingBlitControls, RecordingBlitTarget, WindowId};
pub use executor::GpuExecutor;
pub use handle::GpuHandle;
pub use software::{SoftwareBackend, SoftwareBackendControls};
