//! Application-facing resource types.
//!
//! Every resource is a thin refcounted wrapper around a shared inner: clone
//! adds a reference, drop releases one, and whoever releases the last
//! reference runs the (exactly-once) destruction side effects. Explicit
//! `add_ref`/`release` are available for marshalling layers that manage
//! counts by hand.

pub(crate) mod buffer;
mod lock;
pub(crate) mod surface;
pub(crate) mod texture;

pub use buffer::{IndexBuffer, IndexBufferDesc, VertexBuffer, VertexBufferDesc};
pub use lock::LockGuard;
pub use surface::{Surface, SurfaceDesc};
pub use texture::{
    CubeFace, CubeTexture, LevelDesc, Texture2d, VolumeTexture,
};

use crate::refcount::InterfaceId;

/// Result of a successful `query_interface`: the same underlying object,
/// re-counted, viewed through one of its capability sets.
#[derive(Debug)]
pub enum ResourceRef {
    Texture2d(Texture2d),
    CubeTexture(CubeTexture),
    VolumeTexture(VolumeTexture),
    Surface(Surface),
    VertexBuffer(VertexBuffer),
    IndexBuffer(IndexBuffer),
}

impl ResourceRef {
    pub fn interface_hint(&self) -> InterfaceId {
        match self {
            ResourceRef::Texture2d(_) => InterfaceId::Texture2d,
            ResourceRef::CubeTexture(_) => InterfaceId::CubeTexture,
            ResourceRef::VolumeTexture(_) => InterfaceId::VolumeTexture,
            ResourceRef::Surface(_) => InterfaceId::Surface,
            ResourceRef::VertexBuffer(_) => InterfaceId::VertexBuffer,
            ResourceRef::IndexBuffer(_) => InterfaceId::IndexBuffer,
        }
    }
}

/// Generates the COM-style reference plumbing shared by all wrappers.
///
/// The inner type provides `refs: RefCount` and `destroy(&self)`.
macro_rules! impl_refcounted {
    ($wrapper:ident) => {
        impl $wrapper {
            /// Manually add a reference; pair with [`Self::release`].
            pub fn add_ref(&self) -> u32 {
                self.inner.refs.add_ref()
            }

            /// Manually drop a reference previously taken with
            /// [`Self::add_ref`]. Returns the new count; at zero the object
            /// is destroyed.
            pub fn release(&self) -> u32 {
                let remaining = self.inner.refs.release();
                if remaining == 0 {
                    self.inner.destroy();
                }
                remaining
            }

            pub fn ref_count(&self) -> u32 {
                self.inner.refs.count()
            }

            /// Whether two wrappers view the same underlying object.
            pub fn same_identity(&self, other: &Self) -> bool {
                std::sync::Arc::ptr_eq(&self.inner, &other.inner)
            }
        }

        impl Clone for $wrapper {
            fn clone(&self) -> Self {
                self.inner.refs.add_ref();
                Self {
                    inner: std::sync::Arc::clone(&self.inner),
                }
            }
        }

        impl Drop for $wrapper {
            fn drop(&mut self) {
                if self.inner.refs.release() == 0 {
                    self.inner.destroy();
                }
            }
        }
    };
}

pub(crate) use impl_refcounted;
