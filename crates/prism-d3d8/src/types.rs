//! Shared value types: formats, rectangles, boxes, creation and lock flags.

use bitflags::bitflags;
use prism_gpu::WindowId;

use crate::error::{D3dError, D3dResult};

/// Surface/texture formats supported by the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    A8R8G8B8,
    X8R8G8B8,
    R5G6B5,
    A8,
    L8,
    D16,
    D24S8,
}

impl Format {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Format::A8R8G8B8 | Format::X8R8G8B8 | Format::D24S8 => 4,
            Format::R5G6B5 | Format::D16 => 2,
            Format::A8 | Format::L8 => 1,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D16 | Format::D24S8)
    }

    pub fn is_color(self) -> bool {
        !self.is_depth()
    }

    /// Whether the format can back a render target.
    pub fn is_render_target_capable(self) -> bool {
        matches!(self, Format::A8R8G8B8 | Format::X8R8G8B8 | Format::R5G6B5)
    }

    /// Format/usage compatibility check applied before any allocation.
    pub fn supports_usage(self, usage: UsageFlags) -> bool {
        if usage.contains(UsageFlags::RENDER_TARGET) && !self.is_render_target_capable() {
            return false;
        }
        if usage.contains(UsageFlags::DEPTH_STENCIL) && !self.is_depth() {
            return false;
        }
        if self.is_depth() && !usage.contains(UsageFlags::DEPTH_STENCIL) {
            return false;
        }
        true
    }
}

bitflags! {
    /// Resource creation usage flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct UsageFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const DYNAMIC = 1 << 2;
        const WRITE_ONLY = 1 << 3;
    }
}

bitflags! {
    /// Lock behavior flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct LockFlags: u32 {
        /// The caller promises not to write; the unlock does not mark dirty
        /// regions and does not write anything back.
        const READ_ONLY = 1 << 0;
        /// Discard the previous contents of the locked range. Only honored
        /// for `DYNAMIC` resources; the staging bytes start zeroed.
        const DISCARD = 1 << 1;
        /// The caller promises not to overwrite data the GPU may still read.
        const NO_OVERWRITE = 1 << 2;
        /// Write back, but do not record dirty regions.
        const NO_DIRTY_UPDATE = 1 << 3;
    }
}

/// 2D sub-rectangle in texel coordinates. `right`/`bottom` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

/// 3D sub-box in texel coordinates; exclusive upper bounds.
///
/// 2D regions are boxes with `front == 0, back == 1`; 1-D byte ranges use
/// the x axis only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Box3 {
    pub left: i32,
    pub top: i32,
    pub front: i32,
    pub right: i32,
    pub bottom: i32,
    pub back: i32,
}

impl Box3 {
    pub fn new(left: i32, top: i32, front: i32, right: i32, bottom: i32, back: i32) -> Self {
        Self {
            left,
            top,
            front,
            right,
            bottom,
            back,
        }
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            front: 0,
            right: rect.right,
            bottom: rect.bottom,
            back: 1,
        }
    }

    /// Whole-extent box for a subresource of the given dimensions.
    pub fn whole(width: u32, height: u32, depth: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            front: 0,
            right: width as i32,
            bottom: height as i32,
            back: depth as i32,
        }
    }

    /// A box with inverted extents on any axis is malformed and rejected
    /// with `InvalidCall` before any clamping.
    pub fn validate(&self) -> D3dResult<()> {
        if self.left < self.right && self.top < self.bottom && self.front < self.back {
            Ok(())
        } else {
            Err(D3dError::InvalidCall)
        }
    }

    /// Clamp to `bounds`. The result may be empty.
    pub fn clamped_to(&self, bounds: &Box3) -> Box3 {
        Box3 {
            left: self.left.max(bounds.left),
            top: self.top.max(bounds.top),
            front: self.front.max(bounds.front),
            right: self.right.min(bounds.right),
            bottom: self.bottom.min(bounds.bottom),
            back: self.back.min(bounds.back),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom || self.front >= self.back
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn depth(&self) -> u32 {
        (self.back - self.front).max(0) as u32
    }

    pub fn contains(&self, other: &Box3) -> bool {
        self.left <= other.left
            && self.top <= other.top
            && self.front <= other.front
            && self.right >= other.right
            && self.bottom >= other.bottom
            && self.back >= other.back
    }

    /// True when the boxes overlap or share an edge on every axis.
    pub fn touches(&self, other: &Box3) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
            && self.front <= other.back
            && other.front <= self.back
    }

    pub fn union(&self, other: &Box3) -> Box3 {
        Box3 {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            front: self.front.min(other.front),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
            back: self.back.max(other.back),
        }
    }
}

/// Viewport state; part of the transient device state dropped on reset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            min_z: 0.0,
            max_z: 1.0,
        }
    }
}

/// Index element width of an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn stride(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// Primitive topology accepted by the draw entry points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

/// Presentation parameters adopted at device creation and on every reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentParams {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    /// Number of back buffers; `0` means one.
    pub buffer_count: u32,
    /// Destination window. `None` renders headless: presents succeed but
    /// nothing reaches a blit target.
    pub window: Option<WindowId>,
}

/// Back buffer count ceiling, as in the original API.
pub const MAX_BACK_BUFFERS: u32 = 3;

impl PresentParams {
    pub fn validate(&self) -> D3dResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(D3dError::InvalidCall);
        }
        if !self.format.is_color() {
            return Err(D3dError::InvalidCall);
        }
        if self.buffer_count > MAX_BACK_BUFFERS {
            return Err(D3dError::InvalidCall);
        }
        Ok(())
    }

    pub fn effective_buffer_count(&self) -> u32 {
        self.buffer_count.max(1)
    }
}

/// Dimension of a mip level (minimum 1).
pub fn mip_dim(base: u32, level: u32) -> u32 {
    (base >> level).max(1)
}

/// Length of the full mip chain down to 1x1(x1).
pub fn full_mip_levels(width: u32, height: u32, depth: u32) -> u32 {
    let max = width.max(height).max(depth).max(1);
    32 - max.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn format_usage_compatibility() {
        assert!(Format::A8R8G8B8.supports_usage(UsageFlags::RENDER_TARGET));
        assert!(!Format::A8.supports_usage(UsageFlags::RENDER_TARGET));
        assert!(Format::D24S8.supports_usage(UsageFlags::DEPTH_STENCIL));
        assert!(!Format::D24S8.supports_usage(UsageFlags::empty()));
        assert!(!Format::R5G6B5.supports_usage(UsageFlags::DEPTH_STENCIL));
        assert!(Format::L8.supports_usage(UsageFlags::DYNAMIC));
    }

    #[test]
    fn box_validation_rejects_inverted_extents() {
        assert!(Box3::new(0, 0, 0, 4, 4, 1).validate().is_ok());
        assert_eq!(
            Box3::new(4, 0, 0, 0, 4, 1).validate(),
            Err(D3dError::InvalidCall)
        );
        assert_eq!(
            Box3::new(0, 0, 1, 4, 4, 1).validate(),
            Err(D3dError::InvalidCall)
        );
    }

    #[test]
    fn box_clamping_can_produce_empty() {
        let bounds = Box3::whole(4, 4, 1);
        let inside = Box3::new(-2, -2, 0, 2, 2, 1).clamped_to(&bounds);
        assert_eq!(inside, Box3::new(0, 0, 0, 2, 2, 1));
        let outside = Box3::new(8, 8, 0, 12, 12, 1).clamped_to(&bounds);
        assert!(outside.is_empty());
    }

    #[test]
    fn union_and_containment() {
        let a = Box3::new(0, 0, 0, 2, 2, 1);
        let b = Box3::new(1, 1, 0, 4, 4, 1);
        assert!(a.touches(&b));
        assert_eq!(a.union(&b), Box3::new(0, 0, 0, 4, 4, 1));
        assert!(Box3::whole(4, 4, 1).contains(&a));
        assert!(!a.contains(&b));
    }

    #[test]
    fn mip_helpers() {
        assert_eq!(mip_dim(256, 0), 256);
        assert_eq!(mip_dim(256, 8), 1);
        assert_eq!(mip_dim(256, 12), 1);
        assert_eq!(full_mip_levels(256, 256, 1), 9);
        assert_eq!(full_mip_levels(256, 64, 1), 9);
        assert_eq!(full_mip_levels(1, 1, 1), 1);
    }

    #[test]
    fn present_params_validation() {
        let mut params = PresentParams {
            width: 640,
            height: 480,
            format: Format::X8R8G8B8,
            buffer_count: 0,
            window: None,
        };
        assert!(params.validate().is_ok());
        assert_eq!(params.effective_buffer_count(), 1);

        params.buffer_count = MAX_BACK_BUFFERS + 1;
        assert_eq!(params.validate(), Err(D3dError::InvalidCall));

        params.buffer_count = 2;
        params.format = Format::D16;
        assert_eq!(params.validate(), Err(D3dError::InvalidCall));
    }
}
