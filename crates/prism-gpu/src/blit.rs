//! Platform presentation sink.
//!
//! The last hop of a present: rendered pixels are handed to a [`BlitTarget`]
//! which copies them onto a window. The runtime never sees windowing details
//! beyond the opaque [`WindowId`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque identity of a presentation window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlitRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlitRequest {
    pub window: WindowId,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    /// Row-major pixel bytes, tightly packed.
    pub pixels: Vec<u8>,
    pub src_rect: Option<BlitRect>,
    pub dst_rect: Option<BlitRect>,
}

/// Copies presented pixels to a window. Returns `false` when the blit could
/// not be performed (the presenting caller treats that as a dropped frame,
/// not an error).
pub trait BlitTarget: Send {
    fn blit(&mut self, request: &BlitRequest) -> bool;
}

/// Shared view into a [`RecordingBlitTarget`].
#[derive(Clone, Debug, Default)]
pub struct RecordingBlitControls {
    inner: Arc<RecordingInner>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    requests: Mutex<Vec<BlitRequest>>,
    fail_blits: AtomicBool,
}

impl RecordingBlitControls {
    pub fn requests(&self) -> Vec<BlitRequest> {
        self.inner.requests.lock().expect("blit log poisoned").clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.lock().expect("blit log poisoned").len()
    }

    pub fn set_fail_blits(&self, fail: bool) {
        self.inner.fail_blits.store(fail, Ordering::SeqCst);
    }
}

/// Deterministic [`BlitTarget`] that records every request for inspection.
#[derive(Debug, Default)]
pub struct RecordingBlitTarget {
    controls: RecordingBlitControls,
}

impl RecordingBlitTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn controls(&self) -> RecordingBlitControls {
        self.controls.clone()
    }
}

impl BlitTarget for RecordingBlitTarget {
    fn blit(&mut self, request: &BlitRequest) -> bool {
        self.controls
            .inner
            .requests
            .lock()
            .expect("blit log poisoned")
            .push(request.clone());
        !self.controls.inner.fail_blits.load(Ordering::SeqCst)
    }
}
