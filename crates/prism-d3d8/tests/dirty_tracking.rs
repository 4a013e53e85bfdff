//! Dirty-region bookkeeping: what a lock records and what a bind uploads.

use prism_d3d8::{
    CubeFace, Device, Format, IndexFormat, LockFlags, Pool, PresentParams, Rect, TextureBinding,
    UsageFlags,
};
use prism_gpu::{GpuExecutor, RecordingBlitTarget};
use pretty_assertions::assert_eq;

fn headless_device() -> Device {
    let (executor, _gpu) = GpuExecutor::with_software_backend();
    let params = PresentParams {
        width: 64,
        height: 48,
        format: Format::X8R8G8B8,
        buffer_count: 1,
        window: None,
    };
    Device::create(executor, Box::new(RecordingBlitTarget::new()), params).unwrap()
}

fn bind(device: &Device, texture: &prism_d3d8::Texture2d) {
    device
        .set_texture(0, Some(TextureBinding::Texture2d(texture.clone())))
        .unwrap();
}

#[test]
fn unlocking_a_managed_texture_queues_one_upload_for_the_bind() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let mut guard = texture.lock_rect(0, None, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x5a);
    guard.unlock().unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 0);

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 1);

    // The tracker is clean now, so rebinding uploads nothing.
    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 1);
}

#[test]
fn read_only_locks_leave_the_tracker_clean() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let guard = texture.lock_rect(0, None, LockFlags::READ_ONLY).unwrap();
    drop(guard);

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 0);
}

#[test]
fn no_dirty_update_writes_reach_the_shadow_but_not_the_gpu() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let mut guard = texture
        .lock_rect(0, None, LockFlags::NO_DIRTY_UPDATE)
        .unwrap();
    guard.bytes_mut().fill(0x44);
    guard.unlock().unwrap();

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 0);

    let guard = texture.lock_rect(0, None, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[0x44u8; 16]);
}

#[test]
fn touching_dirty_rects_merge_into_one_upload() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    texture.add_dirty_rect(Some(Rect::new(0, 0, 2, 2))).unwrap();
    texture.add_dirty_rect(Some(Rect::new(2, 0, 4, 2))).unwrap();

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 1);
}

#[test]
fn disjoint_dirty_rects_upload_separately() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    texture.add_dirty_rect(Some(Rect::new(0, 0, 1, 1))).unwrap();
    texture.add_dirty_rect(Some(Rect::new(2, 2, 3, 3))).unwrap();

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 2);
}

#[test]
fn marking_without_a_rect_covers_the_whole_level() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    texture.add_dirty_rect(Some(Rect::new(0, 0, 1, 1))).unwrap();
    texture.add_dirty_rect(None).unwrap();

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 1);
}

#[test]
fn overflowing_the_region_list_degrades_to_a_whole_upload() {
    let device = headless_device();
    let texture = device
        .create_texture(64, 1, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    // Sixteen separated stripes fit; the seventeenth tips the tracker over.
    for i in 0..17 {
        let x = i * 3;
        texture
            .add_dirty_rect(Some(Rect::new(x, 0, x + 1, 1)))
            .unwrap();
        let degradations = device.stats().dirty_degradations;
        if i < 16 {
            assert_eq!(degradations, 0);
        } else {
            assert_eq!(degradations, 1);
        }
    }

    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 1);
}

#[test]
fn default_pool_resources_ignore_dirty_marks() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Default)
        .unwrap();

    texture.add_dirty_rect(None).unwrap();
    bind(&device, &texture);
    assert_eq!(device.stats().dirty_flush_uploads, 0);
}

#[test]
fn cube_faces_track_dirt_per_face() {
    let device = headless_device();
    let cube = device
        .create_cube_texture(4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    cube.add_dirty_rect(CubeFace::PositiveX, None).unwrap();
    cube.add_dirty_rect(CubeFace::NegativeZ, None).unwrap();

    device
        .set_texture(0, Some(TextureBinding::CubeTexture(cube.clone())))
        .unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 2);
}

#[test]
fn buffer_binds_flush_pending_writes() {
    let device = headless_device();
    let vb = device
        .create_vertex_buffer(32, UsageFlags::empty(), 0, Pool::Managed)
        .unwrap();
    let ib = device
        .create_index_buffer(8, UsageFlags::empty(), IndexFormat::U16, Pool::Managed)
        .unwrap();

    let mut guard = vb.lock(0, 0, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x11);
    guard.unlock().unwrap();
    let mut guard = ib.lock(0, 0, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x22);
    guard.unlock().unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 0);

    device.set_stream_source(0, Some(vb.clone())).unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 1);
    device.set_indices(Some(ib.clone())).unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 2);

    // Clean buffers rebind without further traffic.
    device.set_stream_source(0, Some(vb)).unwrap();
    device.set_indices(Some(ib)).unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 2);
}
