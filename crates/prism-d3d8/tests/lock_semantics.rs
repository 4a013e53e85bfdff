//! Lock behavior across pools: staging copies, write-back, flags.

use prism_d3d8::{
    Box3, D3dError, Device, Format, LockFlags, Pool, PresentParams, Rect, UsageFlags,
};
use prism_gpu::{GpuExecutor, RecordingBlitTarget};
use prism_d3d8::CubeFace;
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

#[test]
fn write_back_is_visible_to_the_next_lock() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let mut guard = texture.lock_rect(0, None, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x5a);
    guard.unlock().unwrap();

    let guard = texture.lock_rect(0, None, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[0x5au8; 16]);
}

#[test]
fn partial_locks_touch_only_the_requested_rect() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let mut guard = texture
        .lock_rect(0, Some(Rect::new(1, 1, 3, 3)), LockFlags::empty())
        .unwrap();
    assert_eq!(guard.bytes().len(), 4);
    assert_eq!(guard.row_pitch(), 2);
    guard.bytes_mut().fill(0xab);
    guard.unlock().unwrap();

    let guard = texture.lock_rect(0, None, LockFlags::READ_ONLY).unwrap();
    let mut expected = [0u8; 16];
    for y in 1..3 {
        for x in 1..3 {
            expected[y * 4 + x] = 0xab;
        }
    }
    assert_eq!(guard.bytes(), &expected);
}

#[test]
fn double_locks_are_rejected_until_unlock() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let guard = texture.lock_rect(0, None, LockFlags::empty()).unwrap();
    assert!(texture.lock_rect(0, None, LockFlags::empty()).is_err());
    guard.unlock().unwrap();
    assert!(texture.lock_rect(0, None, LockFlags::empty()).is_ok());
}

#[test]
fn read_only_conflicts_with_write_intent_flags() {
    let device = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::DYNAMIC, Format::A8, Pool::Managed)
        .unwrap();

    for flags in [
        LockFlags::READ_ONLY | LockFlags::DISCARD,
        LockFlags::READ_ONLY | LockFlags::NO_OVERWRITE,
    ] {
        assert!(texture.lock_rect(0, None, flags).is_err());
    }
}

#[test]
fn discard_zero_fills_only_dynamic_resources() {
    let device = headless_device();
    let dynamic = device
        .create_texture(2, 2, 1, UsageFlags::DYNAMIC, Format::A8, Pool::Managed)
        .unwrap();
    let plain = device
        .create_texture(2, 2, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    for texture in [&dynamic, &plain] {
        let mut guard = texture.lock_rect(0, None, LockFlags::empty()).unwrap();
        guard.bytes_mut().fill(0xff);
        guard.unlock().unwrap();
    }

    let guard = dynamic.lock_rect(0, None, LockFlags::DISCARD).unwrap();
    assert_eq!(guard.bytes(), &[0u8; 4]);
    drop(guard);

    // Without DYNAMIC the discard request is ignored and the previous
    // contents come back.
    let guard = plain.lock_rect(0, None, LockFlags::DISCARD).unwrap();
    assert_eq!(guard.bytes(), &[0xffu8; 4]);
}

#[test]
fn discard_locks_hand_back_zeroed_dynamic_buffers() {
    let device = headless_device();
    let vb = device
        .create_vertex_buffer(8, UsageFlags::DYNAMIC, 0, Pool::Default)
        .unwrap();

    let mut guard = vb.lock(0, 0, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0xee);
    guard.unlock().unwrap();

    let mut guard = vb.lock(0, 0, LockFlags::DISCARD).unwrap();
    assert_eq!(guard.bytes(), &[0u8; 8]);
    guard.bytes_mut()[..4].fill(0x99);
    guard.unlock().unwrap();

    let guard = vb.lock(0, 0, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[0x99, 0x99, 0x99, 0x99, 0, 0, 0, 0]);
}

#[test]
fn default_pool_locks_round_trip_through_gpu_storage() {
    let device = headless_device();
    let texture = device
        .create_texture(2, 2, 1, UsageFlags::empty(), Format::A8, Pool::Default)
        .unwrap();

    let mut guard = texture.lock_rect(0, None, LockFlags::empty()).unwrap();
    assert_eq!(guard.bytes(), &[0u8; 4]);
    guard.bytes_mut().copy_from_slice(&[1, 2, 3, 4]);
    guard.unlock().unwrap();

    let guard = texture.lock_rect(0, None, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[1, 2, 3, 4]);
}

#[test]
fn back_buffers_and_render_targets_are_not_lockable() {
    let device = headless_device();

    let back = device.back_buffer(0).unwrap();
    assert_eq!(
        back.lock_rect(None, LockFlags::empty()).map(|_| ()),
        Err(D3dError::InvalidCall)
    );

    let target = device.create_render_target(16, 16, Format::X8R8G8B8).unwrap();
    assert_eq!(
        target.lock_rect(None, LockFlags::empty()).map(|_| ()),
        Err(D3dError::InvalidCall)
    );
}

#[test]
fn image_surfaces_lock_without_gpu_storage() {
    let device = headless_device();
    let surface = device.create_image_surface(8, 4, Format::A8R8G8B8).unwrap();
    assert_eq!(surface.gpu_handle(), None);

    let mut guard = surface.lock_rect(None, LockFlags::empty()).unwrap();
    assert_eq!(guard.bytes().len(), 8 * 4 * 4);
    guard.bytes_mut().fill(0x33);
    guard.unlock().unwrap();

    let guard = surface.lock_rect(None, LockFlags::READ_ONLY).unwrap();
    assert!(guard.bytes().iter().all(|&b| b == 0x33));
}

#[test]
fn buffer_locks_resolve_byte_ranges() {
    let device = headless_device();
    let vb = device
        .create_vertex_buffer(64, UsageFlags::empty(), 0, Pool::Managed)
        .unwrap();

    let mut guard = vb.lock(0, 0, LockFlags::empty()).unwrap();
    assert_eq!(guard.bytes().len(), 64);
    for (i, byte) in guard.bytes_mut().iter_mut().enumerate() {
        *byte = i as u8;
    }
    guard.unlock().unwrap();

    let guard = vb.lock(4, 8, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[4, 5, 6, 7, 8, 9, 10, 11]);
    drop(guard);

    assert!(vb.lock(64, 0, LockFlags::empty()).is_err());
    assert!(vb.lock(60, 8, LockFlags::empty()).is_err());
}

#[test]
fn default_pool_buffers_round_trip_through_gpu_storage() {
    let device = headless_device();
    let vb = device
        .create_vertex_buffer(16, UsageFlags::empty(), 0, Pool::Default)
        .unwrap();

    let mut guard = vb.lock(0, 0, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x77);
    guard.unlock().unwrap();

    let guard = vb.lock(8, 4, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[0x77u8; 4]);
}

#[test]
fn index_buffer_size_must_match_the_index_stride() {
    let device = headless_device();

    assert_eq!(
        device
            .create_index_buffer(10, UsageFlags::empty(), prism_d3d8::IndexFormat::U32, Pool::Managed)
            .map(|_| ())
            .unwrap_err(),
        D3dError::InvalidCall
    );
    assert!(device
        .create_index_buffer(10, UsageFlags::empty(), prism_d3d8::IndexFormat::U16, Pool::Managed)
        .is_ok());
}

#[test]
fn cube_faces_lock_independently() {
    let device = headless_device();
    let cube = device
        .create_cube_texture(4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    // Two faces locked at the same time; they are distinct subresources.
    let mut px = cube
        .lock_face_rect(CubeFace::PositiveX, 0, None, LockFlags::empty())
        .unwrap();
    let mut nz = cube
        .lock_face_rect(CubeFace::NegativeZ, 0, None, LockFlags::empty())
        .unwrap();
    px.bytes_mut().fill(0x11);
    nz.bytes_mut().fill(0x66);
    px.unlock().unwrap();
    nz.unlock().unwrap();

    let guard = cube
        .lock_face_rect(CubeFace::PositiveX, 0, None, LockFlags::READ_ONLY)
        .unwrap();
    assert_eq!(guard.bytes(), &[0x11u8; 16]);
    drop(guard);
    let guard = cube
        .lock_face_rect(CubeFace::NegativeZ, 0, None, LockFlags::READ_ONLY)
        .unwrap();
    assert_eq!(guard.bytes(), &[0x66u8; 16]);
}

#[test]
fn face_surfaces_delegate_locking_to_the_texture() {
    let device = headless_device();
    let cube = device
        .create_cube_texture(4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();
    let face = cube.face_surface(CubeFace::NegativeY, 0).unwrap();

    let mut guard = face.lock_rect(None, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x42);
    guard.unlock().unwrap();

    // The face is locked through the texture's bookkeeping, so the direct
    // path sees the same bytes and the same double-lock protection.
    let guard = cube
        .lock_face_rect(CubeFace::NegativeY, 0, None, LockFlags::READ_ONLY)
        .unwrap();
    assert_eq!(guard.bytes(), &[0x42u8; 16]);
    assert!(face.lock_rect(None, LockFlags::empty()).is_err());
}

#[test]
fn volume_locks_address_slices() {
    let device = headless_device();
    let volume = device
        .create_volume_texture(2, 2, 2, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    let mut guard = volume
        .lock_box(0, Some(Box3::new(0, 0, 1, 2, 2, 2)), LockFlags::empty())
        .unwrap();
    assert_eq!(guard.bytes().len(), 4);
    guard.bytes_mut().fill(0x7f);
    guard.unlock().unwrap();

    let guard = volume.lock_box(0, None, LockFlags::READ_ONLY).unwrap();
    assert_eq!(&guard.bytes()[..4], &[0u8; 4]);
    assert_eq!(&guard.bytes()[4..], &[0x7fu8; 4]);
}

#[test]
fn mip_levels_lock_their_own_extent() {
    let device = headless_device();
    let texture = device
        .create_texture(8, 8, 0, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();
    assert_eq!(texture.levels(), 4);

    let guard = texture.lock_rect(2, None, LockFlags::empty()).unwrap();
    assert_eq!(guard.bytes().len(), 4);
    drop(guard);

    assert!(texture.lock_rect(4, None, LockFlags::empty()).is_err());
}
