//! Creation rules: validation order, pool constraints, all-or-nothing failure.

use prism_d3d8::{
    Box3, D3dError, Device, Format, LevelDesc, LockFlags, Pool, PresentParams, Rect,
    TextureBinding, UsageFlags,
};
use prism_gpu::{GpuExecutor, RecordingBlitTarget, SoftwareBackendControls};
use pretty_assertions::assert_eq;

fn headless_device() -> (Device, SoftwareBackendControls) {
    let (executor, gpu) = GpuExecutor::with_software_backend();
    let params = PresentParams {
        width: 64,
        height: 48,
        format: Format::X8R8G8B8,
        buffer_count: 1,
        window: None,
    };
    let device =
        Device::create(executor, Box::new(RecordingBlitTarget::new()), params).unwrap();
    (device, gpu)
}

#[test]
fn failed_allocations_leave_nothing_behind() {
    let (device, gpu) = headless_device();
    assert_eq!(gpu.live_allocations(), 1);

    gpu.fail_next_allocs(1);
    assert_eq!(
        device
            .create_texture(16, 16, 1, UsageFlags::empty(), Format::A8R8G8B8, Pool::Managed)
            .map(|_| ())
            .unwrap_err(),
        D3dError::OutOfMemory
    );

    assert_eq!(device.live_resources(), 0);
    assert_eq!(device.stats().resources_created, 0);
    assert_eq!(gpu.live_allocations(), 1);
}

#[test]
fn format_usage_mismatches_are_not_available() {
    let (device, _gpu) = headless_device();

    assert_eq!(
        device
            .create_texture(8, 8, 1, UsageFlags::RENDER_TARGET, Format::A8, Pool::Default)
            .map(|_| ())
            .unwrap_err(),
        D3dError::NotAvailable
    );
    assert_eq!(
        device
            .create_texture(
                8,
                8,
                1,
                UsageFlags::DEPTH_STENCIL,
                Format::A8R8G8B8,
                Pool::Default,
            )
            .map(|_| ())
            .unwrap_err(),
        D3dError::NotAvailable
    );
    // Depth formats demand depth-stencil usage.
    assert_eq!(
        device
            .create_texture(8, 8, 1, UsageFlags::empty(), Format::D16, Pool::Default)
            .map(|_| ())
            .unwrap_err(),
        D3dError::NotAvailable
    );
    assert_eq!(
        device
            .create_render_target(8, 8, Format::D16)
            .map(|_| ())
            .unwrap_err(),
        D3dError::NotAvailable
    );
    assert_eq!(
        device
            .create_depth_stencil_surface(8, 8, Format::X8R8G8B8)
            .map(|_| ())
            .unwrap_err(),
        D3dError::NotAvailable
    );
}

#[test]
fn render_target_usage_is_confined_to_the_default_pool() {
    let (device, _gpu) = headless_device();

    for pool in [Pool::Managed, Pool::SystemMem, Pool::Scratch] {
        assert_eq!(
            device
                .create_texture(8, 8, 1, UsageFlags::RENDER_TARGET, Format::X8R8G8B8, pool)
                .map(|_| ())
                .unwrap_err(),
            D3dError::InvalidCall
        );
    }
    assert!(device
        .create_texture(
            8,
            8,
            1,
            UsageFlags::RENDER_TARGET,
            Format::X8R8G8B8,
            Pool::Default,
        )
        .is_ok());
}

#[test]
fn scratch_textures_live_entirely_in_cpu_memory() {
    let (device, gpu) = headless_device();
    let allocs_before = gpu.total_allocations();

    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Scratch)
        .unwrap();
    assert_eq!(texture.gpu_handle(), None);
    assert_eq!(gpu.total_allocations(), allocs_before);

    let mut guard = texture.lock_rect(0, None, LockFlags::empty()).unwrap();
    guard.bytes_mut().fill(0x2e);
    guard.unlock().unwrap();
    let guard = texture.lock_rect(0, None, LockFlags::READ_ONLY).unwrap();
    assert_eq!(guard.bytes(), &[0x2eu8; 16]);
    drop(guard);

    // Dirty marks have nowhere to go and binds move no bytes.
    texture.add_dirty_rect(None).unwrap();
    device
        .set_texture(0, Some(TextureBinding::Texture2d(texture)))
        .unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 0);
}

#[test]
fn mip_chain_descriptors_report_level_extents() {
    let (device, _gpu) = headless_device();
    let texture = device
        .create_texture(8, 4, 0, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();
    assert_eq!(texture.levels(), 4);

    assert_eq!(
        texture.level_desc(0).unwrap(),
        LevelDesc {
            width: 8,
            height: 4,
            depth: 1,
            format: Format::A8,
        }
    );
    assert_eq!(
        texture.level_desc(3).unwrap(),
        LevelDesc {
            width: 1,
            height: 1,
            depth: 1,
            format: Format::A8,
        }
    );
    assert_eq!(texture.level_desc(4), Err(D3dError::InvalidCall));
}

#[test]
fn volume_dirty_boxes_flush_on_bind() {
    let (device, _gpu) = headless_device();
    let volume = device
        .create_volume_texture(4, 4, 2, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    volume
        .add_dirty_box(Some(Box3::new(0, 0, 0, 2, 2, 1)))
        .unwrap();
    device
        .set_texture(0, Some(TextureBinding::VolumeTexture(volume.clone())))
        .unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 1);

    volume.add_dirty_box(None).unwrap();
    device
        .set_texture(0, Some(TextureBinding::VolumeTexture(volume)))
        .unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 2);
}

#[test]
fn inverted_dirty_rects_are_rejected_without_side_effects() {
    let (device, _gpu) = headless_device();
    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();

    assert_eq!(
        texture.add_dirty_rect(Some(Rect::new(3, 3, 1, 1))),
        Err(D3dError::InvalidCall)
    );
    device
        .set_texture(0, Some(TextureBinding::Texture2d(texture)))
        .unwrap();
    assert_eq!(device.stats().dirty_flush_uploads, 0);
}

#[test]
fn creation_and_destruction_are_counted() {
    let (device, _gpu) = headless_device();

    let texture = device
        .create_texture(4, 4, 1, UsageFlags::empty(), Format::A8, Pool::Managed)
        .unwrap();
    let vb = device
        .create_vertex_buffer(32, UsageFlags::empty(), 0, Pool::Managed)
        .unwrap();
    let surface = device.create_image_surface(4, 4, Format::A8R8G8B8).unwrap();

    assert_eq!(device.live_resources(), 3);
    assert_eq!(device.stats().resources_created, 3);

    drop(texture);
    drop(vb);
    drop(surface);
    assert_eq!(device.live_resources(), 0);
    assert_eq!(device.stats().resources_destroyed, 3);
}
