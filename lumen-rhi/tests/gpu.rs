//! Tests that talk to a real Vulkan device.

use std::sync::Arc;
use std::time::Duration;
use lumen_rhi::{
    readback_buffer, upload_mesh, vk, Buffer, Context, DescriptorAllocator, DescriptorAllocatorConfig,
    DescriptorLayout, Device, LayoutBinding, PoolSizeRatio, RhiError, Timeline, TimelineSemaphore,
};

fn headless_device() -> Device {
    let context = Arc::new(Context::headless().expect("failed to create a headless context"));
    Device::new(context).expect("no suitable adapter")
}

fn upload_and_read_back(device: &Device, indices: &[u32]) -> Vec<u32> {
    let vertices: Vec<[f32; 4]> = vec![[0.0, 1.0, 2.0, 3.0]];
    let mesh = upload_mesh(device, "readback", &vertices, indices).unwrap();
    assert_eq!(mesh.index_count as usize, indices.len());

    let bytes = readback_buffer(device, &mesh.index_buffer).unwrap();
    bytes
        .chunks_exact(size_of::<u32>())
        .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[test]
#[ignore] // This test requires a GPU, so ignore the test by default.
fn mesh_upload_round_trips() {
    let device = headless_device();

    assert!(upload_and_read_back(&device, &[]).is_empty());
    assert_eq!(upload_and_read_back(&device, &[7]), vec![7]);

    // More than 64 KiB, past what a single inline update could carry.
    let large: Vec<u32> = (0..20_000).collect();
    assert_eq!(upload_and_read_back(&device, &large), large);
}

#[test]
#[ignore] // This test requires a GPU, so ignore the test by default.
fn mesh_vertices_are_addressable() {
    let device = headless_device();
    let vertices: Vec<[f32; 4]> = (0..4).map(|i| [i as f32; 4]).collect();
    let mesh = upload_mesh(&device, "quad", &vertices, &[0, 1, 2, 2, 1, 3]).unwrap();

    assert_ne!(mesh.vertex_buffer_address, 0);
    let bytes = readback_buffer(&device, &mesh.vertex_buffer).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<_, u8>(&vertices));
}

#[test]
#[ignore] // This test requires a GPU, so ignore the test by default.
fn descriptor_allocator_grows_past_one_pool() {
    let device = headless_device();
    let layout = DescriptorLayout::new(
        &device,
        "layout.storage_image",
        &[LayoutBinding::new(0, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)],
    )
    .unwrap();

    let config = DescriptorAllocatorConfig {
        sets_per_pool: 4,
        ratios: vec![PoolSizeRatio { ty: vk::DescriptorType::STORAGE_IMAGE, ratio: 1.0 }],
    };
    let mut allocator = DescriptorAllocator::new(&device, "descriptors.test", &config);

    let sets: Vec<_> = (0..10).map(|_| allocator.allocate(&layout).unwrap()).collect();
    assert_eq!(sets.len(), 10);
    assert!(allocator.pool_count() >= 3);

    let pools = allocator.pool_count();
    allocator.reset().unwrap();
    for _ in 0..10 {
        allocator.allocate(&layout).unwrap();
    }
    assert_eq!(allocator.pool_count(), pools);
}

#[test]
#[ignore] // This test requires a GPU, so ignore the test by default.
fn timeline_wait_returns_after_host_signal() {
    let device = headless_device();
    let timeline = TimelineSemaphore::new(&device, "timeline.test", 0).unwrap();
    assert_eq!(timeline.value().unwrap(), 0);

    timeline.signal(3).unwrap();
    timeline.wait(2, Duration::from_secs(1)).unwrap();
    assert_eq!(timeline.value().unwrap(), 3);

    let result = timeline.wait(10, Duration::from_millis(1));
    assert!(matches!(result, Err(RhiError::Timeout { value: 10 })));
}

#[test]
#[ignore] // This test requires a GPU, so ignore the test by default.
fn host_writes_outside_a_buffer_are_rejected() {
    let device = headless_device();
    let mut buffer = Buffer::new(&device, &lumen_rhi::BufferDesc::staging("staging.small", 16)).unwrap();

    buffer.write(8, &[1; 8]).unwrap();
    assert!(matches!(buffer.write(12, &[0; 8]), Err(RhiError::OutOfRange { end: 20, size: 16, .. })));
}
