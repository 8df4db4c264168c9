//! Lumen RHI (Render Hardware Interface) - thin, explicit Vulkan 1.3 layer.
//!
//! Every object owns its Vulkan handles and releases them on drop. Objects
//! hold a [`DeviceRef`], so the logical device outlives everything made from it.

pub mod barrier;
pub mod buffer;
pub mod command;
pub mod context;
pub mod deletion;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod queue;
pub mod retire;
pub mod semaphore;
pub mod shader;
pub mod swapchain;
pub mod upload;

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

pub use ash::vk;
pub use gpu_allocator::MemoryLocation;

pub use barrier::{BarrierBatch, BufferBarrier, BufferState, ImageBarrier, ImageState, MemoryBarrier};
pub use buffer::{Buffer, BufferDesc};
pub use command::{CommandList, CommandPool, ImmediateSubmit};
pub use context::{Context, Surface};
pub use deletion::DeletionQueue;
pub use descriptor::{
    DescriptorAllocator, DescriptorAllocatorConfig, DescriptorLayout, DescriptorWriter, LayoutBinding,
    PoolSizeRatio,
};
pub use device::{
    Adapter, DebuggableObject, Device, DeviceRef, DeviceShared, QueueCapabilities, QueueCapability,
    QueueFamilyIndices,
};
pub use error::{BindingError, RhiError, ShaderError};
pub use image::{Image, ImageDesc};
pub use pipeline::{
    create_pipeline_layout, BlendMode, ComputePipeline, GraphicsPipeline, GraphicsPipelineDesc,
    GraphicsPipelineDescBuilder, GraphicsPipelineDescBuilderError,
};
pub use queue::Queue;
pub use retire::RetiredQueue;
pub use semaphore::{BinarySemaphore, Timeline, TimelineSemaphore};
pub use shader::ShaderModule;
pub use swapchain::{Swapchain, SwapchainConfig};
pub use upload::{readback_buffer, upload_mesh, GpuMeshBuffers};
