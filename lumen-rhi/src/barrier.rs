//! Resource state transitions, batched into one `vkCmdPipelineBarrier2` each.

use ash::vk;
use lumen_core::collections::SmallVec;
use crate::buffer::Buffer;
use crate::image::Image;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferState {
    Undefined,
    HostWrite,
    TransferSrc,
    TransferDst,
    Uniform,
    Storage,
    Vertex,
    Index,
}

impl BufferState {
    pub fn into_pipeline_stage(self, shader_used_stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
        match self {
            BufferState::Undefined => vk::PipelineStageFlags2::NONE,
            BufferState::HostWrite => vk::PipelineStageFlags2::HOST,
            BufferState::TransferSrc |
            BufferState::TransferDst => vk::PipelineStageFlags2::TRANSFER,
            BufferState::Uniform |
            BufferState::Storage => shader_used_stage,
            BufferState::Vertex => vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
            BufferState::Index => vk::PipelineStageFlags2::INDEX_INPUT,
        }
    }

    pub fn into_access_flag(self, is_readonly: bool) -> vk::AccessFlags2 {
        match self {
            BufferState::Undefined => vk::AccessFlags2::NONE,
            BufferState::HostWrite => vk::AccessFlags2::HOST_WRITE,
            BufferState::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            BufferState::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            BufferState::Uniform => vk::AccessFlags2::UNIFORM_READ,
            BufferState::Storage => if is_readonly {
                vk::AccessFlags2::SHADER_STORAGE_READ
            } else {
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE
            },
            BufferState::Vertex => vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            BufferState::Index => vk::AccessFlags2::INDEX_READ,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageState {
    Undefined,
    TransferSrc,
    TransferDst,
    Sampled,
    Storage,
    General,
    Color,
    DepthStencil,
    Present,
}

impl ImageState {
    pub fn into_pipeline_stage(self, shader_used_stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
        match self {
            ImageState::Undefined => vk::PipelineStageFlags2::NONE,
            ImageState::TransferSrc |
            ImageState::TransferDst => vk::PipelineStageFlags2::TRANSFER,
            ImageState::Sampled |
            ImageState::Storage |
            ImageState::General => shader_used_stage,
            ImageState::Color => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ImageState::DepthStencil => vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            ImageState::Present => vk::PipelineStageFlags2::NONE,
        }
    }

    pub fn into_access_flag(self, is_readonly: bool) -> vk::AccessFlags2 {
        match self {
            ImageState::Undefined => vk::AccessFlags2::NONE,
            ImageState::TransferSrc => vk::AccessFlags2::TRANSFER_READ,
            ImageState::TransferDst => vk::AccessFlags2::TRANSFER_WRITE,
            ImageState::Sampled => vk::AccessFlags2::SHADER_SAMPLED_READ,
            ImageState::Storage => if is_readonly {
                vk::AccessFlags2::SHADER_STORAGE_READ
            } else {
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE
            },
            ImageState::General => if is_readonly {
                vk::AccessFlags2::MEMORY_READ
            } else {
                vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE
            },
            ImageState::Color => if is_readonly {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ
            } else {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            },
            ImageState::DepthStencil => if is_readonly {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
            } else {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            },
            ImageState::Present => vk::AccessFlags2::NONE,
        }
    }

    pub fn into_image_layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::Sampled => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageState::Storage |
            ImageState::General => vk::ImageLayout::GENERAL,
            ImageState::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageState::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ImageState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// Optional queue family ownership transfer carried by a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct QueueTransfer {
    src_family: u32,
    dst_family: u32,
}

impl Default for QueueTransfer {
    fn default() -> Self {
        Self {
            src_family: vk::QUEUE_FAMILY_IGNORED,
            dst_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }
}

/// Transition of a whole image (every mip level and layer).
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    src_state: ImageState,
    dst_state: ImageState,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    readonly: bool,
    discard: bool,
    queue: QueueTransfer,
}

impl ImageBarrier {
    pub fn new(image: &Image, src_state: ImageState, dst_state: ImageState) -> Self {
        Self::raw(image.handle(), image.aspect(), src_state, dst_state)
    }

    /// For images the RHI does not own, e.g. swapchain images.
    pub fn raw(image: vk::Image, aspect: vk::ImageAspectFlags, src_state: ImageState, dst_state: ImageState) -> Self {
        Self {
            image,
            aspect,
            src_state,
            dst_state,
            src_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            readonly: false,
            discard: false,
            queue: QueueTransfer::default(),
        }
    }

    /// Shader stages used for the shader-access states (sampled, storage, general).
    pub fn shader_stages(mut self, src: vk::PipelineStageFlags2, dst: vk::PipelineStageFlags2) -> Self {
        self.src_stage = src;
        self.dst_stage = dst;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// The previous contents are not needed, transition from `UNDEFINED`.
    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }

    pub fn queue_transfer(mut self, src_family: u32, dst_family: u32) -> Self {
        self.queue = QueueTransfer { src_family, dst_family };
        self
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        let old_layout = if self.discard {
            vk::ImageLayout::UNDEFINED
        } else {
            self.src_state.into_image_layout()
        };

        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(self.src_state.into_pipeline_stage(self.src_stage))
            .src_access_mask(self.src_state.into_access_flag(self.readonly))
            .dst_stage_mask(self.dst_state.into_pipeline_stage(self.dst_stage))
            .dst_access_mask(self.dst_state.into_access_flag(self.readonly))
            .src_queue_family_index(self.queue.src_family)
            .dst_queue_family_index(self.queue.dst_family)
            .old_layout(old_layout)
            .new_layout(self.dst_state.into_image_layout())
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BufferBarrier {
    buffer: vk::Buffer,
    src_state: BufferState,
    dst_state: BufferState,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    readonly: bool,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    queue: QueueTransfer,
}

impl BufferBarrier {
    pub fn new(buffer: &Buffer, src_state: BufferState, dst_state: BufferState) -> Self {
        Self::raw(buffer.handle(), src_state, dst_state)
    }

    pub fn raw(buffer: vk::Buffer, src_state: BufferState, dst_state: BufferState) -> Self {
        Self {
            buffer,
            src_state,
            dst_state,
            src_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags2::ALL_COMMANDS,
            readonly: false,
            offset: 0,
            size: vk::WHOLE_SIZE,
            queue: QueueTransfer::default(),
        }
    }

    /// Shader stages used for the uniform and storage states.
    pub fn shader_stages(mut self, src: vk::PipelineStageFlags2, dst: vk::PipelineStageFlags2) -> Self {
        self.src_stage = src;
        self.dst_stage = dst;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn queue_transfer(mut self, src_family: u32, dst_family: u32) -> Self {
        self.queue = QueueTransfer { src_family, dst_family };
        self
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(self.src_state.into_pipeline_stage(self.src_stage))
            .src_access_mask(self.src_state.into_access_flag(self.readonly))
            .dst_stage_mask(self.dst_state.into_pipeline_stage(self.dst_stage))
            .dst_access_mask(self.dst_state.into_access_flag(self.readonly))
            .src_queue_family_index(self.queue.src_family)
            .dst_queue_family_index(self.queue.dst_family)
            .buffer(self.buffer)
            .offset(self.offset)
            .size(self.size)
    }
}

/// A global memory barrier that does not target a specific buffer or image.
#[derive(Clone, Copy, Debug)]
pub struct MemoryBarrier {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl MemoryBarrier {
    pub fn new(
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) -> Self {
        Self { src_stage, src_access, dst_stage, dst_access }
    }

    /// Make all writes visible to everything that follows.
    pub fn flush_all_writes() -> Self {
        Self::new(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_WRITE,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        )
    }

    pub fn to_vk(&self) -> vk::MemoryBarrier2<'static> {
        vk::MemoryBarrier2::default()
            .src_stage_mask(self.src_stage)
            .src_access_mask(self.src_access)
            .dst_stage_mask(self.dst_stage)
            .dst_access_mask(self.dst_access)
    }
}

/// Pending transitions, recorded as a single dependency.
///
/// Flushed through [`CommandList::barrier`](crate::CommandList::barrier), which
/// leaves the batch empty for reuse.
#[derive(Default)]
pub struct BarrierBatch {
    memory: SmallVec<[vk::MemoryBarrier2<'static>; 1]>,
    buffers: SmallVec<[vk::BufferMemoryBarrier2<'static>; 4]>,
    images: SmallVec<[vk::ImageMemoryBarrier2<'static>; 4]>,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&mut self, barrier: ImageBarrier) -> &mut Self {
        self.images.push(barrier.to_vk());
        self
    }

    pub fn buffer(&mut self, barrier: BufferBarrier) -> &mut Self {
        self.buffers.push(barrier.to_vk());
        self
    }

    pub fn memory(&mut self, barrier: MemoryBarrier) -> &mut Self {
        self.memory.push(barrier.to_vk());
        self
    }

    /// The dependency covering every pending barrier.
    pub fn dependency(&self) -> vk::DependencyInfo<'_> {
        vk::DependencyInfo::default()
            .memory_barriers(&self.memory)
            .buffer_memory_barriers(&self.buffers)
            .image_memory_barriers(&self.images)
    }

    pub fn clear(&mut self) {
        self.memory.clear();
        self.buffers.clear();
        self.images.clear();
    }

    pub fn len(&self) -> usize {
        self.memory.len() + self.buffers.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn image() -> vk::Image {
        vk::Image::from_raw(0x1000)
    }

    #[test]
    fn image_barrier_derives_stage_access_and_layout() {
        let barrier = ImageBarrier::raw(image(), vk::ImageAspectFlags::COLOR, ImageState::General, ImageState::TransferSrc)
            .shader_stages(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::PipelineStageFlags2::NONE)
            .to_vk();

        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_READ);
        assert_eq!(barrier.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn discard_starts_from_undefined() {
        let barrier = ImageBarrier::raw(image(), vk::ImageAspectFlags::COLOR, ImageState::Present, ImageState::TransferDst)
            .discard()
            .to_vk();
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn queue_ownership_transfer() {
        let barrier = BufferBarrier::raw(vk::Buffer::from_raw(0x2000), BufferState::TransferDst, BufferState::Vertex)
            .queue_transfer(2, 0)
            .to_vk();
        assert_eq!(barrier.src_queue_family_index, 2);
        assert_eq!(barrier.dst_queue_family_index, 0);
        assert_eq!(barrier.size, vk::WHOLE_SIZE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);
    }

    #[test]
    fn readonly_storage_drops_write_access() {
        let barrier = BufferBarrier::raw(vk::Buffer::from_raw(0x2000), BufferState::TransferDst, BufferState::Storage)
            .shader_stages(vk::PipelineStageFlags2::NONE, vk::PipelineStageFlags2::VERTEX_SHADER)
            .readonly(true)
            .with_range(16, 64)
            .to_vk();
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::VERTEX_SHADER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::SHADER_STORAGE_READ);
        assert_eq!((barrier.offset, barrier.size), (16, 64));
    }

    #[test]
    fn batch_accumulates_and_clears() {
        let mut batch = BarrierBatch::new();
        assert!(batch.is_empty());

        batch
            .image(ImageBarrier::raw(image(), vk::ImageAspectFlags::COLOR, ImageState::Undefined, ImageState::General))
            .image(ImageBarrier::raw(image(), vk::ImageAspectFlags::COLOR, ImageState::Undefined, ImageState::TransferDst))
            .buffer(BufferBarrier::raw(vk::Buffer::from_raw(0x2000), BufferState::TransferDst, BufferState::Index))
            .memory(MemoryBarrier::flush_all_writes());
        assert_eq!(batch.len(), 4);

        let dependency = batch.dependency();
        assert_eq!(dependency.image_memory_barrier_count, 2);
        assert_eq!(dependency.buffer_memory_barrier_count, 1);
        assert_eq!(dependency.memory_barrier_count, 1);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.dependency().image_memory_barrier_count, 0);
    }
}
