//! Command buffer pool and recorder.

use std::cell::{Cell, RefCell};
use ash::vk;
use lumen_rhi_derive::DeviceObject;
use crate::barrier::BarrierBatch;
use crate::device::{set_debug_name_handle, DebuggableObject, Device, DeviceRef};
use crate::error::{RhiError, VkResultExt};
use crate::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::queue::Queue;

/// Handles created once and handed out again, in creation order, after every rewind.
struct Recycled<H> {
    items: RefCell<Vec<H>>,
    next_index: Cell<usize>,
}

impl<H: Copy> Recycled<H> {
    fn new() -> Self {
        Self { items: RefCell::new(Vec::new()), next_index: Cell::new(0) }
    }

    /// The next cached handle, or one made by `create` from its index.
    ///
    /// A failed `create` leaves the cursor where it was.
    fn next<E>(&self, create: impl FnOnce(usize) -> Result<H, E>) -> Result<H, E> {
        let index = self.next_index.get();
        let cached = self.items.borrow().get(index).copied();
        let item = match cached {
            Some(item) => item,
            None => {
                let item = create(index)?;
                self.items.borrow_mut().push(item);
                item
            }
        };
        self.next_index.set(index + 1);
        Ok(item)
    }

    fn rewind(&self) {
        self.next_index.set(0);
    }
}

/// Transient command pool that hands out primary command buffers.
///
/// Buffers are kept across [`reset`](Self::reset) and handed out again in
/// allocation order, so a steady frame allocates nothing.
#[DeviceObject(named)]
pub struct CommandPool {
    pool: vk::CommandPool,
    buffers: Recycled<vk::CommandBuffer>,
}

impl CommandPool {
    pub fn new(device: &Device, name: &str, queue: &Queue) -> Result<Self, RhiError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None).vk("vkCreateCommandPool")? };
        let pool = Self {
            pool,
            buffers: Recycled::new(),
            device: device.shared().clone(),
            name: name.to_owned(),
        };
        pool.set_debug_name();
        Ok(pool)
    }

    /// Get a command list in the initial state.
    pub fn allocate(&self) -> Result<CommandList<'_>, RhiError> {
        let cmd = self.buffers.next(|index| -> Result<vk::CommandBuffer, RhiError> {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let buffers =
                unsafe { self.device.raw.allocate_command_buffers(&alloc_info).vk("vkAllocateCommandBuffers")? };
            let cmd = buffers[0];
            set_debug_name_handle(&self.device, cmd, &format!("{}.cmd{index}", self.name));
            Ok(cmd)
        })?;
        Ok(CommandList { device: &self.device, cmd })
    }

    /// Return every command buffer to the initial state.
    ///
    /// None of them may still be executing.
    pub fn reset(&self) -> Result<(), RhiError> {
        self.buffers.rewind();
        unsafe {
            self.device
                .raw
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .vk("vkResetCommandPool")
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl DebuggableObject for CommandPool {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.pool, &self.name);
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_command_pool(self.pool, None);
        }
    }
}

/// Records into one command buffer of a [`CommandPool`].
pub struct CommandList<'a> {
    device: &'a DeviceRef,
    cmd: vk::CommandBuffer,
}

impl CommandList<'_> {
    #[inline]
    fn raw(&self) -> &ash::Device {
        &self.device.raw
    }

    pub fn begin(&self) -> Result<(), RhiError> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.raw().begin_command_buffer(self.cmd, &begin_info).vk("vkBeginCommandBuffer") }
    }

    pub fn end(&self) -> Result<(), RhiError> {
        unsafe { self.raw().end_command_buffer(self.cmd).vk("vkEndCommandBuffer") }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.cmd)
            .device_mask(0)
    }

    /// Record every pending barrier of `batch` as one dependency and empty it.
    pub fn barrier(&self, batch: &mut BarrierBatch) {
        if batch.is_empty() {
            return;
        }
        unsafe { self.raw().cmd_pipeline_barrier2(self.cmd, &batch.dependency()) }
        batch.clear();
    }

    // Transfer commands
    pub fn clear_image(&self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        let clear_value = vk::ClearColorValue { float32: color };
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(vk::REMAINING_MIP_LEVELS)
            .layer_count(vk::REMAINING_ARRAY_LAYERS);
        unsafe { self.raw().cmd_clear_color_image(self.cmd, image, layout, &clear_value, &[range]) }
    }

    /// Copy all of `src` onto all of `dst` with linear filtering.
    ///
    /// `src` must be in `TRANSFER_SRC_OPTIMAL` and `dst` in `TRANSFER_DST_OPTIMAL`.
    pub fn blit_image(&self, src: vk::Image, src_extent: vk::Extent2D, dst: vk::Image, dst_extent: vk::Extent2D) {
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);

        let region = vk::ImageBlit2::default()
            .src_subresource(subresource)
            .src_offsets([vk::Offset3D::default(), corner(src_extent)])
            .dst_subresource(subresource)
            .dst_offsets([vk::Offset3D::default(), corner(dst_extent)]);

        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(std::slice::from_ref(&region));

        unsafe { self.raw().cmd_blit_image2(self.cmd, &blit_info) }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        if regions.is_empty() {
            return;
        }
        unsafe { self.raw().cmd_copy_buffer(self.cmd, src, dst, regions) }
    }

    // Pipeline commands
    pub fn bind_compute_pipeline(&self, pipeline: &ComputePipeline) {
        unsafe { self.raw().cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::COMPUTE, pipeline.handle()) }
    }

    pub fn bind_graphics_pipeline(&self, pipeline: &GraphicsPipeline) {
        unsafe { self.raw().cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle()) }
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.raw().cmd_bind_descriptor_sets(self.cmd, bind_point, layout, first_set, descriptor_sets, &[])
        }
    }

    pub fn push_constants<T: bytemuck::Pod>(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &T) {
        unsafe { self.raw().cmd_push_constants(self.cmd, layout, stages, 0, bytemuck::bytes_of(data)) }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe { self.raw().cmd_bind_index_buffer(self.cmd, buffer, offset, vk::IndexType::UINT32) }
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe { self.raw().cmd_dispatch(self.cmd, group_count_x, group_count_y, group_count_z) }
    }

    // Dynamic rendering (Vulkan 1.3)
    pub fn begin_rendering(&self, info: &vk::RenderingInfo) {
        unsafe { self.raw().cmd_begin_rendering(self.cmd, info) }
    }

    pub fn end_rendering(&self) {
        unsafe { self.raw().cmd_end_rendering(self.cmd) }
    }

    // Dynamic state commands
    pub fn set_viewport(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.raw().cmd_set_viewport(self.cmd, 0, &[viewport]) }
    }

    pub fn set_scissor(&self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D { offset: vk::Offset2D::default(), extent };
        unsafe { self.raw().cmd_set_scissor(self.cmd, 0, &[scissor]) }
    }

    // Draw commands
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.raw().cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, first_instance) }
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.raw()
                .cmd_draw_indexed(self.cmd, index_count, instance_count, first_index, vertex_offset, first_instance)
        }
    }
}

fn corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

/// Records one command list, submits it and blocks until the queue drains.
///
/// Meant for load-time work only, never for the frame path.
pub struct ImmediateSubmit<'a> {
    queue: &'a Queue,
    pool: CommandPool,
}

impl<'a> ImmediateSubmit<'a> {
    pub fn new(device: &Device, queue: &'a Queue) -> Result<Self, RhiError> {
        let pool = CommandPool::new(device, "command_pool.immediate", queue)?;
        Ok(Self { queue, pool })
    }

    #[profiling::function]
    pub fn submit_and_wait<F>(&self, record: F) -> Result<(), RhiError>
    where
        F: FnOnce(&CommandList),
    {
        self.pool.reset()?;

        let cmd = self.pool.allocate()?;
        cmd.begin()?;
        record(&cmd);
        cmd.end()?;

        self.queue.submit(&[cmd.submit_info()], &[], &[])?;
        self.queue.wait_idle()
    }

    #[inline]
    pub fn queue(&self) -> &Queue { self.queue }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handed_out_again_in_creation_order() {
        let recycled = Recycled::new();
        let created = Cell::new(0);
        let create = |index: usize| {
            created.set(created.get() + 1);
            Ok::<_, ()>(index * 10)
        };

        assert_eq!(recycled.next(create), Ok(0));
        assert_eq!(recycled.next(create), Ok(10));
        recycled.rewind();
        assert_eq!(recycled.next(create), Ok(0));
        assert_eq!(recycled.next(create), Ok(10));
        assert_eq!(recycled.next(create), Ok(20));
        assert_eq!(created.get(), 3);
    }

    #[test]
    fn failed_creation_keeps_the_cursor() {
        let recycled = Recycled::new();
        assert_eq!(recycled.next(|index| Ok::<_, ()>(index)), Ok(0));
        assert_eq!(recycled.next(|_| Err::<usize, _>("out of memory")), Err("out of memory"));

        // The retry gets the index the failed attempt was meant to fill.
        assert_eq!(recycled.next(|index| Ok::<_, &str>(index)), Ok(1));
        recycled.rewind();
        assert_eq!(recycled.next(|_| Err::<usize, _>("unused")), Ok(0));
        assert_eq!(recycled.next(|_| Err::<usize, _>("unused")), Ok(1));
    }
}
