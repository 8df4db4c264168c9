use std::path::Path;
use std::sync::Arc;
use anyhow::{bail, Context as _};
use glam::Vec4;
use winit::window::Window;
use lumen_rhi::{
    vk, BarrierBatch, Buffer, BufferDesc, ComputePipeline, Context, DescriptorLayout, DescriptorWriter, Device,
    GraphicsPipeline, GraphicsPipelineDescBuilder, Image, ImageBarrier, ImageDesc, ImageState, LayoutBinding,
    RetiredQueue, ShaderModule, Swapchain, Timeline, TimelineSemaphore,
};
use crate::config::RendererConfig;
use crate::frame::{FrameData, FrameRing, SlotWait};
use crate::mesh::{DrawPushConstants, GradientPushConstants, RenderObject, SceneData};

const GRADIENT_GROUP_SIZE: u32 = 16;

/// Where the renderer is inside the begin/draw/end protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    /// A swapchain image was acquired and the slot was reset.
    Recording,
    /// Work was submitted, presentation is pending.
    Submitted,
}

/// Offscreen images the scene is drawn into before the blit to the swapchain.
struct RenderTargets {
    color: Image,
    depth: Image,
}

impl RenderTargets {
    fn new(device: &Device, extent: vk::Extent2D, format: vk::Format) -> Result<Self, lumen_rhi::RhiError> {
        Ok(Self {
            color: Image::new(device, &ImageDesc::draw_target("draw_image", extent.width, extent.height, format))?,
            depth: Image::new(device, &ImageDesc::depth_attachment("depth_image", extent.width, extent.height))?,
        })
    }
}

/// Drives the per-frame protocol on top of the RHI.
///
/// Every frame is `begin_frame` → `draw` → `end_frame`. When `begin_frame`
/// returns `false` the frame is skipped and neither of the others may be called.
pub struct Renderer {
    config: RendererConfig,
    window_extent: vk::Extent2D,
    resize_requested: bool,
    state: FrameState,

    frames: FrameRing<FrameData>,
    targets: RenderTargets,
    retired_targets: RetiredQueue<RenderTargets>,

    scene_layout: DescriptorLayout,
    draw_image_layout: DescriptorLayout,
    gradient_pipeline: ComputePipeline,
    mesh_pipeline: GraphicsPipeline,

    timeline: TimelineSemaphore,
    swapchain: Swapchain,
    device: Device,
}

impl Renderer {
    pub fn new(window: &Window, config: RendererConfig, shader_directory: &Path) -> anyhow::Result<Self> {
        let context = Arc::new(Context::new(window)?);
        let device = Device::new(context)?;

        let size = window.inner_size();
        let window_extent = vk::Extent2D { width: size.width, height: size.height };

        let mut swapchain = Swapchain::new(&device, "swapchain.main", config.swapchain_config())?;
        swapchain.create(window_extent)?;

        let timeline = TimelineSemaphore::new(&device, "timeline.frames", 0)?;
        let frames = FrameRing::new(|index| FrameData::new(&device, index))?;
        let targets = RenderTargets::new(&device, swapchain.extent(), config.draw_format)?;

        let draw_image_layout = DescriptorLayout::new(
            &device,
            "layout.draw_image",
            &[LayoutBinding::new(0, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)],
        )?;
        let scene_layout = DescriptorLayout::new(
            &device,
            "layout.scene",
            &[LayoutBinding::new(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let gradient_shader = ShaderModule::load(&device, shader_directory, "gradient.comp.spv")
            .context("failed to load the background shader")?;
        let gradient_pipeline = ComputePipeline::new(
            &device,
            "pipeline.gradient",
            &gradient_shader,
            &[draw_image_layout.handle()],
            &[push_range::<GradientPushConstants>(vk::ShaderStageFlags::COMPUTE)],
        )?;

        let vertex_shader = ShaderModule::load(&device, shader_directory, "mesh.vert.spv")
            .context("failed to load the mesh vertex shader")?;
        let fragment_shader = ShaderModule::load(&device, shader_directory, "mesh.frag.spv")
            .context("failed to load the mesh fragment shader")?;
        let mesh_desc = GraphicsPipelineDescBuilder::default()
            .vertex_shader(vertex_shader.handle())
            .fragment_shader(fragment_shader.handle())
            .color_formats(vec![config.draw_format])
            .depth_format(vk::Format::D32_SFLOAT)
            .depth_test(true)
            .depth_write(true)
            .build()?;
        let mesh_pipeline = GraphicsPipeline::new(
            &device,
            "pipeline.mesh",
            &mesh_desc,
            &[scene_layout.handle()],
            &[push_range::<DrawPushConstants>(vk::ShaderStageFlags::VERTEX)],
        )?;

        log::info!(
            "Renderer ready: {}x{} {:?}, {} frames in flight",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.present_mode(),
            RendererConfig::FRAMES_IN_FLIGHT,
        );

        Ok(Self {
            config,
            window_extent,
            resize_requested: false,
            state: FrameState::Idle,
            frames,
            targets,
            retired_targets: RetiredQueue::new(),
            scene_layout,
            draw_image_layout,
            gradient_pipeline,
            mesh_pipeline,
            timeline,
            swapchain,
            device,
        })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frames.frame_index()
    }

    #[inline]
    pub fn draw_extent(&self) -> vk::Extent2D {
        self.targets.color.extent_2d()
    }

    /// Note a new window size. The swapchain follows at the next frame boundary.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.resize_requested = true;
    }

    /// Wait for the current slot, reclaim what it left behind and acquire an image.
    ///
    /// Returns `false` when the frame has to be skipped: the window is minimized
    /// or the swapchain went out of date and was recreated.
    #[profiling::function]
    pub fn begin_frame(&mut self) -> anyhow::Result<bool> {
        if self.state != FrameState::Idle {
            bail!("begin_frame called while a frame is {:?}", self.state);
        }

        if self.frames.wait_for_current(&self.timeline, self.config.frame_timeout)? == SlotWait::Waited {
            log::trace!("Waited for frame slot {}", self.frames.slot_index());
        }

        self.frames.current_mut().deletion_queue.flush();

        self.swapchain.cleanup();
        self.retired_targets.reclaim(self.timeline.value()?);

        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(false);
        }
        if self.resize_requested {
            self.recreate_swapchain()?;
        }

        if !self.swapchain.acquire()? {
            log::debug!("Swapchain out of date on acquire, recreating");
            self.recreate_swapchain()?;
            return Ok(false);
        }

        self.frames.current_mut().reset()?;
        self.state = FrameState::Recording;
        Ok(true)
    }

    /// Record and submit the frame: background, meshes, then the blit to the swapchain.
    #[profiling::function]
    pub fn draw(&mut self, scene: &SceneData, objects: &[RenderObject]) -> anyhow::Result<()> {
        if self.state != FrameState::Recording {
            bail!("draw called while a frame is {:?}", self.state);
        }

        let (Some(swapchain_image), Some(acquire_wait), Some(present_signal)) = (
            self.swapchain.current_image(),
            self.swapchain.acquire_wait_info(),
            self.swapchain.present_signal_info(),
        ) else {
            bail!("no swapchain image was acquired for this frame");
        };

        let draw_extent = self.targets.color.extent_2d();
        let swapchain_extent = self.swapchain.extent();
        let submit_value = self.frames.submit_value();
        let frame = self.frames.current_mut();

        let scene_buffer = {
            let mut buffer = Buffer::new(&self.device, &BufferDesc::uniform("scene_data", size_of::<SceneData>() as u64))?;
            buffer.write(0, bytemuck::bytes_of(scene))?;
            buffer
        };

        let draw_image_set = frame.descriptors.allocate(&self.draw_image_layout)?;
        DescriptorWriter::new(&self.draw_image_layout)
            .write_storage_image(0, self.targets.color.view())?
            .update(draw_image_set);

        let scene_set = frame.descriptors.allocate(&self.scene_layout)?;
        DescriptorWriter::new(&self.scene_layout)
            .write_buffer(0, &scene_buffer, vk::DescriptorType::UNIFORM_BUFFER)?
            .update(scene_set);

        let cmd = frame.command_pool.allocate()?;
        cmd.begin()?;

        // The targets are shared by both slots: wait for the previous frame's blit.
        let mut barriers = BarrierBatch::new();
        barriers.image(
            ImageBarrier::new(&self.targets.color, ImageState::TransferSrc, ImageState::General)
                .shader_stages(vk::PipelineStageFlags2::NONE, vk::PipelineStageFlags2::COMPUTE_SHADER)
                .discard(),
        );
        cmd.barrier(&mut barriers);

        cmd.bind_compute_pipeline(&self.gradient_pipeline);
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, self.gradient_pipeline.layout(), 0, &[draw_image_set]);
        let gradient = GradientPushConstants {
            top: Vec4::from_array(self.config.clear_color),
            bottom: Vec4::from_array(self.config.horizon_color),
            ..Default::default()
        };
        cmd.push_constants(self.gradient_pipeline.layout(), vk::ShaderStageFlags::COMPUTE, &gradient);
        cmd.dispatch(
            draw_extent.width.div_ceil(GRADIENT_GROUP_SIZE),
            draw_extent.height.div_ceil(GRADIENT_GROUP_SIZE),
            1,
        );

        barriers
            .image(
                ImageBarrier::new(&self.targets.color, ImageState::General, ImageState::Color)
                    .shader_stages(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::PipelineStageFlags2::NONE),
            )
            .image(ImageBarrier::new(&self.targets.depth, ImageState::DepthStencil, ImageState::DepthStencil).discard());
        cmd.barrier(&mut barriers);

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.targets.color.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE);
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.targets.depth.view())
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            // Reverse-Z: the far plane is at 0.
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent: draw_extent })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        cmd.begin_rendering(&rendering_info);
        cmd.bind_graphics_pipeline(&self.mesh_pipeline);
        cmd.set_viewport(draw_extent);
        cmd.set_scissor(draw_extent);
        cmd.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, self.mesh_pipeline.layout(), 0, &[scene_set]);
        for object in objects {
            cmd.push_constants(self.mesh_pipeline.layout(), vk::ShaderStageFlags::VERTEX, &object.push_constants());
            cmd.bind_index_buffer(object.index_buffer, 0);
            cmd.draw_indexed(object.index_count, 1, object.first_index, 0, 0);
        }
        cmd.end_rendering();

        barriers
            .image(ImageBarrier::new(&self.targets.color, ImageState::Color, ImageState::TransferSrc))
            // Chained to the acquire wait, which happens at the transfer stage.
            .image(
                ImageBarrier::raw(swapchain_image, vk::ImageAspectFlags::COLOR, ImageState::TransferDst, ImageState::TransferDst)
                    .discard(),
            );
        cmd.barrier(&mut barriers);

        cmd.blit_image(self.targets.color.handle(), draw_extent, swapchain_image, swapchain_extent);

        barriers.image(ImageBarrier::raw(
            swapchain_image,
            vk::ImageAspectFlags::COLOR,
            ImageState::TransferDst,
            ImageState::Present,
        ));
        cmd.barrier(&mut barriers);
        cmd.end()?;

        self.device.graphics_queue().submit(
            &[cmd.submit_info()],
            &[acquire_wait],
            &[present_signal, self.timeline.submit_info(submit_value, vk::PipelineStageFlags2::ALL_COMMANDS)],
        )?;

        frame.deletion_queue.push_buffer(scene_buffer);
        self.frames.mark_submitted();
        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Present the submitted frame and move to the next slot.
    #[profiling::function]
    pub fn end_frame(&mut self) -> anyhow::Result<()> {
        if self.state != FrameState::Submitted {
            bail!("end_frame called while a frame is {:?}", self.state);
        }

        let presented = self.swapchain.present(self.device.graphics_queue())?;
        self.frames.advance();
        self.state = FrameState::Idle;

        if !presented {
            log::debug!("Swapchain out of date on present, recreating next frame");
            self.resize_requested = true;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> anyhow::Result<()> {
        self.resize_requested = false;
        self.swapchain.create(self.window_extent)?;

        let extent = self.swapchain.extent();
        if extent != self.targets.color.extent_2d() {
            let targets = RenderTargets::new(&self.device, extent, self.config.draw_format)?;
            let old = std::mem::replace(&mut self.targets, targets);
            self.retired_targets.retire(old, self.frames.retirement_fence());
            log::debug!("Draw targets recreated at {}x{}", extent.width, extent.height);
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to drain the device before teardown: {e}");
        }
        for frame in self.frames.iter_mut() {
            frame.deletion_queue.flush();
        }
        self.retired_targets.clear();
    }
}

fn push_range<T>(stages: vk::ShaderStageFlags) -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: size_of::<T>() as u32,
    }
}
