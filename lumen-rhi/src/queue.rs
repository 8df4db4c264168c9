use ash::vk;
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, DeviceRef};
use crate::error::{RhiError, VkResultExt};

/// A hardware queue together with the family it was created from.
#[DeviceObject(named)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    pub(crate) fn new(name: &str, device: &DeviceRef, family_index: u32) -> Self {
        let handle = unsafe { device.raw.get_device_queue(family_index, 0) };
        let queue = Self {
            handle,
            family_index,
            device: device.clone(),
            name: name.to_owned(),
        };
        queue.set_debug_name();
        queue
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue { self.handle }

    #[inline]
    pub fn family_index(&self) -> u32 { self.family_index }

    /// Submit one batch of command buffers.
    ///
    /// Every command buffer in `command_buffers` starts after all `waits` are
    /// satisfied, and `signals` fire once all of them complete.
    #[profiling::function]
    pub fn submit(
        &self,
        command_buffers: &[vk::CommandBufferSubmitInfo],
        waits: &[vk::SemaphoreSubmitInfo],
        signals: &[vk::SemaphoreSubmitInfo],
    ) -> Result<(), RhiError> {
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(command_buffers)
            .wait_semaphore_infos(waits)
            .signal_semaphore_infos(signals);

        unsafe {
            self.device
                .raw
                .queue_submit2(self.handle, std::slice::from_ref(&submit_info), vk::Fence::null())
                .vk("vkQueueSubmit2")
        }
    }

    /// Block until everything submitted to this queue has finished.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.raw.queue_wait_idle(self.handle).vk("vkQueueWaitIdle") }
    }
}

impl DebuggableObject for Queue {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.handle, &self.name);
    }
}
