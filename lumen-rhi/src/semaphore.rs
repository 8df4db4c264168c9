//! Binary and timeline semaphores.

use std::time::Duration;
use ash::vk;
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, Device, DeviceRef};
use crate::error::{RhiError, VkResultExt};

/// A binary semaphore, used for the acquire and present edges of the swapchain.
#[DeviceObject(named)]
pub struct BinarySemaphore {
    handle: vk::Semaphore,
}

impl BinarySemaphore {
    pub fn new(device: &Device, name: &str) -> Result<Self, RhiError> {
        Self::new_in(device.shared(), name)
    }

    pub(crate) fn new_in(device: &DeviceRef, name: &str) -> Result<Self, RhiError> {
        let handle = unsafe {
            device
                .raw
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .vk("vkCreateSemaphore")?
        };

        let semaphore = Self {
            handle,
            device: device.clone(),
            name: name.to_owned(),
        };
        semaphore.set_debug_name();
        Ok(semaphore)
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore { self.handle }

    pub fn submit_info(&self, stage: vk::PipelineStageFlags2) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.handle)
            .stage_mask(stage)
            .device_index(0)
            .value(1)
    }
}

impl Drop for BinarySemaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_semaphore(self.handle, None); }
    }
}

impl DebuggableObject for BinarySemaphore {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.handle, &self.name);
    }
}

/// Something with a monotonically increasing completion counter.
pub trait Timeline {
    /// The last value the counter reached.
    fn value(&self) -> Result<u64, RhiError>;

    /// Block until the counter is at least `value`, or `timeout` elapses.
    fn wait(&self, value: u64, timeout: Duration) -> Result<(), RhiError>;
}

/// A timeline semaphore shared by every submission of the frame loop.
#[DeviceObject(named)]
pub struct TimelineSemaphore {
    handle: vk::Semaphore,
}

impl TimelineSemaphore {
    pub fn new(device: &Device, name: &str, initial_value: u64) -> Result<Self, RhiError> {
        let device = device.shared();
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let handle = unsafe {
            device
                .raw
                .create_semaphore(&create_info, None)
                .vk("vkCreateSemaphore")?
        };

        let semaphore = Self {
            handle,
            device: device.clone(),
            name: name.to_owned(),
        };
        semaphore.set_debug_name();
        Ok(semaphore)
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore { self.handle }

    /// Signal `value` from the host.
    pub fn signal(&self, value: u64) -> Result<(), RhiError> {
        let signal_info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.handle)
            .value(value);

        unsafe { self.device.raw.signal_semaphore(&signal_info).vk("vkSignalSemaphore") }
    }

    /// Wait or signal `value` as part of a queue submission.
    pub fn submit_info(&self, value: u64, stage: vk::PipelineStageFlags2) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.handle)
            .stage_mask(stage)
            .device_index(0)
            .value(value)
    }
}

impl Timeline for TimelineSemaphore {
    fn value(&self) -> Result<u64, RhiError> {
        unsafe {
            self.device
                .raw
                .get_semaphore_counter_value(self.handle)
                .vk("vkGetSemaphoreCounterValue")
        }
    }

    #[profiling::function]
    fn wait(&self, value: u64, timeout: Duration) -> Result<(), RhiError> {
        let semaphores = [self.handle];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let timeout = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.raw.wait_semaphores(&wait_info, timeout) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout { value }),
            result => result.vk("vkWaitSemaphores"),
        }
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_semaphore(self.handle, None); }
    }
}

impl DebuggableObject for TimelineSemaphore {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.handle, &self.name);
    }
}
