//! Error types shared by the whole RHI.

use std::panic::Location;
use std::path::PathBuf;
use ash::vk;
use thiserror::Error;
use lumen_core::log;

/// Unrecoverable RHI failures.
///
/// Conditions the frame loop is expected to recover from (an out-of-date
/// swapchain, an exhausted descriptor pool) are not errors, see
/// [`crate::Swapchain::acquire`] and [`crate::DescriptorAllocator::allocate`].
#[derive(Debug, Error)]
pub enum RhiError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("the context was created without a presentation surface")]
    NoSurface,

    #[error("no adapter satisfies the device requirements:\n{diagnostic}")]
    NoSuitableAdapter { diagnostic: String },

    #[error("{call} failed with {result} at {location}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
        location: &'static Location<'static>,
    },

    #[error("the GPU device was lost")]
    DeviceLost,

    #[error("timed out waiting for timeline value {value}")]
    Timeout { value: u64 },

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("descriptor allocation failed again on a fresh pool")]
    DescriptorPoolExhausted,

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error("buffer `{name}` is not mapped for host access")]
    HostAccess { name: String },

    #[error("range {offset}..{end} is outside `{name}` ({size} bytes)")]
    OutOfRange { name: String, offset: u64, end: u64, size: u64 },
}

impl RhiError {
    /// Whether the error means the device can no longer be used.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RhiError::DeviceLost)
    }
}

/// Descriptor write validation against a layout.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("binding {0} not found in layout")]
    BindingNotFound(u32),

    #[error("type mismatch at binding {binding}: expected {expected:?}, got {got:?}")]
    TypeMismatch {
        binding: u32,
        expected: vk::DescriptorType,
        got: vk::DescriptorType,
    },
}

/// Shader bytecode could not be turned into a module.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader `{path}` not found")]
    NotFound { path: PathBuf },

    #[error("failed to read shader `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{path}` is not valid SPIR-V: {reason}")]
    InvalidSpirv { path: PathBuf, reason: &'static str },
}

/// Attach the API call name and the caller's location to a raw Vulkan result.
pub(crate) trait VkResultExt<T> {
    fn vk(self, call: &'static str) -> Result<T, RhiError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[inline]
    #[track_caller]
    fn vk(self, call: &'static str) -> Result<T, RhiError> {
        match self {
            Ok(value) => Ok(value),
            Err(result) => Err(vulkan_error(call, result, Location::caller())),
        }
    }
}

#[cold]
pub(crate) fn vulkan_error(call: &'static str, result: vk::Result, location: &'static Location<'static>) -> RhiError {
    log::error!("{call} failed with {result:?} ({}:{})", location.file(), location.line());
    match result {
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
        result => RhiError::Vulkan { call, result, location },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_errors_carry_call_site() {
        let line = line!() + 1;
        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_HOST_MEMORY).vk("vkCreateBuffer").unwrap_err();
        match err {
            RhiError::Vulkan { call, result, location } => {
                assert_eq!(call, "vkCreateBuffer");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
                assert_eq!(location.line(), line);
                assert!(location.file().ends_with("error.rs"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn device_lost_is_distinguished() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST).vk("vkQueueSubmit2").unwrap_err();
        assert!(err.is_device_lost());
    }

    #[test]
    fn success_passes_through() {
        assert_eq!(Ok::<_, vk::Result>(7u32).vk("vkGetSemaphoreCounterValue").unwrap(), 7);
    }
}
