use std::time::Duration;
use lumen_core::cli::{EngineArgs, PresentPreference};
use lumen_rhi::{vk, SwapchainConfig};

/// Renderer settings, passed explicitly at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Longest `begin_frame` waits for a frame slot before giving up.
    pub frame_timeout: Duration,
    /// Background gradient, top edge.
    pub clear_color: [f32; 4],
    /// Background gradient, bottom edge.
    pub horizon_color: [f32; 4],
    pub present_mode: PresentPreference,
    pub draw_format: vk::Format,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(5),
            clear_color: [0.05, 0.07, 0.12, 1.0],
            horizon_color: [0.35, 0.42, 0.55, 1.0],
            present_mode: PresentPreference::Mailbox,
            draw_format: vk::Format::R16G16B16A16_SFLOAT,
        }
    }
}

impl RendererConfig {
    /// Number of frame slots. Fixed, the ring is sized at compile time.
    pub const FRAMES_IN_FLIGHT: usize = lumen_rhi::FRAMES_IN_FLIGHT;

    pub fn from_args(args: &EngineArgs) -> Self {
        Self {
            present_mode: args.present_mode,
            ..Default::default()
        }
    }

    pub fn swapchain_config(&self) -> SwapchainConfig {
        let preferred_present_mode = match self.present_mode {
            PresentPreference::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentPreference::Fifo => vk::PresentModeKHR::FIFO,
        };
        SwapchainConfig {
            preferred_present_mode,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn present_preference_reaches_the_swapchain() {
        let args = EngineArgs::try_parse_from(["lumen", "--present-mode", "fifo"]).unwrap();
        let config = RendererConfig::from_args(&args);
        assert_eq!(config.swapchain_config().preferred_present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(RendererConfig::default().swapchain_config().preferred_present_mode, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn two_frames_in_flight() {
        assert_eq!(RendererConfig::FRAMES_IN_FLIGHT, 2);
    }
}
