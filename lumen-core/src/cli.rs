use std::path::PathBuf;
use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Log level options for command-line argument.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

/// Presentation pacing requested by the user.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum PresentPreference {
    /// Low latency triple buffering, falls back to vsync when unsupported.
    #[default]
    Mailbox,
    /// Strict vsync.
    Fifo,
}

/// Common command-line arguments for Lumen applications.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct EngineArgs {
    /// Set the log verbosity level
    #[arg(short = 'l', long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Directory holding compiled SPIR-V shaders
    #[arg(long = "shader-dir", default_value = "shaders")]
    pub shader_dir: PathBuf,

    /// Directory holding scene and model files
    #[arg(long = "model-dir", default_value = "assets/models")]
    pub model_dir: PathBuf,

    /// Initial window width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Initial window height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Preferred presentation mode
    #[arg(long = "present-mode", value_enum, default_value_t = PresentPreference::Mailbox)]
    pub present_mode: PresentPreference,

    /// Serve puffin profiling data
    #[arg(long)]
    pub profile: bool,

    /// Additional positional arguments passed to the application
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl EngineArgs {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let args = EngineArgs::try_parse_from(["lumen"]).unwrap();
        assert_eq!(args.log_level, LogLevel::Info);
        assert_eq!(args.shader_dir, PathBuf::from("shaders"));
        assert_eq!((args.width, args.height), (1280, 720));
        assert_eq!(args.present_mode, PresentPreference::Mailbox);
        assert!(!args.profile);
        assert!(args.args.is_empty());
    }

    #[test]
    fn overrides_and_trailing_arguments() {
        let args = EngineArgs::try_parse_from([
            "lumen", "-l", "debug", "--shader-dir", "/tmp/spv", "--present-mode", "fifo", "scene.gltf",
        ])
        .unwrap();
        assert_eq!(LevelFilter::from(args.log_level), LevelFilter::Debug);
        assert_eq!(args.shader_dir, PathBuf::from("/tmp/spv"));
        assert_eq!(args.present_mode, PresentPreference::Fifo);
        assert_eq!(args.args, vec!["scene.gltf".to_string()]);
    }
}
