pub use log::{log, trace, debug, info, warn, error, Level, LevelFilter};

/// Install the process-wide logger.
///
/// `RUST_LOG` is parsed last so it can override `level` for individual modules.
pub fn initialize(level: LevelFilter) -> Result<(), anyhow::Error> {
    env_logger::builder()
        .filter_level(level)
        .filter_module("winit", LevelFilter::Warn)
        .filter_module("calloop", LevelFilter::Warn)
        .filter_module("sctk", LevelFilter::Warn)
        .filter_module("gpu_allocator", LevelFilter::Warn)
        .parse_default_env()
        .try_init()?;

    Ok(())
}
