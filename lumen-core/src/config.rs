//! Filesystem locations the engine loads from.

use std::path::{Path, PathBuf};
use crate::cli::EngineArgs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    pub shader_directory: PathBuf,
    pub model_directory: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            shader_directory: PathBuf::from("shaders"),
            model_directory: PathBuf::from("assets/models"),
        }
    }
}

impl PathConfig {
    pub fn from_args(args: &EngineArgs) -> Self {
        Self {
            shader_directory: args.shader_dir.clone(),
            model_directory: args.model_dir.clone(),
        }
    }

    #[inline]
    pub fn shader_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.shader_directory.join(file_name)
    }

    #[inline]
    pub fn model_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.model_directory.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn paths_join_configured_directories() {
        let args = EngineArgs::try_parse_from(["lumen", "--shader-dir", "out/spv", "--model-dir", "data"]).unwrap();
        let config = PathConfig::from_args(&args);
        assert_eq!(config.shader_path("gradient.spv"), PathBuf::from("out/spv/gradient.spv"));
        assert_eq!(config.model_path("basicmesh.glb"), PathBuf::from("data/basicmesh.glb"));
    }
}
