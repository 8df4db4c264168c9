//! Vulkan Shader - loading precompiled SPIR-V into shader modules.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use ash::vk;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, Device};
use crate::error::{RhiError, ShaderError, VkResultExt};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Check `bytes` is SPIR-V and turn it into words.
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    let invalid = |reason| ShaderError::InvalidSpirv { path: path.to_path_buf(), reason };

    if bytes.is_empty() {
        return Err(invalid("file is empty"));
    }
    if bytes.len() % 4 != 0 {
        return Err(invalid("length is not a multiple of 4"));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != SPIRV_MAGIC && magic.swap_bytes() != SPIRV_MAGIC {
        return Err(invalid("wrong magic number"));
    }

    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|source| ShaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and validate a `.spv` file.
pub fn read_spirv_file(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = std::fs::read(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => ShaderError::NotFound { path: path.to_path_buf() },
        _ => ShaderError::Io { path: path.to_path_buf(), source },
    })?;
    parse_spirv(path, &bytes)
}

#[DeviceObject(named)]
pub struct ShaderModule {
    module: vk::ShaderModule,
    path: PathBuf,
}

impl ShaderModule {
    /// Load `file_name` from `directory`.
    #[profiling::function]
    pub fn load(device: &Device, directory: &Path, file_name: &str) -> Result<Self, RhiError> {
        let path = directory.join(file_name);
        let code = read_spirv_file(&path)?;
        Self::from_words(device, file_name, path, &code)
    }

    /// Create a module from SPIR-V bytes already in memory.
    pub fn from_spirv(device: &Device, name: &str, bytes: &[u8]) -> Result<Self, RhiError> {
        let path = PathBuf::from(name);
        let code = parse_spirv(&path, bytes)?;
        Self::from_words(device, name, path, &code)
    }

    fn from_words(device: &Device, name: &str, path: PathBuf, code: &[u32]) -> Result<Self, RhiError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe {
            device
                .handle()
                .create_shader_module(&create_info, None)
                .vk("vkCreateShaderModule")?
        };

        log::debug!("Shader module `{name}` loaded from {} ({} words)", path.display(), code.len());

        let shader = Self {
            module,
            path,
            device: device.shared().clone(),
            name: name.to_owned(),
        };
        shader.set_debug_name();
        Ok(shader)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule { self.module }

    #[inline]
    pub fn path(&self) -> &Path { &self.path }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_shader_module(self.module, None);
        }
    }
}

impl DebuggableObject for ShaderModule {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.module, &self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn accepts_spirv_words() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0600, 0, 8, 0]);
        let words = parse_spirv(Path::new("ok.spv"), &bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_malformed_input() {
        let path = Path::new("bad.spv");
        let reason = |bytes: &[u8]| match parse_spirv(path, bytes) {
            Err(ShaderError::InvalidSpirv { reason, .. }) => reason,
            other => panic!("unexpected result {other:?}"),
        };

        assert_eq!(reason(&[]), "file is empty");
        assert_eq!(reason(&[0x03, 0x02, 0x23]), "length is not a multiple of 4");
        assert_eq!(reason(&module_bytes(&[0xdead_beef, 0])), "wrong magic number");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.spv");
        assert!(matches!(read_spirv_file(&path), Err(ShaderError::NotFound { .. })));
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient.comp.spv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&module_bytes(&[SPIRV_MAGIC, 0x0001_0600, 0, 1, 0])).unwrap();
        drop(file);

        assert_eq!(read_spirv_file(&path).unwrap().len(), 5);
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(read_spirv_file(file.path()), Err(ShaderError::InvalidSpirv { .. })));
    }
}
