//! Vulkan Buffer - GPU buffer resource management.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use crate::device::{set_debug_name_handle, DebuggableObject, Device};
use crate::error::{RhiError, VkResultExt};

/// Buffer descriptor for creating GPU buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub name: String,
    /// Size of the buffer in bytes. Zero is allowed.
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// Where the allocator places the memory.
    pub location: MemoryLocation,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            name: "Unnamed buffer".to_string(),
            size: 0,
            usage: vk::BufferUsageFlags::empty(),
            location: MemoryLocation::GpuOnly,
        }
    }
}

impl BufferDesc {
    pub fn new(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            ..Default::default()
        }
    }

    /// Storage buffer read through its device address, e.g. vertices pulled in the vertex shader.
    pub fn vertex(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            location: MemoryLocation::GpuOnly,
        }
    }

    pub fn index(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            usage: vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Host-written uniform buffer.
    pub fn uniform(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            location: MemoryLocation::CpuToGpu,
        }
    }

    pub fn storage(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Create a staging buffer descriptor (CPU-visible for transfers).
    pub fn staging(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: MemoryLocation::CpuToGpu,
        }
    }

    /// Transfer destination the host reads back.
    pub fn readback(name: &str, size: vk::DeviceSize) -> Self {
        Self {
            name: name.to_owned(),
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::GpuToCpu,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_additional_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn with_location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    /// Enable buffer device address.
    pub fn with_device_address(mut self) -> Self {
        self.usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        self
    }

    /// Size actually requested from Vulkan, which rejects zero-sized buffers.
    fn backing_size(&self) -> vk::DeviceSize {
        self.size.max(1)
    }
}

/// GPU buffer with memory allocation.
#[DeviceObject]
pub struct Buffer {
    buffer: vk::Buffer,
    desc: BufferDesc,
    allocation: Option<Allocation>,
}

impl Buffer {
    pub fn new(device: &Device, desc: &BufferDesc) -> Result<Self, RhiError> {
        let shared = device.shared();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.backing_size())
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { shared.raw.create_buffer(&buffer_info, None).vk("vkCreateBuffer")? };
        let requirements = unsafe { shared.raw.get_buffer_memory_requirements(buffer) };

        let allocation = shared.allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: desc.location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            shared
                .raw
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .vk("vkBindBufferMemory")
        };
        if let Err(e) = bound {
            shared.free(allocation);
            unsafe { shared.raw.destroy_buffer(buffer, None) };
            return Err(e);
        }

        log::trace!("Buffer `{}` created ({} bytes, {:?})", desc.name, desc.size, desc.location);

        let buf = Self {
            buffer,
            desc: desc.clone(),
            allocation: Some(allocation),
            device: shared.clone(),
        };
        buf.set_debug_name();
        Ok(buf)
    }

    /// Get buffer device address (requires `SHADER_DEVICE_ADDRESS` usage).
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.device.raw.get_buffer_device_address(&info) }
    }

    /// Copy `data` into host-visible memory at `offset`.
    pub fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> Result<(), RhiError> {
        if data.is_empty() {
            return Ok(());
        }
        let range = self.check_range(offset, data.len() as u64)?;
        let name = &self.desc.name;
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| RhiError::HostAccess { name: name.clone() })?;

        mapped[range].copy_from_slice(data);
        Ok(())
    }

    /// Host-visible bytes in `offset..offset + len`.
    pub fn read(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<&[u8], RhiError> {
        if len == 0 {
            return Ok(&[]);
        }
        let range = self.check_range(offset, len)?;
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| RhiError::HostAccess { name: self.desc.name.clone() })?;

        Ok(&mapped[range])
    }

    fn check_range(&self, offset: vk::DeviceSize, len: vk::DeviceSize) -> Result<std::ops::Range<usize>, RhiError> {
        let end = offset.checked_add(len).filter(|&end| end <= self.desc.size);
        match end {
            Some(end) => Ok(offset as usize..end as usize),
            None => Err(RhiError::OutOfRange {
                name: self.desc.name.clone(),
                offset,
                end: offset.saturating_add(len),
                size: self.desc.size,
            }),
        }
    }

    /// Get the raw Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Requested size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.desc.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.desc.usage
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.desc.backing_size())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }

        log::trace!("Buffer `{}` destroyed", self.desc.name);
    }
}

impl DebuggableObject for Buffer {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.buffer, self.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_requests_get_a_backing_byte() {
        assert_eq!(BufferDesc::staging("empty", 0).backing_size(), 1);
        assert_eq!(BufferDesc::staging("one", 4).backing_size(), 4);
    }

    #[test]
    fn presets_pick_memory_locations() {
        assert_eq!(BufferDesc::staging("s", 1).location, MemoryLocation::CpuToGpu);
        assert_eq!(BufferDesc::readback("r", 1).location, MemoryLocation::GpuToCpu);
        assert_eq!(BufferDesc::vertex("v", 1).location, MemoryLocation::GpuOnly);
        assert!(BufferDesc::vertex("v", 1).usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert!(BufferDesc::index("i", 1).usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }
}
