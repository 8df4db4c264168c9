//! Staging-buffer-based upload and readback.
//!
//! Both paths are blocking: they submit on the graphics queue and wait for it
//! to go idle. Meant for load time and tests, never for per-frame streaming.

use ash::vk;
use lumen_core::log;
use crate::barrier::{BarrierBatch, BufferBarrier, BufferState, MemoryBarrier};
use crate::buffer::{Buffer, BufferDesc};
use crate::command::ImmediateSubmit;
use crate::device::Device;
use crate::error::RhiError;

/// Device-local vertex and index buffers of one mesh.
pub struct GpuMeshBuffers {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    /// Address the vertex shader pulls vertices from.
    pub vertex_buffer_address: vk::DeviceAddress,
    pub index_count: u32,
}

/// Where each array lands in the shared staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StagingLayout {
    vertex_size: vk::DeviceSize,
    index_size: vk::DeviceSize,
}

impl StagingLayout {
    fn new(vertex_bytes: usize, index_bytes: usize) -> Self {
        Self {
            vertex_size: vertex_bytes as vk::DeviceSize,
            index_size: index_bytes as vk::DeviceSize,
        }
    }

    #[inline]
    fn index_offset(&self) -> vk::DeviceSize {
        self.vertex_size
    }

    #[inline]
    fn total(&self) -> vk::DeviceSize {
        self.vertex_size + self.index_size
    }

    /// Copy into the vertex buffer, skipped when there are no vertices.
    fn vertex_copy(&self) -> Option<vk::BufferCopy> {
        (self.vertex_size > 0).then(|| vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.vertex_size,
        })
    }

    fn index_copy(&self) -> Option<vk::BufferCopy> {
        (self.index_size > 0).then(|| vk::BufferCopy {
            src_offset: self.index_offset(),
            dst_offset: 0,
            size: self.index_size,
        })
    }
}

/// Upload `vertices` and `indices` into new device-local buffers.
///
/// Returns once the graphics queue is idle, so the buffers are ready to draw.
#[profiling::function]
pub fn upload_mesh<V: bytemuck::Pod>(
    device: &Device,
    name: &str,
    vertices: &[V],
    indices: &[u32],
) -> Result<GpuMeshBuffers, RhiError> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);
    let layout = StagingLayout::new(vertex_bytes.len(), index_bytes.len());

    let vertex_buffer = Buffer::new(device, &BufferDesc::vertex(&format!("{name}.vertices"), layout.vertex_size))?;
    let index_buffer = Buffer::new(device, &BufferDesc::index(&format!("{name}.indices"), layout.index_size))?;

    let mut staging = Buffer::new(device, &BufferDesc::staging(&format!("{name}.staging"), layout.total()))?;
    staging.write(0, vertex_bytes)?;
    staging.write(layout.index_offset(), index_bytes)?;

    let immediate = ImmediateSubmit::new(device, device.graphics_queue())?;
    immediate.submit_and_wait(|cmd| {
        if let Some(region) = layout.vertex_copy() {
            cmd.copy_buffer(staging.handle(), vertex_buffer.handle(), &[region]);
        }
        if let Some(region) = layout.index_copy() {
            cmd.copy_buffer(staging.handle(), index_buffer.handle(), &[region]);
        }

        let mut barriers = BarrierBatch::new();
        barriers
            .buffer(
                BufferBarrier::new(&vertex_buffer, BufferState::TransferDst, BufferState::Storage)
                    .shader_stages(vk::PipelineStageFlags2::NONE, vk::PipelineStageFlags2::VERTEX_SHADER)
                    .readonly(true),
            )
            .buffer(BufferBarrier::new(&index_buffer, BufferState::TransferDst, BufferState::Index));
        cmd.barrier(&mut barriers);
    })?;

    log::debug!(
        "Uploaded mesh `{name}`: {} vertices ({} bytes), {} indices",
        vertices.len(),
        layout.vertex_size,
        indices.len()
    );

    Ok(GpuMeshBuffers {
        vertex_buffer_address: vertex_buffer.device_address(),
        vertex_buffer,
        index_buffer,
        index_count: indices.len() as u32,
    })
}

/// Copy the whole of `buffer` back to the host.
///
/// `buffer` must have been created with `TRANSFER_SRC` usage.
#[profiling::function]
pub fn readback_buffer(device: &Device, buffer: &Buffer) -> Result<Vec<u8>, RhiError> {
    let size = buffer.size();
    let readback = Buffer::new(device, &BufferDesc::readback(&format!("{}.readback", buffer.name()), size))?;

    let immediate = ImmediateSubmit::new(device, device.graphics_queue())?;
    immediate.submit_and_wait(|cmd| {
        let mut barriers = BarrierBatch::new();
        barriers.memory(MemoryBarrier::flush_all_writes());
        cmd.barrier(&mut barriers);

        if size > 0 {
            cmd.copy_buffer(buffer.handle(), readback.handle(), &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size }]);
        }

        barriers.memory(MemoryBarrier::new(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::HOST,
            vk::AccessFlags2::HOST_READ,
        ));
        cmd.barrier(&mut barriers);
    })?;

    Ok(readback.read(0, size)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_are_packed_back_to_back() {
        let layout = StagingLayout::new(96, 24);
        assert_eq!(layout.total(), 120);
        assert_eq!(layout.index_offset(), 96);

        let index_copy = layout.index_copy().unwrap();
        assert_eq!((index_copy.src_offset, index_copy.dst_offset, index_copy.size), (96, 0, 24));
        assert_eq!(layout.vertex_copy().unwrap().size, 96);
    }

    #[test]
    fn empty_arrays_record_no_copy() {
        let layout = StagingLayout::new(0, 12);
        assert!(layout.vertex_copy().is_none());
        assert_eq!(layout.index_copy().unwrap().src_offset, 0);

        let empty = StagingLayout::new(0, 0);
        assert_eq!(empty.total(), 0);
        assert!(empty.vertex_copy().is_none() && empty.index_copy().is_none());
    }
}
