//! Mesh and scene types shared between the CPU and the shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use lumen_rhi::{upload_mesh, vk, Device, GpuMeshBuffers, RhiError};

/// One vertex as the mesh shader pulls it from the vertex buffer.
///
/// The UV is split across the padding slots so the layout matches std430.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2], color: Vec4) -> Self {
        Self {
            position,
            uv_x: uv[0],
            normal,
            uv_y: uv[1],
            color,
        }
    }
}

/// Per-draw push constants of the mesh pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub world_matrix: Mat4,
    pub vertex_buffer: vk::DeviceAddress,
    _padding: u64,
}

impl DrawPushConstants {
    pub fn new(world_matrix: Mat4, vertex_buffer: vk::DeviceAddress) -> Self {
        Self {
            world_matrix,
            vertex_buffer,
            _padding: 0,
        }
    }
}

/// Push constants of the background compute pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GradientPushConstants {
    pub top: Vec4,
    pub bottom: Vec4,
    pub reserved: [Vec4; 2],
}

/// Frame-wide uniform data bound at set 0 of the mesh pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub ambient_color: Vec4,
    /// `w` is the sun intensity.
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl Default for SceneData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

impl SceneData {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }
}

/// Reverse-Z perspective projection with the Y axis flipped for Vulkan clip space.
pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::perspective_rh(fov_y_radians, aspect, far, near);
    projection.y_axis.y *= -1.0;
    projection
}

/// A range of the index buffer drawn with one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometrySurface {
    pub start_index: u32,
    pub count: u32,
}

/// Uploaded geometry with the surfaces that make it up.
pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<GeometrySurface>,
    pub buffers: GpuMeshBuffers,
}

impl MeshAsset {
    /// Upload `vertices` and `indices`. Without explicit surfaces the whole
    /// index range becomes one surface.
    pub fn upload(
        device: &Device,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
        surfaces: Vec<GeometrySurface>,
    ) -> Result<Self, RhiError> {
        let buffers = upload_mesh(device, name, vertices, indices)?;
        let surfaces = if surfaces.is_empty() {
            vec![GeometrySurface { start_index: 0, count: buffers.index_count }]
        } else {
            surfaces
        };

        Ok(Self {
            name: name.to_owned(),
            surfaces,
            buffers,
        })
    }

    /// One draw per surface, placed at `transform`.
    ///
    /// The returned objects borrow raw handles, so the asset must outlive every
    /// frame that draws them.
    pub fn render_objects(&self, transform: Mat4) -> impl Iterator<Item = RenderObject> + '_ {
        self.surfaces.iter().filter(|surface| surface.count > 0).map(move |surface| RenderObject {
            index_count: surface.count,
            first_index: surface.start_index,
            index_buffer: self.buffers.index_buffer.handle(),
            vertex_buffer_address: self.buffers.vertex_buffer_address,
            transform,
        })
    }
}

/// Everything needed to issue one indexed draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderObject {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub vertex_buffer_address: vk::DeviceAddress,
    pub transform: Mat4,
}

impl RenderObject {
    pub fn push_constants(&self) -> DrawPushConstants {
        DrawPushConstants::new(self.transform, self.vertex_buffer_address)
    }
}
