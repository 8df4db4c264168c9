//! Frame orchestration on top of `lumen-rhi`.

mod config;
mod frame;
mod mesh;
mod renderer;

pub use config::RendererConfig;
pub use frame::{FrameData, FrameRing, SlotWait};
pub use mesh::{
    perspective, DrawPushConstants, GeometrySurface, GradientPushConstants, MeshAsset, RenderObject, SceneData, Vertex,
};
pub use renderer::{FrameState, Renderer};
pub use lumen_rhi::GpuMeshBuffers;
