use lumen_core::cli::EngineArgs;
use lumen_core::config::PathConfig;
use lumen_core::event::{Event, EventDispatcher, EventFlow};
use lumen_core::input::Input;
use lumen_renderer::{RenderObject, Renderer, SceneData};
use lumen_rhi::vk;

/// What the application wants drawn this frame.
#[derive(Debug, Clone, Default)]
pub struct RenderList {
    pub scene: SceneData,
    pub objects: Vec<RenderObject>,
}

pub trait App: Sized + 'static {
    fn new(args: &EngineArgs) -> anyhow::Result<Self>;

    /// Called once the renderer exists, e.g. to upload meshes.
    fn prepare(&mut self, _renderer: &Renderer, _paths: &PathConfig) -> anyhow::Result<()> { Ok(()) }

    /// Register event subscribers. They run before [`App::on_event`].
    fn subscribe(&mut self, _dispatcher: &mut EventDispatcher) {}

    /// Events no subscriber handled.
    fn on_event(&mut self, _event: &Event) -> EventFlow { EventFlow::Continue }

    fn tick(&mut self, _delta_time: f32, _input: &Input) {}

    fn render(&mut self, extent: vk::Extent2D) -> RenderList;

    /// Checked after every frame.
    fn should_exit(&self) -> bool { false }
}
