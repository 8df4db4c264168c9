use std::cell::Cell;
use std::rc::Rc;
use glam::{Mat4, Vec3, Vec4};
use winit::keyboard::KeyCode;
use lumen::core::cli::EngineArgs;
use lumen::core::config::PathConfig;
use lumen::core::event::{EventDispatcher, EventFlow, KeyPressed};
use lumen::core::input::Input;
use lumen::renderer::{perspective, MeshAsset, Renderer, SceneData, Vertex};
use lumen::rhi::vk;
use lumen::{launch, App, RenderList};

const ORBIT_SPEED: f32 = 0.8;
const ZOOM_SPEED: f32 = 4.0;

/// Positions, normals and colors of a unit cube, four vertices per face.
fn cube() -> (Vec<Vertex>, Vec<u32>) {
    let faces = [
        (Vec3::X, Vec3::Y, Vec4::new(0.9, 0.3, 0.3, 1.0)),
        (Vec3::NEG_X, Vec3::Y, Vec4::new(0.3, 0.9, 0.3, 1.0)),
        (Vec3::Y, Vec3::Z, Vec4::new(0.3, 0.3, 0.9, 1.0)),
        (Vec3::NEG_Y, Vec3::Z, Vec4::new(0.9, 0.9, 0.3, 1.0)),
        (Vec3::Z, Vec3::Y, Vec4::new(0.9, 0.3, 0.9, 1.0)),
        (Vec3::NEG_Z, Vec3::Y, Vec4::new(0.3, 0.9, 0.9, 1.0)),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up, color) in faces {
        let right = up.cross(normal);
        let base = vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let position = (normal + right * (u * 2.0 - 1.0) + up * (v * 2.0 - 1.0)) * 0.5;
            vertices.push(Vertex::new(position, normal, [u, v], color));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

pub struct SandboxApp {
    cube: Option<MeshAsset>,
    angle: f32,
    distance: f32,
    quit: Rc<Cell<bool>>,
}

impl App for SandboxApp {
    fn new(_args: &EngineArgs) -> anyhow::Result<Self> {
        Ok(Self {
            cube: None,
            angle: 0.0,
            distance: 4.0,
            quit: Rc::new(Cell::new(false)),
        })
    }

    fn prepare(&mut self, renderer: &Renderer, _paths: &PathConfig) -> anyhow::Result<()> {
        let (vertices, indices) = cube();
        self.cube = Some(MeshAsset::upload(renderer.device(), "cube", &vertices, &indices, Vec::new())?);
        Ok(())
    }

    fn subscribe(&mut self, dispatcher: &mut EventDispatcher) {
        let quit = self.quit.clone();
        dispatcher.subscribe(move |event: &KeyPressed| {
            if event.key == KeyCode::Escape {
                quit.set(true);
                EventFlow::Handled
            } else {
                EventFlow::Continue
            }
        });
    }

    fn tick(&mut self, delta_time: f32, input: &Input) {
        self.angle += ORBIT_SPEED * delta_time;
        if input.is_key_pressed(KeyCode::KeyW) {
            self.distance -= ZOOM_SPEED * delta_time;
        }
        if input.is_key_pressed(KeyCode::KeyS) {
            self.distance += ZOOM_SPEED * delta_time;
        }
        self.distance = self.distance.clamp(1.5, 20.0);
    }

    fn render(&mut self, extent: vk::Extent2D) -> RenderList {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let eye = Vec3::new(0.0, 1.5, self.distance);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let scene = SceneData::new(view, perspective(70f32.to_radians(), aspect, 0.1, 100.0));

        let transform = Mat4::from_rotation_y(self.angle) * Mat4::from_rotation_x(self.angle * 0.5);
        let objects = self
            .cube
            .as_ref()
            .map(|cube| cube.render_objects(transform).collect())
            .unwrap_or_default();

        RenderList { scene, objects }
    }

    fn should_exit(&self) -> bool {
        self.quit.get()
    }
}

fn main() {
    if let Err(e) = launch::<SandboxApp>() {
        eprintln!("Lumen sandbox failed: {e:#}");
        std::process::exit(1);
    }
}
