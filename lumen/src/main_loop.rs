use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};
use lumen_core::cli::EngineArgs;
use lumen_core::config::PathConfig;
use lumen_core::event::{Event, EventDispatcher, EventFlow};
use lumen_core::input::Input;
use lumen_core::log::{error, info};
use lumen_renderer::{Renderer, RendererConfig};
use crate::app::App;
use crate::events::EventTranslator;
use crate::window::{WindowSystem, WindowSystemTransition};

pub struct EngineLoop<A> {
    // Drop order: the renderer drains the device, then the app's meshes go,
    // and the window outlives the surface kept alive by them.
    renderer: Option<Renderer>,
    app: A,
    window: Option<Arc<Window>>,
    window_open: bool,

    args: EngineArgs,
    paths: PathConfig,
    window_system: WindowSystem,
    translator: EventTranslator,
    dispatcher: EventDispatcher,
    input: Input,

    frame_count: u64,
    last_tick: Instant,
    last_time_printed: Instant,
    error: Option<anyhow::Error>,
}

impl<A: App> ApplicationHandler for EngineLoop<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.create_window(event_loop) {
            self.fail(event_loop, e);
        }
    }

    #[profiling::function]
    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if let WindowEvent::RedrawRequested = event {
            if let Err(e) = self.redraw() {
                self.fail(event_loop, e);
                return;
            }
            if self.app.should_exit() {
                self.close_window(event_loop);
            }
            return;
        }

        for engine_event in self.translator.translate(&event) {
            self.process_event(event_loop, &engine_event);
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
    }
}

impl<A: App> EngineLoop<A> {
    pub(super) fn new(mut app: A, args: EngineArgs) -> Self {
        let mut dispatcher = EventDispatcher::new();
        app.subscribe(&mut dispatcher);

        Self {
            renderer: None,
            app,
            window: None,
            window_open: false,

            paths: PathConfig::from_args(&args),
            args,
            window_system: WindowSystem::new(),
            translator: EventTranslator::new(),
            dispatcher,
            input: Input::new(),

            frame_count: 0,
            last_tick: Instant::now(),
            last_time_printed: Instant::now(),
            error: None,
        }
    }

    pub fn run(mut self) -> Result<(), anyhow::Error> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn create_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window_attributes = Window::default_attributes()
            .with_title("Lumen")
            .with_min_inner_size(LogicalSize::new(32, 32))
            .with_inner_size(PhysicalSize::new(self.args.width, self.args.height));

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        self.window_system.acquire();
        self.window_open = true;
        self.window = Some(window.clone());

        let renderer = Renderer::new(&window, RendererConfig::from_args(&self.args), &self.paths.shader_directory)?;
        self.app.prepare(&renderer, &self.paths)?;

        window.request_redraw();
        self.renderer = Some(renderer);
        Ok(())
    }

    fn close_window(&mut self, event_loop: &ActiveEventLoop) {
        if !self.window_open {
            return;
        }
        self.window_open = false;
        self.renderer = None;
        if let Some(window) = &self.window {
            window.set_visible(false);
        }
        if self.window_system.release() == WindowSystemTransition::Stopped {
            event_loop.exit();
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.error.get_or_insert(e);
        self.close_window(event_loop);
        event_loop.exit();
    }

    fn process_event(&mut self, event_loop: &ActiveEventLoop, event: &Event) {
        self.input.on_event(event);

        if self.dispatcher.dispatch(event) == EventFlow::Continue {
            self.app.on_event(event);
        }

        match event {
            Event::WindowResized(resized) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(resized.width, resized.height);
                }
            }
            Event::WindowMinimized(minimized) if minimized.minimized => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(0, 0);
                }
            }
            Event::WindowClosed(_) => self.close_window(event_loop),
            _ => {}
        }
    }

    #[profiling::function]
    fn redraw(&mut self) -> anyhow::Result<()> {
        let delta_time = self.tick();

        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        self.app.tick(delta_time, &self.input);

        if renderer.begin_frame()? {
            let list = self.app.render(renderer.draw_extent());
            renderer.draw(&list.scene, &list.objects)?;
            window.pre_present_notify();
            renderer.end_frame()?;
        }

        window.request_redraw();
        profiling::finish_frame!();
        Ok(())
    }

    fn tick(&mut self) -> f32 {
        self.input.update();

        let now = Instant::now();
        let delta_time = now - self.last_tick;
        self.last_tick = now;

        let last_time_print_elapsed = (now - self.last_time_printed).as_secs_f32();
        if last_time_print_elapsed > 1. {
            info!("Frame rate: {} fps", self.frame_count as f32 / last_time_print_elapsed);
            self.last_time_printed = now;
            self.frame_count = 0;
        }
        self.frame_count += 1;

        delta_time.as_secs_f32()
    }
}
