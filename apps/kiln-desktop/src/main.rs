use anyhow::{Context, Result};
use clap::Parser;
use egui::Context as EguiContext;
use glam::Vec2;
use kiln_assets::Manifest;
use kiln_input::{Action, InputState, Key};
use kiln_render::RenderOptions;
use kiln_render_wgpu::WgpuContext;
use kiln_scene::Game;
use kiln_tools::InspectorPanel;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser)]
#[command(name = "kiln-desktop", about = "Kiln scene viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scene manifest to load
    #[arg(default_value = "demos/scene.yaml")]
    scene: PathBuf,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    /// Fail the frame on shader binding mismatches instead of skipping the draw
    #[arg(long)]
    strict: bool,
}

/// Window keys the scene reacts to.
fn map_key(code: KeyCode) -> Option<Key> {
    Some(match code {
        KeyCode::KeyW => Key::W,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyD => Key::D,
        KeyCode::KeyQ => Key::Q,
        KeyCode::KeyE => Key::E,
        KeyCode::Space => Key::Space,
        KeyCode::ControlLeft => Key::LeftControl,
        KeyCode::ShiftLeft => Key::LeftShift,
        KeyCode::Escape => Key::Escape,
        KeyCode::F1 => Key::F1,
        _ => return None,
    })
}

/// Everything that exists once the window does.
struct Running {
    window: Arc<Window>,
    gpu: WgpuContext,
    game: Game,
    egui_winit: egui_winit::State,
}

struct App {
    manifest: Manifest,
    options: RenderOptions,
    size: PhysicalSize<u32>,
    running: Option<Running>,
    egui_ctx: EguiContext,
    panel: InspectorPanel,
    input: InputState,
    started: Instant,
    last_frame: Instant,
    /// Startup failure, reported from `main` after the loop exits.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(manifest: Manifest, options: RenderOptions, size: PhysicalSize<u32>) -> Self {
        let now = Instant::now();
        Self {
            manifest,
            options,
            size,
            running: None,
            egui_ctx: EguiContext::default(),
            panel: InspectorPanel::new(),
            input: InputState::new(),
            started: now,
            last_frame: now,
            failure: None,
        }
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let title = if self.manifest.name.is_empty() {
            "Kiln".to_string()
        } else {
            format!("Kiln - {}", self.manifest.name)
        };
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(self.size);
        let window = Arc::new(event_loop.create_window(attrs).context("creating window")?);

        let size = window.inner_size();
        let mut gpu = pollster::block_on(WgpuContext::new(
            window.clone(),
            size.width.max(1),
            size.height.max(1),
        ))
        .context("initialising graphics device")?;
        let mut game =
            Game::build(&mut gpu, &self.manifest, self.options).context("building scene")?;
        game.on_resize(&mut gpu, size.width, size.height)?;

        let egui_winit = egui_winit::State::new(
            self.egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        Ok(Running {
            window,
            gpu,
            game,
            egui_winit,
        })
    }

    fn handle_key(&mut self, key: Key, pressed: bool, repeat: bool) {
        if !pressed {
            self.input.release(key);
            return;
        }
        self.input.press(key);
        if !repeat && self.input.bindings().action_for(key) == Some(Action::ToggleInspector) {
            self.panel.toggle();
        }
    }

    fn redraw(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        let total = (now - self.started).as_secs_f32();
        self.last_frame = now;

        let Running {
            window,
            gpu,
            game,
            egui_winit,
        } = running;
        let raw_input = egui_winit.take_egui_input(window);
        let ctx = &self.egui_ctx;
        let panel = &mut self.panel;

        let result = game.frame(gpu, &self.input, dt, total, |game, gpu| {
            let output = ctx.run(raw_input, |ctx| panel.show(ctx, game));
            egui_winit.handle_platform_output(window, output.platform_output);
            let primitives = ctx.tessellate(output.shapes, output.pixels_per_point);
            gpu.paint_overlay(primitives, &output.textures_delta, output.pixels_per_point);
        });
        self.input.end_frame();

        if let Err(e) = result {
            tracing::error!("frame failed: {e}");
            gpu.discard_frame();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(running) => {
                tracing::info!(
                    scene = %self.manifest.name,
                    entities = running.game.entities().len(),
                    "scene ready"
                );
                self.running = Some(running);
            }
            Err(e) => {
                tracing::error!("startup failed: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(running) = &mut self.running {
            let response = running.egui_winit.on_window_event(&running.window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(running) = &mut self.running {
                    if let Err(e) = running
                        .game
                        .on_resize(&mut running.gpu, size.width, size.height)
                    {
                        tracing::error!("resize failed: {e}");
                    }
                }
            }
            WindowEvent::Focused(false) => self.input.clear(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => {
                if let Some(key) = map_key(code) {
                    self.handle_key(key, state == ElementState::Pressed, repeat);
                }
                if self.input.quit_requested() {
                    event_loop.exit();
                }
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state,
                ..
            } => {
                let held = state == ElementState::Pressed;
                self.input.set_look_held(held);
                if let Some(running) = &self.running {
                    running.window.set_cursor_visible(!held);
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw();
                if let Some(running) = &self.running {
                    running.window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.input.look_active() {
                self.input
                    .add_pointer_delta(Vec2::new(delta.0 as f32, delta.1 as f32));
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("kiln-desktop starting");

    let manifest = Manifest::load(&cli.scene)
        .with_context(|| format!("loading {}", cli.scene.display()))?;
    let options = RenderOptions {
        strict_bindings: cli.strict,
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(manifest, options, PhysicalSize::new(cli.width, cli.height));
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_keys_map_to_bound_actions() {
        let bindings = kiln_input::KeyBindings::default();
        let forward = map_key(KeyCode::KeyW).unwrap();
        assert_eq!(bindings.action_for(forward), Some(Action::MoveForward));
        let boost = map_key(KeyCode::ShiftLeft).unwrap();
        assert_eq!(bindings.action_for(boost), Some(Action::Boost));
        assert_eq!(map_key(KeyCode::KeyZ), None);
    }

    #[test]
    fn f1_toggles_only_on_first_press() {
        let manifest = Manifest::default();
        let mut app = App::new(manifest, RenderOptions::default(), PhysicalSize::new(64, 64));
        assert!(app.panel.is_open());
        app.handle_key(Key::F1, true, false);
        assert!(!app.panel.is_open());
        app.handle_key(Key::F1, true, true);
        assert!(!app.panel.is_open());
        app.handle_key(Key::F1, false, false);
        assert!(!app.input.key_down(Key::F1));
    }

    #[test]
    fn escape_requests_quit() {
        let mut app = App::new(Manifest::default(), RenderOptions::default(), PhysicalSize::new(64, 64));
        app.handle_key(Key::Escape, true, false);
        assert!(app.input.quit_requested());
    }
}
