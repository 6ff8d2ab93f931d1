//! Windowed host for the watercolor life animation.
//!
//! Creates one window, drives the pipeline with a tick per redraw, and
//! wires a couple of keys: Escape exits, Space cycles through the
//! built-in presets (persisting each switch so the pipeline and the
//! preferences file stay in sync).

mod config;
mod engine;
mod gpu;
mod grid;
mod logo;

use std::path::PathBuf;
use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::config::{SharedSettings, Settings, PRESETS};
use crate::gpu::SaverPipeline;

const DEFAULT_PREFS_FILE: &str = "conway-watercolor.json";

struct App {
    settings: SharedSettings,
    prefs_path: PathBuf,
    assets_dir: PathBuf,
    window: Option<Arc<Window>>,
    pipeline: Option<SaverPipeline>,
    preset_cursor: usize,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(settings: SharedSettings, prefs_path: PathBuf, assets_dir: PathBuf) -> Self {
        Self {
            settings,
            prefs_path,
            assets_dir,
            window: None,
            pipeline: None,
            preset_cursor: 0,
            fatal: None,
        }
    }

    fn abort(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("fatal: {err:#}");
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn cycle_preset(&mut self) {
        let (name, _) = PRESETS[self.preset_cursor % PRESETS.len()];
        self.preset_cursor += 1;
        log::info!("switching to preset {name:?}");

        let Some(loaded) = config::preset(name) else {
            return;
        };
        let mut guard = self.settings.write().expect("settings lock poisoned");
        *guard = loaded;
        if let Err(err) = guard.save(&self.prefs_path) {
            log::warn!("could not persist preset switch: {err}");
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("Conway Watercolor")
            .with_inner_size(LogicalSize::new(1280, 800));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => return self.abort(event_loop, err.into()),
        };

        match SaverPipeline::new(
            window.clone(),
            self.settings.clone(),
            self.prefs_path.clone(),
            self.assets_dir.clone(),
            false,
        ) {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                self.window = Some(window);
            }
            Err(err) => self.abort(event_loop, err),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Space),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.cycle_preset(),
            WindowEvent::Resized(size) => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.resize_surface(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    if let Err(err) = pipeline.tick() {
                        return self.abort(event_loop, err);
                    }
                }
                // Vsync paces the loop; just queue the next frame.
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let prefs_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFS_FILE));
    let assets_dir = std::env::var_os("WATERCOLOR_ASSETS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("assets"));
    log::info!("preferences at {}", prefs_path.display());

    let settings = config::shared(Settings::load(&prefs_path));

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = App::new(settings, prefs_path, assets_dir);
    event_loop.run_app(&mut app)?;

    match app.fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
