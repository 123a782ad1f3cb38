// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod config;
mod editor;
mod panels;
mod sysinfo;
mod ui;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use prism_core::{init_tracing, LogRing};
use prism_platform::AppEvent;
use prism_render::{FrameOutcome, RenderSize, Renderer, SceneControl};
use prism_render_vk::{DeviceInfo, EngineConfig, VkEngine};
use tracing::{debug, error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{CursorGrabMode, Window, WindowId},
};

use crate::config::{load_cfg, AppCfg};
use crate::editor::{bypasses_ui, CursorMode, Editor};
use crate::panels::{PanelContext, ViewportState};
use crate::sysinfo::SystemSampler;
use crate::ui::UiLayer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; missing means defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,
    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: bool,
}

/// Everything tied to the live window. Field order is drop order: the engine
/// releases its surface before the window goes away.
struct Session {
    engine: VkEngine,
    ui: UiLayer,
    device: DeviceInfo,
    window: Window,
}

struct App {
    cfg: AppCfg,
    engine_cfg: EngineConfig,
    session: Option<Session>,
    fatal: Option<anyhow::Error>,

    editor: Editor,
    log: LogRing,
    system: SystemSampler,
    viewport: ViewportState,
    pending_viewport: Option<RenderSize>,
    vsync: bool,
    exit_requested: bool,

    paused: bool,
    last_frame: Instant,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        let aspect = RenderSize::new(cfg.window.width, cfg.window.height).aspect();
        let engine_cfg = cfg.engine_config().with_env_overrides();
        Self {
            vsync: engine_cfg.present.vsync,
            engine_cfg,
            editor: Editor::new(cfg.camera_settings(), aspect),
            log: LogRing::with_capacity(cfg.console.capacity),
            cfg,
            session: None,
            fatal: None,
            system: SystemSampler::new(),
            viewport: ViewportState::default(),
            pending_viewport: None,
            exit_requested: false,
            paused: false,
            last_frame: Instant::now(),
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn open_session(&mut self, event_loop: &ActiveEventLoop) -> Result<Session> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("creating window")?;
        let size = window.inner_size();
        let size = RenderSize::new(size.width, size.height);

        let engine = VkEngine::create(&window, &window, size, self.engine_cfg)
            .context("initialising the Vulkan engine")?;
        let device = engine.device_info();
        info!(
            "device: {} ({}), API {}.{}.{}",
            device.name,
            device.device_type,
            device.api_version.0,
            device.api_version.1,
            device.api_version.2
        );
        self.log.info(format!("Using {}", device.name));

        let ui = UiLayer::new(&window);
        self.paused = size.is_zero();
        Ok(Session {
            engine,
            ui,
            device,
            window,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.session = None;
        event_loop.exit();
    }

    fn route(&mut self, event_loop: &ActiveEventLoop, event: &WindowEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let ui_consumed = session.ui.on_window_event(&session.window, event);

        if let WindowEvent::Resized(size) = event {
            let size = RenderSize::new(size.width, size.height);
            self.paused = size.is_zero();
            session.engine.resize(size);
            debug!("resized to {}x{} (paused={})", size.width, size.height, self.paused);
        }
        if let WindowEvent::Occluded(occluded) = event {
            let size = session.window.inner_size();
            self.paused = *occluded || RenderSize::new(size.width, size.height).is_zero();
        }

        let Some(app_event) = AppEvent::from_window_event(event) else {
            return;
        };
        // Over the viewport the editor has first claim; elsewhere egui does.
        if ui_consumed && !self.viewport.hovered && !bypasses_ui(&app_event) {
            return;
        }

        let outcome = self
            .editor
            .dispatch(&app_event, self.viewport.hovered, &mut self.log);
        if let Some(mode) = outcome.cursor {
            apply_cursor(&session.window, mode);
        }
        if outcome.exit {
            info!("close requested");
            self.shutdown(event_loop);
        }
    }

    fn frame(&mut self) -> Result<()> {
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        // The old scene texture is released here, before any UI pass can sample it.
        if let Some(size) = self.pending_viewport.take() {
            s.engine
                .on_viewport_resize(size)
                .context("resizing the scene viewport")?;
        }

        self.editor
            .update(dt, self.viewport.hovered, s.engine.scene_size().aspect());
        let camera = self.editor.camera();
        s.engine
            .set_view_projection(camera.view(), camera.projection());

        let scene_texture = s.engine.ui_texture(s.engine.scene_texture());
        let ui_frame = {
            let mut pc = PanelContext {
                scene: &mut s.engine,
                scene_texture,
                device: &s.device,
                system: &self.system,
                log: &self.log,
                viewport: &mut self.viewport,
                vsync: &mut self.vsync,
                exit_requested: &mut self.exit_requested,
            };
            s.ui
                .run(&s.window, |ctx| panels::draw_all(ctx, &mut pc))
        };

        // Only an actual change schedules a swap chain rebuild.
        s.engine.set_vsync(self.vsync);
        if self.viewport.desired != s.engine.scene_size() {
            self.pending_viewport = Some(self.viewport.desired);
        }

        match s.engine.render(&ui_frame).context("rendering frame")? {
            FrameOutcome::Presented => self.frames = self.frames.saturating_add(1),
            FrameOutcome::Skipped | FrameOutcome::Rebuilt => {}
        }
        Ok(())
    }
}

fn apply_cursor(window: &Window, mode: CursorMode) {
    match mode {
        CursorMode::Captured => {
            let grabbed = window
                .set_cursor_grab(CursorGrabMode::Confined)
                .or_else(|_| window.set_cursor_grab(CursorGrabMode::Locked));
            if let Err(e) = grabbed {
                debug!("cursor grab unavailable: {e}");
            }
            window.set_cursor_visible(false);
        }
        CursorMode::Normal => {
            if let Err(e) = window.set_cursor_grab(CursorGrabMode::None) {
                debug!("cursor release failed: {e}");
            }
            window.set_cursor_visible(true);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_none() {
            match self.open_session(event_loop) {
                Ok(session) => {
                    session.window.request_redraw();
                    self.session = Some(session);
                }
                Err(e) => {
                    self.fail(event_loop, e);
                    return;
                }
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        info!("resumed (paused={})", self.paused);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.session {
            Some(s) if s.window.id() == window_id => {}
            _ => return,
        }

        if let WindowEvent::RedrawRequested = event {
            if self.paused {
                return;
            }
            if let Err(e) = self.frame() {
                self.fail(event_loop, e);
            }
            return;
        }
        self.route(event_loop, &event);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exit_requested {
            info!("exit requested from menu");
            self.exit_requested = false;
            self.shutdown(event_loop);
            return;
        }
        let Some(session) = &self.session else {
            return;
        };

        if self.paused {
            // minimised or hidden: sleep until the window comes back
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        session.window.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.system.sample();
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if args.no_vsync {
        cfg.render.vsync = false;
    }
    if args.validation {
        cfg.render.validation = true;
    }

    let event_loop: EventLoop<()> = EventLoop::new().context("creating event loop")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("running event loop")?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
