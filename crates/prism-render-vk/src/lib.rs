// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

mod compositor;
mod context;
mod error;
mod frame;
mod frame_loop;
mod memory;
mod mesh;
mod pipeline;
mod resize;
mod scene;
mod surface;
mod swapchain;

use anyhow::Result;
use ash::vk;
use prism_math::glam::Mat4;
use prism_math::Transform;
use prism_render::{FrameOutcome, RenderSize, Renderer, SceneControl, TextureHandle};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::frame_loop::FrameOps;

pub use compositor::{EguiCompositor, TextureRegistry, UiFrame};
pub use context::{DeviceContext, DeviceInfo};
pub use error::{ConfigurationError, EngineError, EngineResult};
pub use frame::{FrameScheduler, SlotError, SlotState, SlotTracker};
pub use memory::{
    copy_buffer, create_buffer, download, select_memory_type, upload_via_staging, GpuBuffer,
    GpuImage, GpuSampler,
};
pub use mesh::{Mesh, Vertex};
pub use resize::{ResizeDecision, ResizeGate};
pub use scene::{OffscreenScene, SceneConfig, SceneUniforms};
pub use surface::WindowSurface;
pub use swapchain::{Acquire, Present, PresentConfig, Swapchain, VsyncMode};

/// Overrides `validation` when set to 1/0, true/false or on/off.
pub const VALIDATION_ENV: &str = "PRISM_VALIDATION";

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub present: PresentConfig,
    pub frames_in_flight: usize,
    pub scene_clear_color: [f32; 4],
    pub validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            present: PresentConfig::default(),
            frames_in_flight: 2,
            scene_clear_color: [0.05, 0.05, 0.05, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

impl EngineConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var(VALIDATION_ENV) {
            match parse_flag(&raw) {
                Some(on) => self.validation = on,
                None => warn!("ignoring {VALIDATION_ENV}={raw:?}"),
            }
        }
        self
    }
}

/// Window renderer: swap chain, frame slots, offscreen scene and the egui pass.
pub struct VkEngine {
    // STRICT DROP ORDER: everything below borrows `ctx`; the surface outlives
    // the swap chain and dies before the instance.
    scene: OffscreenScene,
    compositor: EguiCompositor,
    frames: FrameScheduler,
    swapchain: Swapchain,
    surface: WindowSurface,
    ctx: DeviceContext,
    gate: ResizeGate,
    queue: vk::Queue,
}

impl VkEngine {
    pub fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let (ctx, surface) = DeviceContext::with_surface(window, display, config.validation)?;
        let swapchain = Swapchain::create(&ctx, &surface, config.present, size)?;
        let frames = FrameScheduler::new(&ctx, config.frames_in_flight)?;
        let mut compositor = EguiCompositor::new(
            &ctx,
            swapchain.render_pass(),
            swapchain.format(),
            frames.slot_count(),
        )?;
        let scene = OffscreenScene::new(
            &ctx,
            &mut compositor,
            size,
            SceneConfig {
                slots: frames.slot_count(),
                clear_color: config.scene_clear_color,
            },
        )?;
        info!(
            "engine ready: {} frames in flight, validation {}",
            frames.slot_count(),
            if config.validation { "on" } else { "off" }
        );
        Ok(Self {
            queue: ctx.acquire_queue(),
            gate: ResizeGate::new(size),
            scene,
            compositor,
            frames,
            swapchain,
            surface,
            ctx,
        })
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.ctx.device_info()
    }

    /// egui id under which a registered texture is drawn.
    pub fn ui_texture(&self, handle: TextureHandle) -> Option<egui::TextureId> {
        self.compositor.egui_texture(handle)
    }

    /// Rebuilds the chain at the latest window size. `false` when the surface
    /// has no drawable area yet; the gate keeps the rebuild pending.
    fn rebuild_surface(&mut self) -> EngineResult<bool> {
        let size = self.gate.latest();
        if self.gate.is_minimized() {
            self.gate.mark_stale();
            return Ok(false);
        }
        match self.swapchain.rebuild(&self.ctx, &self.surface, size) {
            Ok(()) => {
                debug!(
                    "swap chain at {}x{} with {} images",
                    size.width,
                    size.height,
                    self.swapchain.image_count()
                );
                Ok(true)
            }
            Err(e) if e.is_recoverable() => {
                debug!("surface still stale after rebuild: {e}");
                self.gate.mark_stale();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// One outer frame. Texture frees from `ui` are parked on the slot in use
    /// and executed once that slot's fence comes round again.
    pub fn draw_frame(&mut self, ui: &UiFrame) -> EngineResult<FrameOutcome> {
        let slot = self.frames.current();
        let outcome = frame_loop::run_frame(&mut EngineFrame { engine: self, ui }, slot);
        self.compositor.defer_free(slot, &ui.textures_delta.free);
        outcome
    }
}

/// One frame's view of the engine, paired with the UI output it composites.
struct EngineFrame<'a> {
    engine: &'a mut VkEngine,
    ui: &'a UiFrame,
}

impl FrameOps for EngineFrame<'_> {
    fn poll_resize(&mut self) -> ResizeDecision {
        self.engine.gate.poll()
    }

    fn rebuild_surface(&mut self) -> EngineResult<bool> {
        self.engine.rebuild_surface()
    }

    fn upload_ui(&mut self) -> EngineResult<()> {
        let e = &mut *self.engine;
        e.compositor
            .upload(e.queue, e.ctx.command_pool(), &self.ui.textures_delta)
    }

    fn wait_slot(&mut self, slot: usize) -> EngineResult<()> {
        self.engine.frames.wait_current()?;
        self.engine.compositor.release_deferred(slot)
    }

    fn acquire(&mut self, slot: usize) -> EngineResult<Acquire> {
        let e = &*self.engine;
        e.swapchain.acquire_next(u64::MAX, e.frames.image_available(slot))
    }

    fn render_scene(&mut self, slot: usize) -> EngineResult<()> {
        let e = &mut *self.engine;
        e.scene.render(&e.ctx, slot)
    }

    fn record_and_submit(&mut self, slot: usize, image_index: u32) -> EngineResult<vk::Semaphore> {
        let e = &mut *self.engine;
        let cmd = e.frames.begin_recording(slot)?;
        unsafe { e.swapchain.begin_render_pass(cmd, image_index) };
        let recorded = e.compositor.record(
            cmd,
            e.swapchain.extent(),
            self.ui.pixels_per_point,
            &self.ui.primitives,
        );
        unsafe { e.ctx.device().cmd_end_render_pass(cmd) };
        recorded?;
        e.frames.submit(slot, e.queue)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> EngineResult<Present> {
        let e = &*self.engine;
        e.swapchain.present(e.queue, image_index, wait)
    }

    fn advance(&mut self) {
        self.engine.frames.advance();
    }
}

/// Applies a vsync request; a real change rebuilds the chain on the next frame.
fn request_vsync(present: &mut PresentConfig, gate: &mut ResizeGate, on: bool) {
    if present.set_vsync(on) {
        gate.mark_stale();
    }
}

impl Drop for VkEngine {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("device idle wait on shutdown failed: {e}");
        }
    }
}

impl Renderer for VkEngine {
    type Config = EngineConfig;
    type Frame = UiFrame;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: EngineConfig,
    ) -> Result<Self> {
        Ok(Self::create(window, display, size, config)?)
    }

    fn resize(&mut self, size: RenderSize) {
        self.gate.notify(size);
    }

    fn render(&mut self, frame: &UiFrame) -> Result<FrameOutcome> {
        Ok(self.draw_frame(frame)?)
    }

    fn set_vsync(&mut self, on: bool) {
        request_vsync(self.swapchain.config_mut(), &mut self.gate, on);
    }
}

impl SceneControl for VkEngine {
    fn scene_texture(&self) -> TextureHandle {
        self.scene.texture()
    }

    fn scene_size(&self) -> RenderSize {
        self.scene.size()
    }

    fn set_view_projection(&mut self, view: Mat4, projection: Mat4) {
        self.scene.set_view_projection(view, projection);
    }

    fn on_viewport_resize(&mut self, size: RenderSize) -> Result<()> {
        self.scene.resize(&self.ctx, &mut self.compositor, size)?;
        Ok(())
    }

    fn transform(&self) -> &Transform {
        self.scene.transform()
    }

    fn transform_mut(&mut self) -> &mut Transform {
        self.scene.transform_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_flag_parsing() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn vsync_change_rebuilds_once_and_repeats_are_free() {
        let mut present = PresentConfig::default();
        let mut gate = ResizeGate::new(RenderSize::new(800, 600));

        request_vsync(&mut present, &mut gate, true);
        assert_eq!(gate.poll(), ResizeDecision::Idle);

        request_vsync(&mut present, &mut gate, false);
        request_vsync(&mut present, &mut gate, false);
        assert!(!present.vsync);
        assert_eq!(gate.poll(), ResizeDecision::Rebuild(RenderSize::new(800, 600)));
        assert_eq!(gate.poll(), ResizeDecision::Idle);
    }

    #[test]
    fn default_config_double_buffers() {
        let c = EngineConfig::default();
        assert_eq!(c.frames_in_flight, 2);
        assert_eq!(c.present.desired_image_count, 2);
        assert!(c.present.vsync);
        assert_eq!(c.scene_clear_color, [0.05, 0.05, 0.05, 1.0]);
    }
}
