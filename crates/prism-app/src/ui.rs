// SPDX-License-Identifier: CEPL-1.0
use prism_platform::winit::event::WindowEvent;
use prism_platform::winit::window::Window;
use prism_render_vk::UiFrame;

/// egui context plus its winit glue. One per window.
pub struct UiLayer {
    ctx: egui::Context,
    state: egui_winit::State,
}

impl UiLayer {
    pub fn new(window: &Window) -> Self {
        let ctx = egui::Context::default();
        let state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        Self { ctx, state }
    }

    /// Feeds one window event to egui. `true` when egui wants it for itself.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.state.on_window_event(window, event).consumed
    }

    /// Runs one UI pass and tessellates it for the compositor.
    pub fn run(&mut self, window: &Window, build: impl FnMut(&egui::Context)) -> UiFrame {
        let input = self.state.take_egui_input(window);
        let output = self.ctx.run(input, build);
        self.state
            .handle_platform_output(window, output.platform_output);
        UiFrame {
            primitives: self.ctx.tessellate(output.shapes, output.pixels_per_point),
            textures_delta: output.textures_delta,
            pixels_per_point: output.pixels_per_point,
        }
    }
}
