// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use prism_math::glam::Mat4;
use prism_math::Transform;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports zero in at least one dimension.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.is_zero() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Opaque id of a texture registered with the UI compositor.
///
/// Handles are never reused: a texture rebuilt behind the same logical slot gets a
/// fresh handle, so a handle captured before a rebuild is detectably stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// What happened to one requested frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Window has no drawable area; nothing was submitted.
    Skipped,
    /// The surface went stale mid-frame and was rebuilt; the frame was dropped.
    Rebuilt,
}

/// Scene-side surface handed to the UI: what the viewport samples and how the
/// editor drives the camera and the object transform.
pub trait SceneControl {
    fn scene_texture(&self) -> TextureHandle;
    fn scene_size(&self) -> RenderSize;
    fn set_view_projection(&mut self, view: Mat4, projection: Mat4);
    /// Zero or unchanged sizes are ignored.
    fn on_viewport_resize(&mut self, size: RenderSize) -> Result<()>;
    fn transform(&self) -> &Transform;
    fn transform_mut(&mut self) -> &mut Transform;
}

pub trait Renderer {
    type Config;
    type Frame;

    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: Self::Config,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records the latest window size. The rebuild happens at the top of the next frame.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self, frame: &Self::Frame) -> Result<FrameOutcome>;
    /// Takes effect at the top of the next frame.
    fn set_vsync(&mut self, on: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_in_either_dimension_is_zero() {
        assert!(RenderSize::new(0, 720).is_zero());
        assert!(RenderSize::new(1280, 0).is_zero());
        assert!(!RenderSize::new(1, 1).is_zero());
    }

    #[test]
    fn aspect_of_zero_size_is_one() {
        assert_eq!(RenderSize::new(0, 0).aspect(), 1.0);
        assert_eq!(RenderSize::new(200, 100).aspect(), 2.0);
    }
}
