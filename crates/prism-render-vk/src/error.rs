// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

/// Startup-time mismatches between what the engine needs and what the device or
/// surface offers. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no memory type matches type bits {type_bits:#x} with {required:?}")]
    NoSuitableMemory {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("surface offers no usable image format")]
    UnsupportedSurfaceFormat,
    #[error("no depth format supports optimal-tiling depth attachments")]
    NoDepthFormat,
    #[error("no physical device exposes a graphics queue that can present")]
    NoSuitableDevice,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("surface is out of date with the window")]
    SurfaceStale,
    #[error("failed to create {what}: {result}")]
    ResourceCreation {
        what: &'static str,
        result: vk::Result,
    },
    #[error("command submission failed at {stage}: {result}")]
    CommandSubmission {
        stage: &'static str,
        result: vk::Result,
    },
    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error(transparent)]
    Slot(#[from] crate::frame::SlotError),
    #[error("ui compositor: {0}")]
    Compositor(#[from] egui_ash_renderer::RendererError),
}

impl EngineError {
    /// Only a stale surface is handled in place; everything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::SurfaceStale)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Tags raw `VkResult`s with the taxonomy bucket they belong to.
pub(crate) trait VkResultExt<T> {
    fn creating(self, what: &'static str) -> EngineResult<T>;
    fn submitting(self, stage: &'static str) -> EngineResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn creating(self, what: &'static str) -> EngineResult<T> {
        self.map_err(|result| EngineError::ResourceCreation { what, result })
    }

    fn submitting(self, stage: &'static str) -> EngineResult<T> {
        self.map_err(|result| EngineError::CommandSubmission { stage, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stale_surface_is_recoverable() {
        assert!(EngineError::SurfaceStale.is_recoverable());
        assert!(!EngineError::from(ConfigurationError::NoDepthFormat).is_recoverable());
        let err: EngineResult<()> = Err(vk::Result::ERROR_DEVICE_LOST).submitting("queue_submit");
        assert!(!err.unwrap_err().is_recoverable());
    }

    #[test]
    fn messages_name_the_failing_object() {
        let err: EngineResult<()> =
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).creating("scene color image");
        assert!(err.unwrap_err().to_string().contains("scene color image"));
    }
}
