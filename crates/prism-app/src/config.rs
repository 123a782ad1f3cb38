// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use prism_math::CameraSettings;
use prism_render_vk::{EngineConfig, PresentConfig, VsyncMode as VkVsyncMode};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "Prism Editor".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub swapchain_images: u32,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub scene_clear_color: [f32; 4],
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            vsync: true,
            vsync_mode: VsyncMode::Fifo,
            swapchain_images: 2,
            frames_in_flight: 2,
            clear_color: [0.1, 0.1, 0.1, 1.0],
            scene_clear_color: [0.05, 0.05, 0.05, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CameraCfg {
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
    pub distance: f32,
    pub yaw_deg: f32,
    pub pitch_deg: f32,
    pub move_speed: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let s = CameraSettings::default();
        Self {
            fov_deg: s.fov_deg,
            near: s.near,
            far: s.far,
            distance: s.distance,
            yaw_deg: s.yaw_deg,
            pitch_deg: s.pitch_deg,
            move_speed: s.move_speed,
            rotate_speed: s.rotate_speed,
            zoom_speed: s.zoom_speed,
            pan_speed: s.pan_speed,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ConsoleCfg {
    pub capacity: usize,
}

impl Default for ConsoleCfg {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub camera: CameraCfg,
    pub console: ConsoleCfg,
}

impl AppCfg {
    pub fn camera_settings(&self) -> CameraSettings {
        let c = &self.camera;
        CameraSettings {
            fov_deg: c.fov_deg,
            near: c.near,
            far: c.far,
            distance: c.distance,
            yaw_deg: c.yaw_deg,
            pitch_deg: c.pitch_deg,
            move_speed: c.move_speed,
            pan_speed: c.pan_speed,
            rotate_speed: c.rotate_speed,
            zoom_speed: c.zoom_speed,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let r = &self.render;
        EngineConfig {
            present: PresentConfig {
                desired_image_count: r.swapchain_images.max(2),
                vsync: r.vsync,
                vsync_mode: match r.vsync_mode {
                    VsyncMode::Fifo => VkVsyncMode::Fifo,
                    VsyncMode::Mailbox => VkVsyncMode::Mailbox,
                },
                clear_color: r.clear_color,
            },
            frames_in_flight: r.frames_in_flight.max(2),
            scene_clear_color: r.scene_clear_color,
            validation: r.validation,
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// Missing file means defaults; a malformed one is reported and also yields defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config {} is invalid, using defaults: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("config {} unreadable, using defaults: {e}", path.display());
            AppCfg::default()
        }
    }
}
