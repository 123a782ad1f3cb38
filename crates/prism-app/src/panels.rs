// SPDX-License-Identifier: CEPL-1.0
use egui::load::SizedTexture;
use egui::{pos2, vec2, Color32, DragValue, Rect, Sense, Stroke};
use prism_core::{LogLevel, LogRing};
use prism_math::glam::Vec3;
use prism_render::{RenderSize, SceneControl};
use prism_render_vk::DeviceInfo;

use crate::sysinfo::{gib, History, SystemSampler, HISTORY_LEN};

const PLOT_HEIGHT: f32 = 80.0;

/// What the viewport panel learned this pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewportState {
    pub hovered: bool,
    /// Physical pixel size the scene should be rendered at.
    pub desired: RenderSize,
}

pub struct PanelContext<'a> {
    pub scene: &'a mut dyn SceneControl,
    pub scene_texture: Option<egui::TextureId>,
    pub device: &'a DeviceInfo,
    pub system: &'a SystemSampler,
    pub log: &'a LogRing,
    pub viewport: &'a mut ViewportState,
    pub vsync: &'a mut bool,
    pub exit_requested: &'a mut bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Panel {
    MainMenu,
    DeviceInfo,
    SystemInfo,
    SceneHierarchy,
    Inspector,
    Console,
    Viewport,
}

impl Panel {
    /// Draw order. Edge panels claim their space before the viewport takes the rest.
    pub const ALL: [Panel; 7] = [
        Panel::MainMenu,
        Panel::DeviceInfo,
        Panel::SystemInfo,
        Panel::SceneHierarchy,
        Panel::Inspector,
        Panel::Console,
        Panel::Viewport,
    ];

    pub fn draw(self, ctx: &egui::Context, pc: &mut PanelContext<'_>) {
        match self {
            Panel::MainMenu => main_menu(ctx, pc.vsync, pc.exit_requested),
            Panel::DeviceInfo => device_info(ctx, pc.device),
            Panel::SystemInfo => system_info(ctx, pc.system, pc.device.vram_bytes),
            Panel::SceneHierarchy => scene_hierarchy(ctx),
            Panel::Inspector => inspector(ctx, pc.scene),
            Panel::Console => console(ctx, pc.log),
            Panel::Viewport => viewport(ctx, pc.scene_texture, pc.viewport),
        }
    }
}

pub fn draw_all(ctx: &egui::Context, pc: &mut PanelContext<'_>) {
    for panel in Panel::ALL {
        panel.draw(ctx, pc);
    }
}

fn main_menu(ctx: &egui::Context, vsync: &mut bool, exit: &mut bool) {
    egui::TopBottomPanel::top("main_menu").show(ctx, |ui| {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Exit").clicked() {
                    *exit = true;
                    ui.close_menu();
                }
            });
            ui.menu_button("View", |ui| {
                ui.checkbox(vsync, "VSync");
            });
        });
    });
}

fn device_info(ctx: &egui::Context, device: &DeviceInfo) {
    egui::Window::new("Device Info")
        .default_pos(pos2(24.0, 48.0))
        .show(ctx, |ui| {
            let (major, minor, patch) = device.api_version;
            ui.label(format!("Device: {}", device.name));
            ui.label(format!("Type: {}", device.device_type));
            ui.label(format!("API Version: {major}.{minor}.{patch}"));
            ui.label(format!("Driver Version: {}", device.driver_version));
        });
}

fn system_info(ctx: &egui::Context, system: &SystemSampler, vram_bytes: u64) {
    egui::Window::new("System Info")
        .default_pos(pos2(24.0, 200.0))
        .default_width(260.0)
        .show(ctx, |ui| {
            match system.memory {
                Some(mem) => ui.label(format!(
                    "RAM: {:.2} / {:.2} GB",
                    gib(mem.used_bytes()),
                    gib(mem.total_bytes)
                )),
                None => ui.label("RAM: unavailable"),
            };
            ui.label(format!("VRAM: {:.2} GB", gib(vram_bytes)));

            ui.separator();
            let cpu = system.cpu_history.latest().unwrap_or(0.0);
            ui.label(format!("CPU Usage: {cpu:.1}%"));
            sparkline(ui, &system.cpu_history, Color32::from_rgb(110, 190, 255));
            let ram = system.ram_history.latest().unwrap_or(0.0);
            ui.label(format!("RAM Usage: {ram:.1}%"));
            sparkline(ui, &system.ram_history, Color32::from_rgb(255, 170, 90));
        });
}

/// Percent history over a fixed 0..100 range, newest sample on the right.
fn sparkline(ui: &mut egui::Ui, history: &History, color: Color32) {
    let (rect, _) = ui.allocate_exact_size(vec2(ui.available_width(), PLOT_HEIGHT), Sense::hover());
    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, 2.0, ui.visuals().extreme_bg_color);

    let step = rect.width() / (HISTORY_LEN - 1) as f32;
    let offset = HISTORY_LEN - history.len();
    let points: Vec<_> = history
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = rect.left() + (offset + i) as f32 * step;
            let y = rect.bottom() - rect.height() * v.clamp(0.0, 100.0) / 100.0;
            pos2(x, y)
        })
        .collect();
    if points.len() >= 2 {
        painter.add(egui::Shape::line(points, Stroke::new(1.5, color)));
    }
}

fn scene_hierarchy(ctx: &egui::Context) {
    egui::SidePanel::left("scene_hierarchy")
        .default_width(180.0)
        .show(ctx, |ui| {
            ui.heading("Scene Hierarchy");
            ui.separator();
            let _ = ui.selectable_label(true, "Cube");
        });
}

fn vec3_row(ui: &mut egui::Ui, label: &str, v: &mut Vec3, speed: f64) {
    ui.horizontal(|ui| {
        ui.label(label);
        ui.add(DragValue::new(&mut v.x).speed(speed).prefix("x "));
        ui.add(DragValue::new(&mut v.y).speed(speed).prefix("y "));
        ui.add(DragValue::new(&mut v.z).speed(speed).prefix("z "));
    });
}

fn inspector(ctx: &egui::Context, scene: &mut dyn SceneControl) {
    egui::SidePanel::right("inspector")
        .default_width(260.0)
        .show(ctx, |ui| {
            ui.heading("Inspector");
            ui.separator();
            egui::CollapsingHeader::new("Transform")
                .default_open(true)
                .show(ui, |ui| {
                    let t = scene.transform_mut();
                    vec3_row(ui, "Position", &mut t.position, 0.1);
                    vec3_row(ui, "Rotation", &mut t.rotation_deg, 1.0);
                    vec3_row(ui, "Scale", &mut t.scale, 0.1);
                });
        });
}

fn level_color(level: LogLevel) -> Option<Color32> {
    match level {
        LogLevel::Info => None,
        LogLevel::Warn => Some(Color32::from_rgb(230, 200, 80)),
        LogLevel::Error => Some(Color32::from_rgb(240, 90, 80)),
    }
}

fn console(ctx: &egui::Context, log: &LogRing) {
    egui::TopBottomPanel::bottom("console")
        .resizable(true)
        .default_height(160.0)
        .show(ctx, |ui| {
            ui.heading("Console");
            ui.separator();
            egui::ScrollArea::vertical()
                .auto_shrink([false, false])
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in log.iter() {
                        let text = egui::RichText::new(&line.text).monospace();
                        match level_color(line.level) {
                            Some(c) => ui.label(text.color(c)),
                            None => ui.label(text),
                        };
                    }
                });
        });
}

/// Physical size of a logical area, rounded to whole pixels.
pub fn physical_size(points: egui::Vec2, pixels_per_point: f32) -> RenderSize {
    let px = |v: f32| (v * pixels_per_point).round().max(0.0) as u32;
    RenderSize::new(px(points.x), px(points.y))
}

fn viewport(ctx: &egui::Context, texture: Option<egui::TextureId>, state: &mut ViewportState) {
    egui::CentralPanel::default()
        .frame(egui::Frame::default())
        .show(ctx, |ui| {
            let avail = ui.available_size();
            state.desired = physical_size(avail, ctx.pixels_per_point());
            state.hovered = match texture {
                Some(id) => {
                    // scene rows come out bottom-up
                    let image = egui::Image::from_texture(SizedTexture::new(id, avail))
                        .uv(Rect::from_min_max(pos2(0.0, 1.0), pos2(1.0, 0.0)))
                        .sense(Sense::hover());
                    ui.add(image).hovered()
                }
                None => {
                    ui.centered_and_justified(|ui| ui.label("scene unavailable"));
                    false
                }
            };
        });
}
