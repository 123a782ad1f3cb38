// SPDX-License-Identifier: CEPL-1.0
//! Editor input: explicit handlers run first, the camera gets whatever they leave.

use prism_core::LogRing;
use prism_math::glam::Vec2;
use prism_math::{CameraMove, CameraSettings, OrbitCamera};
use prism_platform::winit::keyboard::KeyCode;
use prism_platform::{AppEvent, MouseButton};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorMode {
    Normal,
    /// Hidden and held in the window while the camera is being dragged.
    Captured,
}

/// Side effects the shell must apply after an event went through the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub consumed: bool,
    pub exit: bool,
    pub cursor: Option<CursorMode>,
}

impl Dispatch {
    fn consumed() -> Self {
        Self {
            consumed: true,
            ..Self::default()
        }
    }
}

/// Events the editor must observe even when the UI claimed them, so held state
/// (camera drag, fly keys) never gets stuck.
pub fn bypasses_ui(event: &AppEvent) -> bool {
    matches!(
        event,
        AppEvent::CloseRequested
            | AppEvent::Resized { .. }
            | AppEvent::Focused(_)
            | AppEvent::MouseButtonReleased(_)
            | AppEvent::KeyReleased { .. }
    )
}

fn fly_bit(code: KeyCode) -> Option<CameraMove> {
    Some(match code {
        KeyCode::KeyW => CameraMove::FORWARD,
        KeyCode::KeyS => CameraMove::BACKWARD,
        KeyCode::KeyA => CameraMove::LEFT,
        KeyCode::KeyD => CameraMove::RIGHT,
        KeyCode::KeyE => CameraMove::UP,
        KeyCode::KeyQ => CameraMove::DOWN,
        _ => return None,
    })
}

pub struct Editor {
    camera: OrbitCamera,
    control_active: bool,
    pan_active: bool,
    cursor: Vec2,
    last_cursor: Vec2,
    held: CameraMove,
}

impl Editor {
    pub fn new(settings: CameraSettings, aspect: f32) -> Self {
        Self {
            camera: OrbitCamera::new(settings, aspect),
            control_active: false,
            pan_active: false,
            cursor: Vec2::ZERO,
            last_cursor: Vec2::ZERO,
            held: CameraMove::empty(),
        }
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn is_controlling_camera(&self) -> bool {
        self.control_active
    }

    pub fn held_keys(&self) -> CameraMove {
        self.held
    }

    /// Routes one event. `viewport_hovered` is the viewport panel's state from the
    /// last UI pass.
    pub fn dispatch(&mut self, event: &AppEvent, viewport_hovered: bool, log: &mut LogRing) -> Dispatch {
        self.track(event);
        let handled = self.handle(event, viewport_hovered, log);
        if handled.consumed {
            return handled;
        }
        self.camera_fallback(event);
        handled
    }

    /// Key state and cursor position are observed for every event, consumed or not.
    fn track(&mut self, event: &AppEvent) {
        match event {
            AppEvent::KeyPressed { code: Some(code), .. } => {
                if let Some(bit) = fly_bit(*code) {
                    self.held |= bit;
                }
            }
            AppEvent::KeyReleased { code: Some(code) } => {
                if let Some(bit) = fly_bit(*code) {
                    self.held -= bit;
                }
            }
            AppEvent::Focused(false) => self.held = CameraMove::empty(),
            _ => {}
        }
    }

    fn handle(&mut self, event: &AppEvent, viewport_hovered: bool, log: &mut LogRing) -> Dispatch {
        match event {
            AppEvent::CloseRequested => Dispatch {
                consumed: true,
                exit: true,
                cursor: None,
            },
            AppEvent::MouseButtonPressed(button) => {
                log.info(format!("Mouse Button Pressed: {}", button.code()));
                if viewport_hovered && matches!(button, MouseButton::Right | MouseButton::Middle) {
                    if *button == MouseButton::Right {
                        self.control_active = true;
                    } else {
                        self.pan_active = true;
                    }
                    self.last_cursor = self.cursor;
                    return Dispatch {
                        consumed: true,
                        exit: false,
                        cursor: Some(CursorMode::Captured),
                    };
                }
                Dispatch::default()
            }
            AppEvent::MouseButtonReleased(button) => {
                log.info(format!("Mouse Button Released: {}", button.code()));
                let ended = match button {
                    MouseButton::Right => std::mem::take(&mut self.control_active),
                    MouseButton::Middle => std::mem::take(&mut self.pan_active),
                    _ => false,
                };
                if ended || *button == MouseButton::Right {
                    return Dispatch {
                        consumed: true,
                        exit: false,
                        cursor: Some(CursorMode::Normal),
                    };
                }
                Dispatch::default()
            }
            AppEvent::MouseMoved { x, y } => {
                self.cursor = Vec2::new(*x, *y);
                if self.control_active {
                    let delta = self.cursor - self.last_cursor;
                    self.last_cursor = self.cursor;
                    self.camera.rotate(delta);
                    return Dispatch::consumed();
                }
                if self.pan_active {
                    let delta = self.cursor - self.last_cursor;
                    self.last_cursor = self.cursor;
                    self.camera.pan(delta);
                    return Dispatch::consumed();
                }
                Dispatch::default()
            }
            AppEvent::MouseScrolled { dy, .. } => {
                if viewport_hovered {
                    log.info(format!("Mouse Scrolled: {dy:.6}"));
                    self.camera.zoom(*dy);
                    return Dispatch::consumed();
                }
                Dispatch::default()
            }
            AppEvent::KeyPressed { name, repeat, .. } => {
                if !*repeat {
                    log.info(format!("Key Pressed: {name}"));
                }
                Dispatch::default()
            }
            _ => Dispatch::default(),
        }
    }

    /// The camera only reacts to the wheel on its own.
    fn camera_fallback(&mut self, event: &AppEvent) {
        if let AppEvent::MouseScrolled { dy, .. } = event {
            self.camera.zoom(*dy);
        }
    }

    /// Per-frame update: fly movement while the viewport is hovered, aspect from
    /// the scene viewport.
    pub fn update(&mut self, dt: f32, viewport_hovered: bool, aspect: f32) {
        self.camera.set_aspect(aspect);
        if viewport_hovered {
            self.camera.fly(self.held, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> (Editor, LogRing) {
        (
            Editor::new(CameraSettings::default(), 16.0 / 9.0),
            LogRing::with_capacity(16),
        )
    }

    fn key(code: KeyCode, name: &str) -> AppEvent {
        AppEvent::KeyPressed {
            code: Some(code),
            name: name.to_owned(),
            repeat: false,
        }
    }

    #[test]
    fn close_exits() {
        let (mut ed, mut log) = editor();
        let d = ed.dispatch(&AppEvent::CloseRequested, false, &mut log);
        assert!(d.consumed && d.exit);
    }

    #[test]
    fn right_drag_over_viewport_rotates_camera() {
        let (mut ed, mut log) = editor();
        ed.dispatch(&AppEvent::MouseMoved { x: 100.0, y: 100.0 }, true, &mut log);
        let d = ed.dispatch(&AppEvent::MouseButtonPressed(MouseButton::Right), true, &mut log);
        assert_eq!(d.cursor, Some(CursorMode::Captured));
        assert!(ed.is_controlling_camera());

        let before = ed.camera().view();
        let d = ed.dispatch(&AppEvent::MouseMoved { x: 120.0, y: 90.0 }, true, &mut log);
        assert!(d.consumed);
        assert_ne!(ed.camera().view(), before);

        let d = ed.dispatch(&AppEvent::MouseButtonReleased(MouseButton::Right), false, &mut log);
        assert_eq!(d.cursor, Some(CursorMode::Normal));
        assert!(!ed.is_controlling_camera());
        let lines: Vec<_> = log.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(lines, ["Mouse Button Pressed: 1", "Mouse Button Released: 1"]);
    }

    #[test]
    fn right_press_outside_viewport_does_not_capture() {
        let (mut ed, mut log) = editor();
        let d = ed.dispatch(&AppEvent::MouseButtonPressed(MouseButton::Right), false, &mut log);
        assert!(!d.consumed);
        assert_eq!(d.cursor, None);
        let before = ed.camera().view();
        ed.dispatch(&AppEvent::MouseMoved { x: 50.0, y: 50.0 }, false, &mut log);
        assert_eq!(ed.camera().view(), before);
    }

    #[test]
    fn middle_drag_over_viewport_pans_target() {
        let (mut ed, mut log) = editor();
        ed.dispatch(&AppEvent::MouseMoved { x: 200.0, y: 200.0 }, true, &mut log);
        let d = ed.dispatch(&AppEvent::MouseButtonPressed(MouseButton::Middle), true, &mut log);
        assert!(d.consumed);
        assert_eq!(d.cursor, Some(CursorMode::Captured));
        assert!(!ed.is_controlling_camera());

        let target = ed.camera().target();
        let distance = ed.camera().distance();
        let d = ed.dispatch(&AppEvent::MouseMoved { x: 230.0, y: 180.0 }, true, &mut log);
        assert!(d.consumed);
        assert_ne!(ed.camera().target(), target);
        assert!((ed.camera().distance() - distance).abs() < 1e-4);

        let d = ed.dispatch(&AppEvent::MouseButtonReleased(MouseButton::Middle), false, &mut log);
        assert!(d.consumed);
        assert_eq!(d.cursor, Some(CursorMode::Normal));
        let moved = ed.camera().target();
        ed.dispatch(&AppEvent::MouseMoved { x: 10.0, y: 10.0 }, true, &mut log);
        assert_eq!(ed.camera().target(), moved);
    }

    #[test]
    fn middle_press_outside_viewport_does_not_pan() {
        let (mut ed, mut log) = editor();
        let d = ed.dispatch(&AppEvent::MouseButtonPressed(MouseButton::Middle), false, &mut log);
        assert!(!d.consumed);
        assert_eq!(d.cursor, None);
        let target = ed.camera().target();
        ed.dispatch(&AppEvent::MouseMoved { x: 50.0, y: 50.0 }, false, &mut log);
        assert_eq!(ed.camera().target(), target);

        // A stray release neither claims the event nor touches the cursor.
        let d = ed.dispatch(&AppEvent::MouseButtonReleased(MouseButton::Middle), false, &mut log);
        assert!(!d.consumed);
        assert_eq!(d.cursor, None);
    }

    #[test]
    fn scroll_outside_viewport_falls_through_to_camera() {
        let (mut ed, mut log) = editor();
        let start = ed.camera().distance();
        let d = ed.dispatch(&AppEvent::MouseScrolled { dx: 0.0, dy: 1.0 }, false, &mut log);
        assert!(!d.consumed);
        assert!(ed.camera().distance() < start);
        assert!(log.is_empty());

        let mid = ed.camera().distance();
        let d = ed.dispatch(&AppEvent::MouseScrolled { dx: 0.0, dy: 1.0 }, true, &mut log);
        assert!(d.consumed);
        assert!(ed.camera().distance() < mid);
        assert_eq!(log.iter().next().map(|l| l.text.as_str()), Some("Mouse Scrolled: 1.000000"));
    }

    #[test]
    fn key_presses_are_logged_but_never_consumed() {
        let (mut ed, mut log) = editor();
        let d = ed.dispatch(&key(KeyCode::KeyW, "w"), false, &mut log);
        assert!(!d.consumed);
        assert_eq!(ed.held_keys(), CameraMove::FORWARD);
        assert_eq!(log.iter().next().map(|l| l.text.as_str()), Some("Key Pressed: w"));

        ed.dispatch(&AppEvent::KeyReleased { code: Some(KeyCode::KeyW) }, false, &mut log);
        assert!(ed.held_keys().is_empty());
    }

    #[test]
    fn fly_only_while_hovered() {
        let (mut ed, mut log) = editor();
        ed.dispatch(&key(KeyCode::KeyW, "w"), false, &mut log);
        let target = ed.camera().target();
        ed.update(0.1, false, 1.0);
        assert_eq!(ed.camera().target(), target);
        ed.update(0.1, true, 1.0);
        assert_ne!(ed.camera().target(), target);
    }

    #[test]
    fn releases_bypass_the_ui() {
        assert!(bypasses_ui(&AppEvent::MouseButtonReleased(MouseButton::Right)));
        assert!(bypasses_ui(&AppEvent::KeyReleased { code: None }));
        assert!(!bypasses_ui(&AppEvent::MouseButtonPressed(MouseButton::Right)));
        assert!(!bypasses_ui(&AppEvent::MouseScrolled { dx: 0.0, dy: 1.0 }));
    }

    #[test]
    fn focus_loss_releases_held_keys() {
        let (mut ed, mut log) = editor();
        ed.dispatch(&key(KeyCode::KeyQ, "q"), false, &mut log);
        ed.dispatch(&AppEvent::Focused(false), false, &mut log);
        assert!(ed.held_keys().is_empty());
    }
}
