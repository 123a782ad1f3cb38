// SPDX-License-Identifier: CEPL-1.0
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key, KeyCode, PhysicalKey};

/// Pixel deltas from touchpads are folded into wheel "lines" at this rate.
const PIXELS_PER_LINE: f64 = 40.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

impl MouseButton {
    /// Stable numeric id used in console output (left 0, right 1, middle 2).
    pub fn code(self) -> u16 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
            MouseButton::Other(n) => n.saturating_add(3),
        }
    }
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(b: winit::event::MouseButton) -> Self {
        use winit::event::MouseButton as W;
        match b {
            W::Left => MouseButton::Left,
            W::Right => MouseButton::Right,
            W::Middle => MouseButton::Middle,
            W::Back => MouseButton::Other(0),
            W::Forward => MouseButton::Other(1),
            W::Other(n) => MouseButton::Other(n.saturating_add(2)),
        }
    }
}

/// Input and window notifications the editor reacts to, flattened out of winit's
/// event tree. Anything not listed here is ignored by the editor.
#[derive(Clone, Debug, PartialEq)]
pub enum AppEvent {
    CloseRequested,
    Resized { width: u32, height: u32 },
    Focused(bool),
    MouseButtonPressed(MouseButton),
    MouseButtonReleased(MouseButton),
    MouseMoved { x: f32, y: f32 },
    MouseScrolled { dx: f32, dy: f32 },
    KeyPressed { code: Option<KeyCode>, name: String, repeat: bool },
    KeyReleased { code: Option<KeyCode> },
}

impl AppEvent {
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        let ev = match event {
            WindowEvent::CloseRequested => AppEvent::CloseRequested,
            WindowEvent::Resized(size) => AppEvent::Resized {
                width: size.width,
                height: size.height,
            },
            WindowEvent::Focused(f) => AppEvent::Focused(*f),
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => AppEvent::MouseButtonPressed((*button).into()),
                ElementState::Released => AppEvent::MouseButtonReleased((*button).into()),
            },
            WindowEvent::CursorMoved { position, .. } => AppEvent::MouseMoved {
                x: position.x as f32,
                y: position.y as f32,
            },
            WindowEvent::MouseWheel { delta, .. } => {
                let (dx, dy) = scroll_lines(*delta);
                AppEvent::MouseScrolled { dx, dy }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let code = match event.physical_key {
                    PhysicalKey::Code(c) => Some(c),
                    PhysicalKey::Unidentified(_) => None,
                };
                match event.state {
                    ElementState::Pressed => AppEvent::KeyPressed {
                        code,
                        name: key_name(&event.logical_key),
                        repeat: event.repeat,
                    },
                    ElementState::Released => AppEvent::KeyReleased { code },
                }
            }
            _ => return None,
        };
        Some(ev)
    }
}

pub fn scroll_lines(delta: MouseScrollDelta) -> (f32, f32) {
    match delta {
        MouseScrollDelta::LineDelta(x, y) => (x, y),
        MouseScrollDelta::PixelDelta(p) => {
            ((p.x / PIXELS_PER_LINE) as f32, (p.y / PIXELS_PER_LINE) as f32)
        }
    }
}

/// Printable name of a logical key: the produced text, or the named key.
pub fn key_name(key: &Key) -> String {
    match key {
        Key::Character(s) => s.to_string(),
        Key::Named(named) => format!("{named:?}"),
        Key::Unidentified(native) => format!("code {native:?}"),
        Key::Dead(Some(c)) => c.to_string(),
        Key::Dead(None) => "dead".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;
    use winit::keyboard::NamedKey;

    #[test]
    fn line_deltas_pass_through() {
        assert_eq!(scroll_lines(MouseScrollDelta::LineDelta(0.0, -2.0)), (0.0, -2.0));
    }

    #[test]
    fn pixel_deltas_become_lines() {
        let (dx, dy) = scroll_lines(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 80.0)));
        assert_eq!(dx, 0.0);
        assert!((dy - 2.0).abs() < 1e-6);
    }

    #[test]
    fn button_codes_are_stable() {
        assert_eq!(MouseButton::from(winit::event::MouseButton::Left).code(), 0);
        assert_eq!(MouseButton::from(winit::event::MouseButton::Right).code(), 1);
        assert_eq!(MouseButton::from(winit::event::MouseButton::Middle).code(), 2);
        assert_eq!(MouseButton::from(winit::event::MouseButton::Back).code(), 3);
    }

    #[test]
    fn key_names() {
        assert_eq!(key_name(&Key::Character("w".into())), "w");
        assert_eq!(key_name(&Key::Named(NamedKey::Enter)), "Enter");
    }

    #[test]
    fn simple_window_events_convert() {
        assert_eq!(
            AppEvent::from_window_event(&WindowEvent::CloseRequested),
            Some(AppEvent::CloseRequested)
        );
        assert_eq!(
            AppEvent::from_window_event(&WindowEvent::Resized(winit::dpi::PhysicalSize::new(0, 0))),
            Some(AppEvent::Resized { width: 0, height: 0 })
        );
        assert_eq!(AppEvent::from_window_event(&WindowEvent::RedrawRequested), None);
    }
}
