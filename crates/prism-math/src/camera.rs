// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3};

const WORLD_UP: Vec3 = Vec3::Z;
const PITCH_LIMIT_DEG: f32 = 89.0;
const MIN_DISTANCE: f32 = 1.0;

bitflags! {
    /// Held fly-movement keys.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CameraMove: u8 {
        const FORWARD  = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT     = 1 << 2;
        const RIGHT    = 1 << 3;
        const UP       = 1 << 4;
        const DOWN     = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSettings {
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
    pub distance: f32,
    pub yaw_deg: f32,
    pub pitch_deg: f32,
    pub move_speed: f32,
    pub pan_speed: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_deg: 45.0,
            near: 0.1,
            far: 100.0,
            distance: 5.0,
            yaw_deg: -90.0,
            pitch_deg: 45.0,
            move_speed: 5.0,
            pan_speed: 0.005,
            rotate_speed: 0.4,
            zoom_speed: 0.5,
        }
    }
}

/// Z-up camera orbiting `target` at `distance`. Matrices are recomputed on every
/// mutation so `view()` / `projection()` are always current.
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    settings: CameraSettings,
    aspect: f32,
    target: Vec3,
    position: Vec3,
    distance: f32,
    yaw_deg: f32,
    pitch_deg: f32,
    view: Mat4,
    proj: Mat4,
}

impl OrbitCamera {
    pub fn new(settings: CameraSettings, aspect: f32) -> Self {
        let mut cam = Self {
            settings,
            aspect: sane_aspect(aspect),
            target: Vec3::ZERO,
            position: Vec3::ZERO,
            distance: settings.distance.max(MIN_DISTANCE),
            yaw_deg: settings.yaw_deg,
            pitch_deg: settings.pitch_deg.clamp(-PITCH_LIMIT_DEG, PITCH_LIMIT_DEG),
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        };
        cam.recalculate();
        cam
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    /// Vulkan clip space: Y is flipped relative to the GL convention.
    pub fn projection(&self) -> Mat4 {
        self.proj
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn pitch_deg(&self) -> f32 {
        self.pitch_deg
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        let aspect = sane_aspect(aspect);
        if aspect != self.aspect {
            self.aspect = aspect;
            self.recalculate();
        }
    }

    /// Fly movement: position and target move together along the camera axes.
    pub fn fly(&mut self, keys: CameraMove, dt: f32) {
        if keys.is_empty() {
            return;
        }
        let velocity = self.settings.move_speed * dt;
        let (front, right, up) = self.axes();
        let mut step = Vec3::ZERO;
        if keys.contains(CameraMove::FORWARD) {
            step += front;
        }
        if keys.contains(CameraMove::BACKWARD) {
            step -= front;
        }
        if keys.contains(CameraMove::RIGHT) {
            step += right;
        }
        if keys.contains(CameraMove::LEFT) {
            step -= right;
        }
        if keys.contains(CameraMove::UP) {
            step += up;
        }
        if keys.contains(CameraMove::DOWN) {
            step -= up;
        }
        self.target += step * velocity;
        self.recalculate();
    }

    pub fn pan(&mut self, delta: Vec2) {
        let (_, right, up) = self.axes();
        let scale = self.settings.pan_speed * self.distance;
        self.target += -right * delta.x * scale + up * delta.y * scale;
        self.recalculate();
    }

    pub fn rotate(&mut self, delta: Vec2) {
        self.yaw_deg -= delta.x * self.settings.rotate_speed;
        self.pitch_deg = (self.pitch_deg + delta.y * self.settings.rotate_speed)
            .clamp(-PITCH_LIMIT_DEG, PITCH_LIMIT_DEG);
        self.recalculate();
    }

    pub fn zoom(&mut self, delta: f32) {
        self.distance = (self.distance - delta * self.settings.zoom_speed).max(MIN_DISTANCE);
        self.recalculate();
    }

    fn axes(&self) -> (Vec3, Vec3, Vec3) {
        let front = (self.target - self.position).normalize_or_zero();
        let right = front.cross(WORLD_UP).normalize_or_zero();
        let up = right.cross(front).normalize_or_zero();
        (front, right, up)
    }

    fn recalculate(&mut self) {
        let yaw = self.yaw_deg.to_radians();
        let pitch = self.pitch_deg.to_radians();
        let offset = Vec3::new(
            yaw.cos() * pitch.cos(),
            yaw.sin() * pitch.cos(),
            pitch.sin(),
        ) * self.distance;
        self.position = self.target - offset;
        self.view = Mat4::look_at_rh(self.position, self.target, WORLD_UP);

        let mut proj = Mat4::perspective_rh(
            self.settings.fov_deg.to_radians(),
            self.aspect,
            self.settings.near,
            self.settings.far,
        );
        proj.y_axis.y *= -1.0;
        self.proj = proj;
    }
}

fn sane_aspect(aspect: f32) -> f32 {
    if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    }
}
