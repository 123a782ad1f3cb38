// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};

/// Editable object placement. Rotation is Euler degrees applied X, then Y, then Z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation_deg: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation_deg: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    /// `T * Rx * Ry * Rz * S`
    pub fn model(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_rotation_x(self.rotation_deg.x.to_radians())
            * Mat4::from_rotation_y(self.rotation_deg.y.to_radians())
            * Mat4::from_rotation_z(self.rotation_deg.z.to_radians())
            * Mat4::from_scale(self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_identity_matrix() {
        assert_eq!(Transform::IDENTITY.model(), Mat4::IDENTITY);
    }

    #[test]
    fn scale_applies_before_translation() {
        let t = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::splat(2.0),
            ..Transform::IDENTITY
        };
        let p = t.model().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(3.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn z_rotation_turns_x_into_y() {
        let t = Transform {
            rotation_deg: Vec3::new(0.0, 0.0, 90.0),
            ..Transform::IDENTITY
        };
        let p = t.model().transform_point3(Vec3::X);
        assert!((p - Vec3::Y).length() < 1e-5);
    }
}
