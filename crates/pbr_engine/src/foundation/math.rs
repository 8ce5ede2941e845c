//! Math utilities and types
//!
//! Provides the nalgebra aliases used by the renderer plus the projection and
//! view helpers for Vulkan's clip space (depth in `[0, 1]`, Y pointing down).

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Mathematical constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Tau constant (2 * Pi)
    pub const TAU: f32 = 2.0 * PI;

    /// Half Pi
    pub const HALF_PI: f32 = PI * 0.5;
}

/// Math utility functions
pub mod utils {
    use super::constants::PI;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * PI / 180.0
    }

    /// Number of mip levels for a full chain down to 1x1
    ///
    /// `floor(log2(max(width, height))) + 1`, and 1 for degenerate sizes.
    pub fn mip_level_count(width: u32, height: u32) -> u32 {
        let largest = width.max(height);
        if largest == 0 {
            1
        } else {
            u32::BITS - largest.leading_zeros()
        }
    }
}

/// Extension trait for Mat4 with additional convenience methods
pub trait Mat4Ext {
    /// Create a rotation matrix around the Y axis
    fn rotation_y(angle: f32) -> Mat4;

    /// Create a translation matrix
    fn translation(offset: Vec3) -> Mat4;

    /// Right-handed perspective projection with depth mapped to `[0, 1]`
    ///
    /// The camera looks down `-Z`. No axis is flipped, so NDC `+Y` follows
    /// view-space `+Y`; see [`Mat4Ext::flip_y`] for on-screen cameras.
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Negate the Y scale of a projection so view-space up is screen up in Vulkan
    fn flip_y(self) -> Mat4;

    /// Create a right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn rotation_y(angle: f32) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::y_axis(), angle)
    }

    fn translation(offset: Vec3) -> Mat4 {
        Mat4::new_translation(&offset)
    }

    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        // P = [1/(a t)  0    0          0        ]
        //     [0        1/t  0          0        ]
        //     [0        0    f/(n-f)    nf/(n-f) ]
        //     [0        0    -1         0        ]
        let tan_half_fovy = (fov_y * 0.5).tan();

        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (near - far);
        result[(2, 3)] = (near * far) / (near - far);
        result[(3, 2)] = -1.0;
        result
    }

    fn flip_y(mut self) -> Mat4 {
        self[(1, 1)] = -self[(1, 1)];
        self
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new(
            1.0, 0.0, 0.0, -eye.x,
            0.0, 1.0, 0.0, -eye.y,
            0.0, 0.0, 1.0, -eye.z,
            0.0, 0.0, 0.0, 1.0,
        );

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(utils::mip_level_count(1, 1), 1);
        assert_eq!(utils::mip_level_count(2, 2), 2);
        assert_eq!(utils::mip_level_count(512, 512), 10);
        assert_eq!(utils::mip_level_count(1024, 300), 11);
        assert_eq!(utils::mip_level_count(300, 5), 9);
        assert_eq!(utils::mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_perspective_maps_near_and_far_to_unit_depth() {
        let proj = Mat4::perspective(utils::deg_to_rad(90.0), 1.0, 0.1, 10.0);

        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -10.0, 1.0);

        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_perspective_keeps_y_up() {
        let proj = Mat4::perspective(utils::deg_to_rad(90.0), 1.0, 0.1, 10.0);
        let clip = proj * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert_relative_eq!(clip.y / clip.w, 1.0, epsilon = 1e-6);

        let flipped = proj.flip_y() * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert_relative_eq!(flipped.y / flipped.w, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_look_at_moves_target_onto_negative_z() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let view = Mat4::look_at(eye, Vec3::new(1.0, 2.0, -2.0), Vec3::y());
        let target = view * Vec4::new(1.0, 2.0, -2.0, 1.0);

        assert_relative_eq!(target.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(target.z, -5.0, epsilon = 1e-5);
    }
}
