//! Free-flying demo camera

use bytemuck::{Pod, Zeroable};
use pbr_engine::foundation::math::{utils::deg_to_rad, Mat4, Mat4Ext, Vec3, Vec4};
use pbr_engine::render::{Key, Window};

/// Camera uniform block shared by the PBR and skybox shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraData {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
}

/// Fragment push constants of the PBR pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadingConstants {
    pub camera_position: [f32; 4],
    pub max_reflection_lod: f32,
}

/// Movement requested for one frame, in units of the configured speeds
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CameraInput {
    /// Positive moves towards -Z
    pub forward: f32,
    /// Positive moves towards +X
    pub right: f32,
    /// Positive turns left
    pub turn: f32,
}

impl CameraInput {
    /// Read WASD and the left/right arrow keys
    pub fn from_window(window: &Window) -> Self {
        let axis = |positive: Key, negative: Key| {
            f32::from(u8::from(window.key_down(positive))) - f32::from(u8::from(window.key_down(negative)))
        };

        Self {
            forward: axis(Key::W, Key::S),
            right: axis(Key::D, Key::A),
            turn: axis(Key::Left, Key::Right),
        }
    }
}

/// Position plus rotation about the Y axis
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 200.0,
        }
    }

    /// Move along the world axes and turn
    pub fn apply(&mut self, input: CameraInput, move_speed: f32, turn_speed: f32) {
        self.position.z -= input.forward * move_speed;
        self.position.x += input.right * move_speed;
        self.yaw += input.turn * turn_speed;
    }

    /// World-to-view matrix
    pub fn view(&self) -> Mat4 {
        Mat4::rotation_y(-self.yaw) * Mat4::translation(-self.position)
    }

    /// Vulkan projection with screen-space up matching world up
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective(deg_to_rad(self.fov_y_degrees), aspect, self.near, self.far).flip_y()
    }

    pub fn camera_data(&self, aspect: f32) -> CameraData {
        let view = self.view();
        let projection = self.projection(aspect);

        CameraData {
            view: view.into(),
            projection: projection.into(),
            view_projection: (projection * view).into(),
        }
    }

    /// Eye position in homogeneous coordinates
    pub fn eye(&self) -> Vec4 {
        self.position.push(1.0)
    }

    /// Push constants for the PBR fragment shader
    pub fn shading_constants(&self, max_reflection_lod: f32) -> ShadingConstants {
        ShadingConstants {
            camera_position: self.eye().into(),
            max_reflection_lod,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_camera_block_size() {
        assert_eq!(std::mem::size_of::<CameraData>(), 192);
        assert_eq!(std::mem::size_of::<ShadingConstants>(), 20);
    }

    #[test]
    fn test_shading_constants_carry_eye_and_lod() {
        let camera = Camera::new(Vec3::new(1.0, 2.0, 3.0));
        let constants = camera.shading_constants(4.0);
        assert_eq!(constants.camera_position, [1.0, 2.0, 3.0, 1.0]);
        assert_relative_eq!(constants.max_reflection_lod, 4.0);
    }

    #[test]
    fn test_view_moves_eye_to_origin() {
        let mut camera = Camera::new(Vec3::new(1.0, 2.0, 5.0));
        camera.yaw = 0.7;

        let eye = camera.view() * camera.eye();
        assert_relative_eq!(eye.xyz().norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_input_moves_along_world_axes() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0));
        let input = CameraInput { forward: 1.0, right: -1.0, turn: 1.0 };

        camera.apply(input, 0.1, 0.01);

        assert_relative_eq!(camera.position.z, 4.9, epsilon = 1e-6);
        assert_relative_eq!(camera.position.x, -0.1, epsilon = 1e-6);
        assert_relative_eq!(camera.yaw, 0.01);
    }

    #[test]
    fn test_point_ahead_is_in_front_of_camera() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0));
        let clip = camera.projection(16.0 / 9.0) * camera.view() * Vec4::new(0.0, 1.0, 0.0, 1.0);

        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
        // World up lands in the upper half of a Vulkan framebuffer.
        assert!(clip.y / clip.w < 0.0);
    }
}
