//! Cube capture geometry
//!
//! Every cube pass renders each face through the same 90° projection and the
//! per-face views in [`CUBE_FACES`]. With no Y flip, texel `(u, v)` of a
//! rendered face lands exactly where Vulkan's cube sampling rule reads it back.

use crate::foundation::math::{constants::{PI, TAU}, utils::deg_to_rad, Mat4, Mat4Ext, Vec3, Vec4};

/// Vertices in [`capture_cube_vertices`]
pub const CAPTURE_CUBE_VERTEX_COUNT: u32 = 36;

/// Byte stride of one capture cube vertex (a bare `vec3` position)
pub const CAPTURE_CUBE_STRIDE: usize = std::mem::size_of::<[f32; 3]>();

/// Look direction and up vector of one cubemap face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeFace {
    /// Direction through the face center
    pub direction: [f32; 3],
    /// Camera up vector for the face
    pub up: [f32; 3],
}

/// Faces in array layer order: +X, -X, +Y, -Y, +Z, -Z
pub const CUBE_FACES: [CubeFace; 6] = [
    CubeFace { direction: [1.0, 0.0, 0.0], up: [0.0, -1.0, 0.0] },
    CubeFace { direction: [-1.0, 0.0, 0.0], up: [0.0, -1.0, 0.0] },
    CubeFace { direction: [0.0, 1.0, 0.0], up: [0.0, 0.0, 1.0] },
    CubeFace { direction: [0.0, -1.0, 0.0], up: [0.0, 0.0, -1.0] },
    CubeFace { direction: [0.0, 0.0, 1.0], up: [0.0, -1.0, 0.0] },
    CubeFace { direction: [0.0, 0.0, -1.0], up: [0.0, -1.0, 0.0] },
];

impl CubeFace {
    /// View matrix looking from the origin through the face
    pub fn view(&self) -> Mat4 {
        Mat4::look_at(Vec3::zeros(), Vec3::from(self.direction), Vec3::from(self.up))
    }

    /// Capture projection times the face view
    pub fn view_projection(&self) -> Mat4 {
        capture_projection() * self.view()
    }
}

/// 90° square projection shared by every cube pass
pub fn capture_projection() -> Mat4 {
    Mat4::perspective(deg_to_rad(90.0), 1.0, 0.1, 10.0)
}

/// Unit cube as 12 triangles of bare positions, two per face
pub fn capture_cube_vertices() -> Vec<[f32; 3]> {
    let mut vertices = Vec::with_capacity(CAPTURE_CUBE_VERTEX_COUNT as usize);

    for face in &CUBE_FACES {
        let normal = Vec3::from(face.direction);
        let up = Vec3::from(face.up);
        let right = normal.cross(&up);
        let corner = |x: f32, y: f32| {
            let p = normal + right * x + up * y;
            [p.x, p.y, p.z]
        };

        vertices.extend_from_slice(&[
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
            corner(-1.0, -1.0),
        ]);
    }

    vertices
}

/// World direction rendered at texel `(u, v)` of a face, both in `[0, 1]`
pub fn texel_direction(face: &CubeFace, u: f32, v: f32) -> Option<Vec3> {
    let inverse = face.view_projection().try_inverse()?;
    let point = inverse * Vec4::new(2.0 * u - 1.0, 2.0 * v - 1.0, 1.0, 1.0);
    Some((point.xyz() / point.w).normalize())
}

/// Face index and `(s, t)` a cubemap lookup of `direction` reads from
///
/// Follows the major-axis table of the Vulkan cube sampling rules.
pub fn cube_sample(direction: &Vec3) -> (usize, f32, f32) {
    let (ax, ay, az) = (direction.x.abs(), direction.y.abs(), direction.z.abs());

    let (face, sc, tc, ma) = if ax >= ay && ax >= az {
        if direction.x > 0.0 {
            (0, -direction.z, -direction.y, ax)
        } else {
            (1, direction.z, -direction.y, ax)
        }
    } else if ay >= az {
        if direction.y > 0.0 {
            (2, direction.x, direction.z, ay)
        } else {
            (3, direction.x, -direction.z, ay)
        }
    } else if direction.z > 0.0 {
        (4, direction.x, -direction.y, az)
    } else {
        (5, -direction.x, -direction.y, az)
    };

    (face, 0.5 * (sc / ma + 1.0), 0.5 * (tc / ma + 1.0))
}

/// Equirectangular texture coordinate of a unit direction
///
/// Matches the lookup in `equi_to_cube.frag`. Row 0 of the image is straight up.
pub fn equirect_uv(direction: &Vec3) -> (f32, f32) {
    let u = direction.z.atan2(direction.x) / TAU + 0.5;
    let v = 0.5 - direction.y.clamp(-1.0, 1.0).asin() / PI;
    (u, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLES: [f32; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

    #[test]
    fn test_face_centers_project_to_screen_center() {
        for face in &CUBE_FACES {
            let clip = face.view_projection() * Vec4::new(face.direction[0], face.direction[1], face.direction[2], 1.0);
            assert_relative_eq!(clip.x / clip.w, 0.0, epsilon = 1e-6);
            assert_relative_eq!(clip.y / clip.w, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rendered_texels_are_read_back_from_same_face() {
        for (index, face) in CUBE_FACES.iter().enumerate() {
            for &u in &SAMPLES {
                for &v in &SAMPLES {
                    let direction = texel_direction(face, u, v).unwrap();
                    let (sampled_face, s, t) = cube_sample(&direction);
                    assert_eq!(sampled_face, index, "face {index} texel ({u}, {v})");
                    assert_relative_eq!(s, u, epsilon = 1e-4);
                    assert_relative_eq!(t, v, epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_faces_stay_in_their_hemisphere() {
        for face in &CUBE_FACES {
            let axis = Vec3::from(face.direction);
            for &u in &SAMPLES {
                for &v in &SAMPLES {
                    let direction = texel_direction(face, u, v).unwrap();
                    assert!(direction.dot(&axis) > 0.5);
                }
            }
        }
    }

    #[test]
    fn test_equirect_lookup_of_axes() {
        let (u, v) = equirect_uv(&Vec3::x());
        assert_relative_eq!(u, 0.5);
        assert_relative_eq!(v, 0.5);

        let (u, _) = equirect_uv(&Vec3::z());
        assert_relative_eq!(u, 0.75);

        let (_, v) = equirect_uv(&Vec3::y());
        assert_relative_eq!(v, 0.0);

        let (_, v) = equirect_uv(&-Vec3::y());
        assert_relative_eq!(v, 1.0);
    }

    #[test]
    fn test_positive_x_face_never_reads_negative_x_half() {
        let face = &CUBE_FACES[0];
        for &u in &SAMPLES {
            for &v in &SAMPLES {
                let (equirect_u, _) = equirect_uv(&texel_direction(face, u, v).unwrap());
                assert!((0.25..0.75).contains(&equirect_u));
            }
        }
    }

    #[test]
    fn test_capture_cube_covers_unit_cube() {
        let vertices = capture_cube_vertices();
        assert_eq!(vertices.len(), CAPTURE_CUBE_VERTEX_COUNT as usize);
        assert_eq!(CAPTURE_CUBE_STRIDE, 12);
        for vertex in &vertices {
            for coordinate in vertex {
                assert_relative_eq!(coordinate.abs(), 1.0);
            }
        }
    }
}
