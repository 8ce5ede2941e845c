//! Procedural meshes
//!
//! Both meshes are emitted as flat triangle lists ready for
//! `create_vertex_buffer`.

use bytemuck::{Pod, Zeroable};
use pbr_engine::foundation::math::{constants::{PI, TAU}, Vec3};

/// Skybox vertex: position, normal, uv
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Lit mesh vertex: position, normal, tangent, uv
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub uv: [f32; 2],
}

/// Cube spanning `[-1, 1]` on every axis, 36 vertices
pub fn cube() -> Vec<Vertex> {
    const FACES: [([f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(36);
    for (normal, up) in FACES {
        let n = Vec3::from(normal);
        let up = Vec3::from(up);
        let right = up.cross(&n);

        let corner = |x: f32, y: f32| {
            let p = n + right * x + up * y;
            Vertex {
                position: [p.x, p.y, p.z],
                normal,
                uv: [(x + 1.0) * 0.5, (1.0 - y) * 0.5],
            }
        };

        let (a, b, c, d) = (corner(-1.0, -1.0), corner(1.0, -1.0), corner(1.0, 1.0), corner(-1.0, 1.0));
        vertices.extend_from_slice(&[a, b, c, c, d, a]);
    }
    vertices
}

/// UV sphere with per-vertex tangents along increasing `u`
///
/// Degenerate triangles at the poles are skipped.
pub fn uv_sphere(radius: f32, sectors: u32, stacks: u32) -> Vec<MeshVertex> {
    let vertex = |stack: u32, sector: u32| {
        let phi = PI * stack as f32 / stacks as f32;
        let theta = TAU * sector as f32 / sectors as f32;

        let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
        let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());
        let position = normal * radius;

        MeshVertex {
            position: [position.x, position.y, position.z],
            normal: [normal.x, normal.y, normal.z],
            tangent: [tangent.x, tangent.y, tangent.z],
            uv: [sector as f32 / sectors as f32, stack as f32 / stacks as f32],
        }
    };

    let mut vertices = Vec::with_capacity((sectors * (2 * stacks - 2) * 3) as usize);
    for stack in 0..stacks {
        for sector in 0..sectors {
            let a = vertex(stack, sector);
            let b = vertex(stack + 1, sector);
            let c = vertex(stack + 1, sector + 1);
            let d = vertex(stack, sector + 1);

            if stack != 0 {
                vertices.extend_from_slice(&[a, c, d]);
            }
            if stack != stacks - 1 {
                vertices.extend_from_slice(&[a, b, c]);
            }
        }
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vertex_strides() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<MeshVertex>(), 44);
    }

    #[test]
    fn test_cube_faces_lie_on_their_normal() {
        let vertices = cube();
        assert_eq!(vertices.len(), 36);

        for vertex in &vertices {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            assert_relative_eq!(position.dot(&normal), 1.0);
            assert!(vertex.uv.iter().all(|c| (0.0..=1.0).contains(c)));
        }
    }

    #[test]
    fn test_sphere_vertices() {
        let (sectors, stacks) = (16, 8);
        let vertices = uv_sphere(2.0, sectors, stacks);
        assert_eq!(vertices.len() as u32, sectors * (2 * stacks - 2) * 3);

        for vertex in &vertices {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            let tangent = Vec3::from(vertex.tangent);

            assert_relative_eq!(position.norm(), 2.0, epsilon = 1e-5);
            assert_relative_eq!(normal.norm(), 1.0, epsilon = 1e-5);
            assert_relative_eq!(tangent.dot(&normal), 0.0, epsilon = 1e-5);
        }
    }
}
