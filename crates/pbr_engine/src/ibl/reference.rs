//! CPU versions of the lighting integrals
//!
//! Same math as `brdf.frag` and `convolution.frag`, used to check GPU output
//! and to pin down the expected values of the lookup tables.

use crate::foundation::math::{constants::{HALF_PI, PI, TAU}, Vec3};

/// Van der Corput radical inverse in base 2
pub fn radical_inverse(mut bits: u32) -> f32 {
    bits = bits.rotate_right(16);
    bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xAAAA_AAAA) >> 1);
    bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xCCCC_CCCC) >> 2);
    bits = ((bits & 0x0F0F_0F0F) << 4) | ((bits & 0xF0F0_F0F0) >> 4);
    bits = ((bits & 0x00FF_00FF) << 8) | ((bits & 0xFF00_FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

/// Point `i` of an `n`-point Hammersley set
pub fn hammersley(i: u32, n: u32) -> (f32, f32) {
    (i as f32 / n as f32, radical_inverse(i))
}

/// GGX importance-sampled half vector around `normal`
pub fn importance_sample_ggx(xi: (f32, f32), normal: &Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;

    let phi = TAU * xi.0;
    let cos_theta = ((1.0 - xi.1) / (1.0 + (a * a - 1.0) * xi.1)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if normal.z.abs() < 0.999 { Vec3::z() } else { Vec3::x() };
    let tangent = up.cross(normal).normalize();
    let bitangent = normal.cross(&tangent);

    (tangent * h.x + bitangent * h.y + normal * h.z).normalize()
}

/// Schlick-GGX geometry term with the IBL remapping `k = r^2 / 2`
pub fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

/// Smith geometry term for view and light
pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

/// Split-sum scale and bias for one BRDF LUT texel
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, sample_count: u32) -> (f32, f32) {
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).max(0.0).sqrt(), 0.0, n_dot_v);
    let n = Vec3::z();

    let mut scale = 0.0;
    let mut bias = 0.0;

    for i in 0..sample_count {
        let h = importance_sample_ggx(hammersley(i, sample_count), &n, roughness);
        let l = (h * 2.0 * v.dot(&h) - v).normalize();

        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(&h).max(0.0);

        if n_dot_l > 0.0 {
            let g = geometry_smith(n_dot_v, n_dot_l, roughness);
            let g_vis = g * v_dot_h / (n_dot_h * n_dot_v);
            let fc = (1.0 - v_dot_h).powi(5);

            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }

    (scale / sample_count as f32, bias / sample_count as f32)
}

/// Diffuse irradiance around `normal` by a Riemann sum over the hemisphere
///
/// `environment` returns radiance for a unit direction.
pub fn irradiance<F>(environment: F, normal: &Vec3, sample_delta: f32) -> Vec3
where
    F: Fn(&Vec3) -> Vec3,
{
    let up = if normal.y.abs() < 0.999 { Vec3::y() } else { Vec3::z() };
    let right = up.cross(normal).normalize();
    let up = normal.cross(&right);

    let mut sum = Vec3::zeros();
    let mut count = 0u32;

    let mut phi = 0.0;
    while phi < TAU {
        let mut theta = 0.0;
        while theta < HALF_PI {
            let tangent_sample = Vec3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos());
            let direction = right * tangent_sample.x + up * tangent_sample.y + normal * tangent_sample.z;

            sum += environment(&direction) * theta.cos() * theta.sin();
            count += 1;
            theta += sample_delta;
        }
        phi += sample_delta;
    }

    sum * PI / count as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_radical_inverse() {
        assert_relative_eq!(radical_inverse(0), 0.0);
        assert_relative_eq!(radical_inverse(1), 0.5);
        assert_relative_eq!(radical_inverse(2), 0.25);
        assert_relative_eq!(radical_inverse(3), 0.75);
    }

    #[test]
    fn test_smooth_head_on_brdf() {
        let (scale, bias) = integrate_brdf(1.0, 0.0, 1024);
        assert_relative_eq!(scale, 1.0, epsilon = 1e-4);
        assert_relative_eq!(bias, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_brdf_lut_stays_in_unit_range() {
        for &n_dot_v in &[0.1, 0.5, 0.9] {
            for &roughness in &[0.1, 0.5, 1.0] {
                let (scale, bias) = integrate_brdf(n_dot_v, roughness, 256);
                assert!(scale >= 0.0 && bias >= 0.0);
                assert!(scale + bias <= 1.05, "NdotV {n_dot_v} roughness {roughness}");
            }
        }
    }

    #[test]
    fn test_uniform_environment_irradiance() {
        let color = Vec3::new(0.8, 0.4, 0.2);
        for normal in [Vec3::x(), Vec3::y(), -Vec3::z()] {
            let result = irradiance(|_| color, &normal, 0.025);
            assert_relative_eq!(result.x, color.x, epsilon = 0.02);
            assert_relative_eq!(result.y, color.y, epsilon = 0.02);
            assert_relative_eq!(result.z, color.z, epsilon = 0.02);
        }
    }

    #[test]
    fn test_geometry_without_roughness_is_one() {
        assert_relative_eq!(geometry_smith(0.3, 0.7, 0.0), 1.0);
    }
}
