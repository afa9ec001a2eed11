// Scene data - vertex and uniform layouts shared with the shaders
//
// Layouts must match Shader/Demo1.vert: one interleaved vertex binding and a
// std140 uniform block { vec4 color; mat4 projection; mat4 modelview; }.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

pub const TRIANGLE: [Vertex; 3] = [
    Vertex { pos: [0.5, 0.5, 0.0], color: [1.0, 0.0, 0.0] },
    Vertex { pos: [-0.5, -0.5, 0.0], color: [0.0, 1.0, 0.0] },
    Vertex { pos: [0.5, -0.5, 0.0], color: [0.0, 0.0, 1.0] },
];

/// Per-frame constants read by both shader stages
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ShaderUniform {
    pub color: Vec4,
    pub projection: Mat4,
    pub modelview: Mat4,
}

pub const FOV_Y_DEGREES: f32 = 70.0;
pub const NEAR: f32 = 0.01;
pub const FAR: f32 = 256.0;

impl ShaderUniform {
    /// Record written once at startup, before the logic thread runs
    pub fn initial(aspect: f32) -> Self {
        Self {
            color: Vec4::ONE,
            projection: projection(aspect),
            modelview: Mat4::IDENTITY,
        }
    }

    /// Time-dependent fields for a tick `elapsed` seconds after start.
    /// The projection is left as it is.
    pub fn animate(&mut self, elapsed: f64) {
        let (sin, cos) = elapsed.sin_cos();
        self.color = Vec4::new(sin as f32, cos as f32, 1.0, 1.0);
        self.modelview = orbit_view(elapsed);
    }
}

pub fn projection(aspect: f32) -> Mat4 {
    Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, NEAR, FAR)
}

/// Camera on the unit circle in the XZ plane, looking at the origin
pub fn orbit_view(elapsed: f64) -> Mat4 {
    let (sin, cos) = elapsed.sin_cos();
    let eye = Vec3::new(sin as f32, 0.0, cos as f32);
    Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f32 = 1e-5;

    #[test]
    fn layouts_match_shader_interface() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
        assert_eq!(std::mem::size_of::<ShaderUniform>(), 16 + 64 + 64);
        assert_eq!(std::mem::offset_of!(ShaderUniform, projection), 16);
        assert_eq!(std::mem::offset_of!(ShaderUniform, modelview), 80);
    }

    #[test]
    fn colour_at_zero_and_quarter_turn() {
        let mut uniform = ShaderUniform::initial(640.0 / 480.0);

        uniform.animate(0.0);
        assert!(uniform.color.abs_diff_eq(Vec4::new(0.0, 1.0, 1.0, 1.0), EPS));

        uniform.animate(FRAC_PI_2);
        assert!(uniform.color.abs_diff_eq(Vec4::new(1.0, 0.0, 1.0, 1.0), EPS));
    }

    #[test]
    fn modelview_is_a_proper_rotation_plus_translation() {
        for step in 0..16 {
            let elapsed = step as f64 * 0.37;
            let view = orbit_view(elapsed);
            let rotation = glam::Mat3::from_mat4(view);

            assert!((rotation.determinant() - 1.0).abs() < EPS);
            assert!((rotation * rotation.transpose()).abs_diff_eq(glam::Mat3::IDENTITY, EPS));

            // eye is one unit from the origin, so the origin sits at -Z one unit away
            let origin = view.transform_point3(Vec3::ZERO);
            assert!(origin.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), EPS));
        }
    }

    #[test]
    fn animate_leaves_projection_untouched() {
        let mut uniform = ShaderUniform::initial(640.0 / 480.0);
        let before = bytemuck::bytes_of(&uniform.projection).to_vec();
        for step in 0..10 {
            uniform.animate(step as f64 / 120.0);
        }
        assert_eq!(bytemuck::bytes_of(&uniform.projection), before.as_slice());
    }

    #[test]
    fn projection_uses_demo_frustum() {
        let p = projection(640.0 / 480.0);
        let focal = 1.0 / (FOV_Y_DEGREES.to_radians() * 0.5).tan();
        assert!((p.y_axis.y - focal).abs() < EPS);
        assert!((p.x_axis.x - focal / (640.0 / 480.0)).abs() < EPS);
    }
}
