//! Orbit camera: spherical coordinates around the scene origin, driven by
//! mouse drag, with hard clamps so the view can neither flip over the poles
//! nor fly through the scene.

use glam::{Mat4, Vec3};

use crate::params::RenderConfig;

/// Polar angle is kept strictly inside (0, pi) so the view never degenerates
/// at the poles.
const PHI_MIN: f32 = 0.1;
const PHI_MAX: f32 = std::f32::consts::PI - 0.1;
const RADIUS_MIN: f32 = 5.0;
const RADIUS_MAX: f32 = 150.0;

/// Degrees of orbit per pixel of left-button drag
const ROTATE_DEGREES_PER_PIXEL: f32 = 0.25;
/// World units of zoom per pixel of right-button drag
const ZOOM_UNITS_PER_PIXEL: f32 = 0.2;

pub struct OrbitCamera {
    /// Azimuth around the Y axis (radians)
    theta: f32,
    /// Polar angle from the Y axis (radians), clamped to (0.1, pi - 0.1)
    phi: f32,
    /// Distance from the origin (meters), clamped to [5, 150]
    radius: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            theta: 1.5 * std::f32::consts::PI,
            phi: std::f32::consts::FRAC_PI_2 - 0.1,
            radius: 50.0,
        }
    }
}

impl OrbitCamera {
    /// Orbit by a mouse drag delta in pixels.
    pub fn rotate(&mut self, dx_px: f32, dy_px: f32) {
        self.theta += (ROTATE_DEGREES_PER_PIXEL * dx_px).to_radians();
        self.phi += (ROTATE_DEGREES_PER_PIXEL * dy_px).to_radians();
        self.phi = self.phi.clamp(PHI_MIN, PHI_MAX);
    }

    /// Zoom by a mouse drag delta in pixels.
    pub fn zoom(&mut self, dx_px: f32, dy_px: f32) {
        self.radius += ZOOM_UNITS_PER_PIXEL * (dx_px - dy_px);
        self.radius = self.radius.clamp(RADIUS_MIN, RADIUS_MAX);
    }

    /// Spherical-to-Cartesian eye position.
    pub fn eye_position(&self) -> Vec3 {
        Vec3::new(
            self.radius * self.phi.sin() * self.theta.cos(),
            self.radius * self.phi.cos(),
            self.radius * self.phi.sin() * self.theta.sin(),
        )
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye_position(), Vec3::ZERO, Vec3::Y)
    }

    pub fn projection_matrix(&self, render_config: &RenderConfig) -> Mat4 {
        Mat4::perspective_rh(
            render_config.fov_degrees.to_radians(),
            render_config.aspect_ratio(),
            render_config.near_plane_m,
            render_config.far_plane_m,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polar_angle_clamps_at_both_poles() {
        let mut camera = OrbitCamera::default();

        camera.rotate(0.0, 1e6);
        assert_eq!(camera.phi, PHI_MAX);

        camera.rotate(0.0, -1e6);
        assert_eq!(camera.phi, PHI_MIN);
    }

    #[test]
    fn radius_clamps_to_limits() {
        let mut camera = OrbitCamera::default();

        camera.zoom(1e6, 0.0);
        assert_eq!(camera.radius, RADIUS_MAX);

        camera.zoom(0.0, 1e6);
        assert_eq!(camera.radius, RADIUS_MIN);
    }

    #[test]
    fn eye_stays_on_sphere_of_current_radius() {
        let mut camera = OrbitCamera::default();
        camera.rotate(123.0, -48.0);
        camera.zoom(10.0, 3.0);

        let eye = camera.eye_position();
        assert!((eye.length() - camera.radius).abs() < 1e-3);
    }

    #[test]
    fn view_matrix_is_finite_and_invertible() {
        let camera = OrbitCamera::default();
        let view = camera.view_matrix();
        assert!(view.determinant().abs() > 1e-6);
    }
}
