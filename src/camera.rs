use crate::scene_graph::LayerMask;
use glam::{Mat4, Vec2, Vec3};

const DEFAULT_UP: Vec3 = Vec3::Y;
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height > 0 {
            self.width as f32 / self.height as f32
        } else {
            1.0
        }
    }
}

/// Perspective camera looking from `position` at `target`.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
    pub layers: LayerMask,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far, layers: LayerMask::editor_view() }
    }

    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y_radians, aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self, viewport: Viewport) -> Mat4 {
        self.projection_matrix(viewport.aspect()) * self.view_matrix()
    }

    /// Screen position of `point` in pixels plus its view depth. `None` behind the camera.
    pub fn project_point(&self, point: Vec3, viewport: Viewport) -> Option<(Vec2, f32)> {
        if viewport.width == 0 || viewport.height == 0 {
            return None;
        }
        let clip = self.view_projection(viewport) * point.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let x = (ndc.x + 1.0) * 0.5 * viewport.width as f32;
        let y = (1.0 - ndc.y) * 0.5 * viewport.height as f32;
        Some((Vec2::new(x, y), clip.w))
    }
}

/// Damped orbit around the camera target with a bounded distance range.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub min_distance: f32,
    pub max_distance: f32,
    pub damping_factor: f32,
    pub enabled: bool,
    velocity: Vec2,
}

impl OrbitControls {
    pub fn new(min_distance: f32, max_distance: f32, damping_factor: f32) -> Self {
        let min_distance = min_distance.max(0.01);
        Self {
            min_distance,
            max_distance: max_distance.max(min_distance),
            damping_factor: damping_factor.clamp(0.0, 1.0),
            enabled: true,
            velocity: Vec2::ZERO,
        }
    }

    /// Queues a yaw/pitch impulse in radians; consumed gradually by [`OrbitControls::update`].
    pub fn orbit(&mut self, delta: Vec2) {
        if self.enabled {
            self.velocity += delta;
        }
    }

    pub fn is_settled(&self) -> bool {
        self.velocity.length_squared() <= 1e-10
    }

    /// Per-frame damped orbit step. Returns true when the camera moved.
    pub fn update(&mut self, camera: &mut Camera3D) -> bool {
        if !self.enabled {
            return false;
        }
        let before = camera.position;
        if !self.is_settled() {
            let step = if self.damping_factor > 0.0 { self.velocity * self.damping_factor } else { self.velocity };
            let offset = camera.position - camera.target;
            let radius = offset.length().max(1e-4);
            let mut yaw = offset.x.atan2(offset.z);
            let mut pitch = (offset.y / radius).clamp(-1.0, 1.0).asin();
            yaw += step.x;
            pitch = (pitch + step.y).clamp(-PITCH_LIMIT, PITCH_LIMIT);
            let dir = Vec3::new(pitch.cos() * yaw.sin(), pitch.sin(), pitch.cos() * yaw.cos());
            camera.position = camera.target + dir * radius;
            self.velocity = if self.damping_factor > 0.0 { self.velocity - step } else { Vec2::ZERO };
            if self.is_settled() {
                self.velocity = Vec2::ZERO;
            }
        }
        self.constrain(camera);
        camera.position != before
    }

    pub fn zoom_in(&mut self, camera: &mut Camera3D, by: f32) {
        self.step_distance(camera, -by);
    }

    pub fn zoom_out(&mut self, camera: &mut Camera3D, by: f32) {
        self.step_distance(camera, by);
    }

    /// Pins the allowed range to the desired distance for one constrain pass, then restores it.
    fn step_distance(&mut self, camera: &mut Camera3D, delta: f32) {
        let (saved_min, saved_max) = (self.min_distance, self.max_distance);
        let desired = (camera.distance() + delta).clamp(saved_min, saved_max);
        self.min_distance = desired;
        self.max_distance = desired;
        self.constrain(camera);
        self.min_distance = saved_min;
        self.max_distance = saved_max;
    }

    fn constrain(&self, camera: &mut Camera3D) {
        let offset = camera.position - camera.target;
        let distance = offset.length();
        let clamped = distance.clamp(self.min_distance, self.max_distance);
        if (clamped - distance).abs() > f32::EPSILON {
            let dir = offset.try_normalize().unwrap_or(Vec3::Z);
            camera.position = camera.target + dir * clamped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera3D {
        Camera3D::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 50.0_f32.to_radians(), 0.1, 1000.0)
    }

    #[test]
    fn view_projection_is_finite() {
        let vp = camera().view_projection(Viewport::new(1280, 720));
        assert!(!vp.to_cols_array().iter().any(|v| v.is_nan() || v.is_infinite()));
    }

    #[test]
    fn projects_target_to_screen_center() {
        let (screen, depth) = camera().project_point(Vec3::ZERO, Viewport::new(200, 100)).expect("visible");
        assert!((screen.x - 100.0).abs() < 1e-3);
        assert!((screen.y - 50.0).abs() < 1e-3);
        assert!(depth > 0.0);
        assert!(camera().project_point(Vec3::new(0.0, 0.0, 20.0), Viewport::new(200, 100)).is_none());
    }

    #[test]
    fn zoom_is_bounded_by_distance_range() {
        let mut controls = OrbitControls::new(2.0, 20.0, 0.1);
        let mut cam = camera();
        controls.zoom_in(&mut cam, 3.0);
        assert!((cam.distance() - 7.0).abs() < 1e-4);
        controls.zoom_in(&mut cam, 100.0);
        assert!((cam.distance() - 2.0).abs() < 1e-4);
        controls.zoom_out(&mut cam, 100.0);
        assert!((cam.distance() - 20.0).abs() < 1e-4);
        assert_eq!((controls.min_distance, controls.max_distance), (2.0, 20.0));
    }

    #[test]
    fn damped_orbit_keeps_radius_and_settles() {
        let mut controls = OrbitControls::new(1.0, 100.0, 0.25);
        let mut cam = camera();
        controls.orbit(Vec2::new(0.5, 0.0));
        assert!(controls.update(&mut cam));
        assert!((cam.distance() - 10.0).abs() < 1e-3);
        for _ in 0..400 {
            controls.update(&mut cam);
        }
        assert!(controls.is_settled());
    }
}
