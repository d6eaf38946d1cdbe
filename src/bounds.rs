use glam::{Mat4, Vec3};

/// Axis-aligned box in whatever space its owner defines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb { min: Vec3::splat(f32::INFINITY), max: Vec3::splat(f32::NEG_INFINITY) };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: max.max(min) }
    }

    pub fn from_half_extents(half: Vec3) -> Self {
        Self::new(-half, half)
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Aabb::EMPTY, |acc, point| acc.expanded_to(point))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn bottom_center(&self) -> Vec3 {
        let center = self.center();
        Vec3::new(center.x, self.min.y, center.z)
    }

    pub fn expanded_to(self, point: Vec3) -> Self {
        Self { min: self.min.min(point), max: self.max.max(point) }
    }

    pub fn union(self, other: Aabb) -> Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            return other;
        }
        Self { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Bounds of this box after `matrix`, re-fitted to the axes.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(self.corners().into_iter().map(|corner| matrix.transform_point3(corner)))
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb::EMPTY
    }
}

pub fn matrix_is_finite(mat: &Mat4) -> bool {
    mat.to_cols_array().iter().all(|v| v.is_finite())
}

/// Slab test. Returns the distance along `dir` and the hit point; a ray starting inside
/// the box hits at its exit point unless it starts on the boundary.
pub fn ray_aabb_intersection(origin: Vec3, dir: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3)> {
    let mut t_min: f32 = 0.0;
    let mut t_max: f32 = f32::INFINITY;
    let origin_arr = origin.to_array();
    let dir_arr = dir.to_array();
    let min_arr = min.to_array();
    let max_arr = max.to_array();
    for i in 0..3 {
        let o = origin_arr[i];
        let d = dir_arr[i];
        if d.abs() < 1e-6 {
            if o < min_arr[i] || o > max_arr[i] {
                return None;
            }
        } else {
            let inv_d = 1.0 / d;
            let mut t1 = (min_arr[i] - o) * inv_d;
            let mut t2 = (max_arr[i] - o) * inv_d;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
    }
    if t_max < 0.0 {
        return None;
    }
    let t_hit = if t_min >= 0.0 { t_min } else { t_max };
    Some((t_hit, origin + dir * t_hit))
}

/// Ray against an oriented box given by `world` and local `bounds`. Distance is in world units.
pub fn ray_hit_obb(origin: Vec3, dir: Vec3, world: &Mat4, bounds: &Aabb) -> Option<f32> {
    if bounds.is_empty() {
        return None;
    }
    let inv = world.inverse();
    if !matrix_is_finite(&inv) {
        return None;
    }
    let origin_local = inv.transform_point3(origin);
    let dir_local = inv.transform_vector3(dir);
    if dir_local.length_squared() <= f32::EPSILON {
        return None;
    }
    let dir_local = dir_local.normalize();
    let (_, hit_local) = ray_aabb_intersection(origin_local, dir_local, bounds.min, bounds.max)?;
    let hit_world = world.transform_point3(hit_local);
    Some((hit_world - origin).length())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn transformed_box_refits_after_rotation() {
        let unit = Aabb::from_half_extents(Vec3::splat(0.5));
        let rotated = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4);
        let fitted = unit.transformed(&rotated);
        let expected = 0.5_f32 * 2.0_f32.sqrt();
        assert!((fitted.max.x - expected).abs() < 1e-5);
        assert!((fitted.max.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downward_ray_hits_box_top() {
        let (t, hit) =
            ray_aabb_intersection(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, Vec3::splat(-1.0), Vec3::splat(1.0))
                .expect("hit");
        assert!((t - 4.0).abs() < 1e-6);
        assert!((hit.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn obb_hit_respects_translation_and_scale() {
        let world = Mat4::from_scale_rotation_translation(Vec3::splat(2.0), Quat::IDENTITY, Vec3::new(3.0, 0.0, 0.0));
        let bounds = Aabb::from_half_extents(Vec3::splat(0.5));
        let distance = ray_hit_obb(Vec3::new(3.0, 10.0, 0.0), Vec3::NEG_Y, &world, &bounds).expect("hit");
        assert!((distance - 9.0).abs() < 1e-4);
        assert!(ray_hit_obb(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, &world, &bounds).is_none());
    }

    #[test]
    fn union_ignores_empty_boxes() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.union(Aabb::EMPTY), a);
        assert_eq!(Aabb::EMPTY.union(a), a);
    }
}
