//! Four axis-aligned bounding boxes, packed column-wise for one-shot ray
//! tests. The x/y/z components of each box live in a [`Vec4`] whose lanes are
//! the four boxes.

use crate::aabb::Aabb;
use crate::math::{Ray, Vec3, Vec4};

#[derive(Clone, Copy, Debug)]
pub struct Aabb4 {
    min_x: Vec4,
    min_y: Vec4,
    min_z: Vec4,
    max_x: Vec4,
    max_y: Vec4,
    max_z: Vec4,
}

/// レーンごとのヒットフラグと近接距離。
#[derive(Clone, Copy, Debug)]
pub struct Hit4 {
    pub is_hit: [bool; 4],
    pub distances: Vec4,
}

impl Default for Aabb4 {
    fn default() -> Self {
        Self {
            min_x: Vec4::splat(f32::INFINITY),
            min_y: Vec4::splat(f32::INFINITY),
            min_z: Vec4::splat(f32::INFINITY),
            max_x: Vec4::splat(f32::NEG_INFINITY),
            max_y: Vec4::splat(f32::NEG_INFINITY),
            max_z: Vec4::splat(f32::NEG_INFINITY),
        }
    }
}

impl Aabb4 {
    pub fn new() -> Self {
        Self::default()
    }

    /// 4 つの AABB を詰める。
    pub fn from_boxes(a: &Aabb, b: &Aabb, c: &Aabb, d: &Aabb) -> Self {
        Self {
            min_x: Vec4::new(a.min().x, b.min().x, c.min().x, d.min().x),
            min_y: Vec4::new(a.min().y, b.min().y, c.min().y, d.min().y),
            min_z: Vec4::new(a.min().z, b.min().z, c.min().z, d.min().z),
            max_x: Vec4::new(a.max().x, b.max().x, c.max().x, d.max().x),
            max_y: Vec4::new(a.max().y, b.max().y, c.max().y, d.max().y),
            max_z: Vec4::new(a.max().z, b.max().z, c.max().z, d.max().z),
        }
    }

    pub fn min(&self, idx: usize) -> Vec3 {
        Vec3::new(self.min_x[idx], self.min_y[idx], self.min_z[idx])
    }

    pub fn max(&self, idx: usize) -> Vec3 {
        Vec3::new(self.max_x[idx], self.max_y[idx], self.max_z[idx])
    }

    pub fn size(&self, idx: usize) -> Vec3 {
        self.max(idx) - self.min(idx)
    }

    pub fn min_axis(&self, idx: usize, axis: usize) -> f32 {
        match axis {
            0 => self.min_x[idx],
            1 => self.min_y[idx],
            _ => self.min_z[idx],
        }
    }

    pub fn size_axis(&self, idx: usize, axis: usize) -> f32 {
        self.size(idx)[axis]
    }

    pub fn fit(&mut self, idx: usize, point: Vec3) {
        self.min_x[idx] = self.min_x[idx].min(point.x);
        self.min_y[idx] = self.min_y[idx].min(point.y);
        self.min_z[idx] = self.min_z[idx].min(point.z);
        self.max_x[idx] = self.max_x[idx].max(point.x);
        self.max_y[idx] = self.max_y[idx].max(point.y);
        self.max_z[idx] = self.max_z[idx].max(point.z);
    }

    pub fn half_area(&self, idx: usize) -> f32 {
        let size = self.size(idx);
        size.x * (size.y + size.z) + size.y * size.z
    }

    /// 4 箱同時のスラブ法。ロジックは [`Aabb::intersect`] と同じで、
    /// 各演算をレーンごとに適用しているだけ。
    pub fn intersect(&self, ray: &Ray) -> Hit4 {
        let tmin_x = (self.min_x - ray.origin.x) / ray.direction.x;
        let tmax_x = (self.max_x - ray.origin.x) / ray.direction.x;
        let tmin_y = (self.min_y - ray.origin.y) / ray.direction.y;
        let tmax_y = (self.max_y - ray.origin.y) / ray.direction.y;
        let tmin_z = (self.min_z - ray.origin.z) / ray.direction.z;
        let tmax_z = (self.max_z - ray.origin.z) / ray.direction.z;

        let tx1 = tmin_x.min(tmax_x);
        let tx2 = tmin_x.max(tmax_x);
        let ty1 = tmin_y.min(tmax_y);
        let ty2 = tmin_y.max(tmax_y);
        let tz1 = tmin_z.min(tmax_z);
        let tz2 = tmin_z.max(tmax_z);

        let t1 = tx1.max(ty1.max(tz1));
        let t2 = tx2.min(ty2.min(tz2));

        let mut is_hit = [false; 4];
        for lane in 0..4 {
            is_hit[lane] = t1[lane] <= t2[lane] && !(t1[lane] < 0.0 && t2[lane] < 0.0);
        }

        Hit4 {
            is_hit,
            distances: t1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(min: Vec3, max: Vec3) -> Aabb {
        let mut b = Aabb::new();
        b.fit(min);
        b.fit(max);
        b
    }

    #[test]
    fn lanes_agree_with_scalar_test() {
        let boxes = [
            boxed(Vec3::new(-1.0, -1.0, -5.0), Vec3::new(1.0, 1.0, -4.0)),
            boxed(Vec3::new(3.0, 3.0, -5.0), Vec3::new(4.0, 4.0, -4.0)),
            boxed(Vec3::new(-0.5, -0.5, -10.0), Vec3::new(0.5, 0.5, -9.0)),
            boxed(Vec3::new(-1.0, 5.0, -3.0), Vec3::new(1.0, 6.0, -2.0)),
        ];
        let packed = Aabb4::from_boxes(&boxes[0], &boxes[1], &boxes[2], &boxes[3]);

        let rays = [
            Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0)),
            Ray::new(Vec3::new(3.5, 3.5, 0.0), Vec3::new(0.0, 0.0, -1.0)),
            Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::new(0.0, -1.0, 0.0)),
        ];
        for ray in &rays {
            let hit = packed.intersect(ray);
            for lane in 0..4 {
                let scalar = boxes[lane].intersect(ray);
                assert_eq!(hit.is_hit[lane], scalar.is_some(), "lane {}", lane);
                if let Some(t) = scalar {
                    assert!((hit.distances[lane] - t).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn fit_then_query_roundtrip() {
        let mut packed = Aabb4::new();
        packed.fit(2, Vec3::new(-1.0, 0.0, 2.0));
        packed.fit(2, Vec3::new(1.0, 3.0, 4.0));
        assert_eq!(packed.min(2), Vec3::new(-1.0, 0.0, 2.0));
        assert_eq!(packed.max(2), Vec3::new(1.0, 3.0, 4.0));
        assert_eq!(packed.min_axis(2, 2), 2.0);
        assert_eq!(packed.size_axis(2, 1), 3.0);
        // 他レーンは未フィットのまま
        assert!(packed.size(0).x < 0.0);
    }

    #[test]
    fn half_area_matches_scalar() {
        let b = boxed(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        let packed = Aabb4::from_boxes(&b, &b, &b, &b);
        for lane in 0..4 {
            assert!((packed.half_area(lane) - b.half_area()).abs() < 1e-5);
        }
    }
}
