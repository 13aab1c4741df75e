//! Axis-aligned bounding box.

use crate::math::{Ray, Vec3};

/// 未フィット状態は min=+∞ / max=−∞（体積が負）になる。
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }
}

impl Aabb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min(&self) -> Vec3 {
        self.min
    }

    pub fn max(&self) -> Vec3 {
        self.max
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn largest_axis(&self) -> usize {
        let size = self.size();
        if size.x > size.y && size.x > size.z {
            0
        } else if size.y > size.z {
            1
        } else {
            2
        }
    }

    /// 点を含むように拡張する。fit 後は min ≤ p ≤ max（成分ごと）。
    pub fn fit(&mut self, v: Vec3) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }

    pub fn half_area(&self) -> f32 {
        let size = self.size();
        size.x * (size.y + size.z) + size.y * size.z
    }

    pub fn area(&self) -> f32 {
        2.0 * self.half_area()
    }

    /// スラブ法。両スラブが重なり、かつ少なくとも一方の t が非負のときだけ
    /// 近い方の t を返す。
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let mut tx1 = (self.min.x - ray.origin.x) / ray.direction.x;
        let mut ty1 = (self.min.y - ray.origin.y) / ray.direction.y;
        let mut tz1 = (self.min.z - ray.origin.z) / ray.direction.z;

        let mut tx2 = (self.max.x - ray.origin.x) / ray.direction.x;
        let mut ty2 = (self.max.y - ray.origin.y) / ray.direction.y;
        let mut tz2 = (self.max.z - ray.origin.z) / ray.direction.z;

        if tx1 > tx2 {
            core::mem::swap(&mut tx1, &mut tx2);
        }
        if ty1 > ty2 {
            core::mem::swap(&mut ty1, &mut ty2);
        }
        if tz1 > tz2 {
            core::mem::swap(&mut tz1, &mut tz2);
        }

        let t1 = tx1.max(ty1).max(tz1);
        let t2 = tx2.min(ty2).min(tz2);

        if t1 > t2 {
            return None;
        }
        if t1 < 0.0 && t2 < 0.0 {
            return None;
        }

        Some(t1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_contains_points() {
        let points = [
            Vec3::new(0.5, -1.0, 2.0),
            Vec3::new(-3.0, 4.0, 0.0),
            Vec3::new(1.0, 1.0, 1.0),
        ];
        let mut bbox = Aabb::new();
        for p in points {
            bbox.fit(p);
        }
        for p in points {
            assert!(bbox.min().x <= p.x && p.x <= bbox.max().x);
            assert!(bbox.min().y <= p.y && p.y <= bbox.max().y);
            assert!(bbox.min().z <= p.z && p.z <= bbox.max().z);
        }
    }

    #[test]
    fn unfit_box_has_negative_volume() {
        let bbox = Aabb::new();
        assert!(bbox.size().x < 0.0);
        assert!(bbox.intersect(&Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0))).is_none());
    }

    #[test]
    fn ray_through_fitted_point_hits() {
        let mut bbox = Aabb::new();
        bbox.fit(Vec3::new(-1.0, -1.0, -1.0));
        bbox.fit(Vec3::new(1.0, 1.0, 1.0));
        // 外からフィット済みの点へ向けて撃つ
        let target = Vec3::new(0.3, -0.2, 0.9);
        let origin = Vec3::new(5.0, 4.0, 3.0);
        let ray = Ray::new(origin, (target - origin).normalized());
        let t = bbox.intersect(&ray).expect("must hit");
        assert!(t >= 0.0);
    }

    #[test]
    fn origin_inside_returns_negative_near_t() {
        let mut bbox = Aabb::new();
        bbox.fit(Vec3::splat(-1.0));
        bbox.fit(Vec3::splat(1.0));
        let t = bbox
            .intersect(&Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)))
            .expect("must hit from inside");
        assert!(t <= 0.0);
    }

    #[test]
    fn grazing_ray_near_edge() {
        let mut bbox = Aabb::new();
        bbox.fit(Vec3::ZERO);
        bbox.fit(Vec3::ONE);
        // 面から 1e-3 だけ外側の原点から面に平行に入射
        let ray = Ray::new(
            Vec3::new(-1.0, 1.0 - 1e-3, 0.5),
            Vec3::new(1.0, 0.0, 0.0),
        );
        let t = bbox.intersect(&ray).expect("grazing ray must hit");
        assert!(t >= 0.0);

        // 面のすぐ外（1e-3）から垂直に入射
        let ray = Ray::new(Vec3::new(0.5, 1.0 + 1e-3, 0.5), Vec3::new(0.0, -1.0, 0.0));
        let t = bbox.intersect(&ray).expect("must hit the top face");
        assert!(t >= 0.0);
    }

    #[test]
    fn half_area_of_unit_cube() {
        let mut bbox = Aabb::new();
        bbox.fit(Vec3::ZERO);
        bbox.fit(Vec3::ONE);
        assert!((bbox.half_area() - 3.0).abs() < 1e-6);
        assert!((bbox.area() - 6.0).abs() < 1e-6);
    }
}
