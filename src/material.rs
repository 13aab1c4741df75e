//! PBR-parameterized materials and their sampling routines.
//!
//! マテリアルは glTF の PBR パラメータから拡散 / 完全鏡面 / 屈折の
//! 3 種類に分類される。サンプリングはその分類ごとの専用ルーチンで行う。

use std::f32::consts::PI;

use crate::math::{Color, EPSILON, Ray, Vec3, Vec4};
use crate::path::{BounceType, Vertex};
use crate::rng::Pcg32;
use crate::scene::Scene;

#[derive(Clone, Debug)]
pub struct MaterialData {
    pub name: String,

    pub base_color_factor: Vec4,
    pub base_color_texture_idx: Option<usize>,

    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture_idx: Option<usize>,

    pub emissive_factor: Vec3,
    pub emissive_strength: f32,
    pub emissive_texture_idx: Option<usize>,

    pub transmission_factor: f32,
    pub transmission_texture_idx: Option<usize>,

    pub ior: f32,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: Vec4::splat(1.0),
            base_color_texture_idx: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture_idx: None,
            emissive_factor: Vec3::ZERO,
            emissive_strength: 1.0,
            emissive_texture_idx: None,
            transmission_factor: 0.0,
            transmission_texture_idx: None,
            ior: 1.5,
        }
    }
}

impl MaterialData {
    /// PBR パラメータからバウンス種別を分類する。
    pub fn bounce_type(&self) -> BounceType {
        if self.transmission_factor > 0.5 && self.metallic_factor < 0.5 {
            return BounceType::Refractive;
        }
        if self.metallic_factor > 0.5 && self.roughness_factor < 0.5 {
            return BounceType::Reflective;
        }
        BounceType::Diffuse
    }
}

// --- サンプリングヘルパー -----------------------------------------------------

/// 接空間 (tangent, bitangent, normal) の局所ベクトルをワールドへ。
fn to_world(local: Vec3, normal: Vec3) -> Vec3 {
    let tangent = if normal.x.abs() > normal.z.abs() {
        Vec3::new(0.0, 1.0, 0.0).cross(normal).normalized()
    } else {
        Vec3::new(1.0, 0.0, 0.0).cross(normal).normalized()
    };
    let bitangent = normal.cross(tangent);
    local.x * tangent + local.y * bitangent + local.z * normal
}

fn sample_reflected_ray(
    in_dir: Vec3,
    position: Vec3,
    shading_normal: Vec3,
    geometric_normal: Vec3,
) -> (Ray, BounceType) {
    let mut reflected_direction =
        -(in_dir - 2.0 * in_dir.dot(shading_normal) * shading_normal).normalized();
    if reflected_direction.dot(geometric_normal) < 0.0 {
        // シェーディング法線での反射が面の裏に潜る場合は幾何法線で反射し直す
        reflected_direction =
            -(in_dir - 2.0 * in_dir.dot(geometric_normal) * geometric_normal).normalized();
    }
    (
        Ray::new(position + EPSILON * geometric_normal, reflected_direction),
        BounceType::Reflective,
    )
}

fn compute_fresnel(cos_in: f32, cos_out: f32, eta1: f32, eta2: f32) -> f32 {
    let ps = (eta1 * cos_in - eta2 * cos_out) / (eta1 * cos_in + eta2 * cos_out);
    let pt = (eta1 * cos_out - eta2 * cos_in) / (eta1 * cos_out + eta2 * cos_in);
    0.5 * (ps * ps + pt * pt)
}

fn sample_refracted_ray(
    rng: &mut Pcg32,
    in_dir: Vec3,
    position: Vec3,
    shading_normal: Vec3,
    geometric_normal: Vec3,
    ior: f32,
) -> (Ray, BounceType) {
    let true_dir = -in_dir;
    let is_entering = true_dir.dot(shading_normal) < 0.0;

    let eta1 = if is_entering { 1.0 } else { ior };
    let eta2 = if is_entering { ior } else { 1.0 };
    let refraction_ratio = eta1 / eta2;

    let normal = if is_entering { shading_normal } else { -shading_normal };

    let cos_in = -normal.dot(true_dir);

    let discriminant = 1.0 - refraction_ratio * refraction_ratio * (1.0 - cos_in * cos_in);
    if discriminant < 0.0 {
        // 全反射
        return sample_reflected_ray(in_dir, position, shading_normal, geometric_normal);
    }

    let cos_out = discriminant.sqrt();

    let refracted_direction =
        (refraction_ratio * true_dir + (refraction_ratio * cos_in - cos_out) * normal).normalized();

    let fresnel = compute_fresnel(cos_in, cos_out, eta1, eta2);

    if rng.next_f32() < fresnel {
        return sample_reflected_ray(in_dir, position, shading_normal, geometric_normal);
    }
    let bias = geometric_normal * EPSILON * if is_entering { -1.0 } else { 1.0 };
    (
        Ray::new(position + bias, refracted_direction),
        BounceType::Refractive,
    )
}

fn sample_diffused_ray(
    rng: &mut Pcg32,
    position: Vec3,
    shading_normal: Vec3,
    geometric_normal: Vec3,
) -> (Ray, BounceType) {
    // 単位円板からのサンプル（接空間でのコサイン重み半球）
    let r = rng.next_f32().sqrt();
    let theta = 2.0 * PI * rng.next_f32();

    let x = r * theta.cos();
    let y = r * theta.sin();
    let z = (1.0 - x * x - y * y).max(0.0).sqrt();

    (
        Ray::new(
            position + EPSILON * geometric_normal,
            to_world(Vec3::new(x, y, z), shading_normal),
        ),
        BounceType::Diffuse,
    )
}

// --- マテリアル本体 ----------------------------------------------------------

/// A material bound to its scene (for texture lookups).
pub struct Material<'a> {
    scene: &'a Scene,
    data: &'a MaterialData,
}

impl<'a> Material<'a> {
    pub(crate) fn new(scene: &'a Scene, data: &'a MaterialData) -> Self {
        Self { scene, data }
    }

    pub fn bounce_type(&self) -> BounceType {
        self.data.bounce_type()
    }

    /// 拡散 BRDF: baseColor / π。
    pub fn bsdf(&self, vertex: &Vertex) -> Color {
        let mut result = self.data.base_color_factor.xyz() / PI;
        if let Some(texture_idx) = self.data.base_color_texture_idx {
            result *= self.scene.sample_texture(texture_idx, vertex.texture_coord);
        }
        result
    }

    /// 1 バウンスが放射輝度に乗せる期待係数。
    pub fn expected_contribution(&self, vertex: &Vertex, _in_dir: Vec3) -> Color {
        let mut base_color = Color::ONE;
        if self.data.bounce_type() != BounceType::Refractive {
            base_color *= self.data.base_color_factor.xyz();
            if let Some(texture_idx) = self.data.base_color_texture_idx {
                base_color *= self.scene.sample_texture(texture_idx, vertex.texture_coord);
            }
        }
        // 屈折マテリアルは当面白として扱う
        base_color
    }

    pub fn emission(&self, vertex: &Vertex) -> Color {
        let mut emission = self.data.emissive_factor * self.data.emissive_strength;
        if emission != Vec3::ZERO {
            if let Some(texture_idx) = self.data.emissive_texture_idx {
                emission *= self.scene.sample_texture(texture_idx, vertex.texture_coord);
            }
        }
        emission
    }

    /// 新しい方向をサンプルする。`in_dir` は面から離れる向き。
    pub fn sample_direction(
        &self,
        in_dir: Vec3,
        vertex: &Vertex,
        rng: &mut Pcg32,
    ) -> (Ray, BounceType) {
        match self.data.bounce_type() {
            BounceType::Refractive => sample_refracted_ray(
                rng,
                in_dir,
                vertex.position,
                vertex.normal,
                vertex.geometric_normal,
                self.data.ior,
            ),
            BounceType::Reflective => sample_reflected_ray(
                in_dir,
                vertex.position,
                vertex.normal,
                vertex.geometric_normal,
            ),
            _ => sample_diffused_ray(rng, vertex.position, vertex.normal, vertex.geometric_normal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ConnectionType;

    fn vertex_at_origin() -> Vertex {
        Vertex {
            connection_type: ConnectionType::Implicit,
            bounce_type: BounceType::None,
            position: Vec3::ZERO,
            normal: Vec3::new(0.0, 1.0, 0.0),
            geometric_normal: Vec3::new(0.0, 1.0, 0.0),
            ..Default::default()
        }
    }

    #[test]
    fn classification_from_pbr_factors() {
        let mut data = MaterialData::default();
        data.transmission_factor = 1.0;
        data.metallic_factor = 0.0;
        assert_eq!(data.bounce_type(), BounceType::Refractive);

        let mut data = MaterialData::default();
        data.metallic_factor = 1.0;
        data.roughness_factor = 0.1;
        assert_eq!(data.bounce_type(), BounceType::Reflective);

        let mut data = MaterialData::default();
        data.metallic_factor = 0.0;
        data.roughness_factor = 1.0;
        assert_eq!(data.bounce_type(), BounceType::Diffuse);
    }

    #[test]
    fn reflected_ray_mirrors_about_normal() {
        // in_dir は面から離れる向き（45 度入射）
        let in_dir = Vec3::new(1.0, 1.0, 0.0).normalized();
        let (ray, bounce) = sample_reflected_ray(
            in_dir,
            Vec3::ZERO,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        assert_eq!(bounce, BounceType::Reflective);
        let expected = Vec3::new(1.0, -1.0, 0.0).normalized();
        assert!((ray.direction - expected).length() < 1e-5);
        assert!(ray.origin.y > 0.0); // 自己交差回避のオフセット
    }

    #[test]
    fn fresnel_reflectance_is_in_unit_range() {
        for &(ci, co) in &[(1.0, 0.9), (0.5, 0.3), (0.2, 0.05)] {
            let f = compute_fresnel(ci, co, 1.0, 1.5);
            assert!((0.0..=1.0).contains(&f), "f = {}", f);
        }
        // 垂直入射の既知値 ((n-1)/(n+1))^2
        let f0 = compute_fresnel(1.0, 1.0, 1.0, 1.5);
        assert!((f0 - 0.04).abs() < 1e-3);
    }

    #[test]
    fn total_internal_reflection_reflects() {
        let mut rng = Pcg32::new(1);
        // ガラス内側からの浅い入射
        let in_dir = Vec3::new(0.9, 0.1, 0.0).normalized();
        let (_, bounce) = sample_refracted_ray(
            &mut rng,
            in_dir,
            Vec3::ZERO,
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
            1.5,
        );
        assert_eq!(bounce, BounceType::Reflective);
    }

    #[test]
    fn diffuse_samples_stay_above_surface() {
        let mut rng = Pcg32::new(9);
        let normal = Vec3::new(0.0, 1.0, 0.0);
        for _ in 0..1000 {
            let (ray, bounce) = sample_diffused_ray(&mut rng, Vec3::ZERO, normal, normal);
            assert_eq!(bounce, BounceType::Diffuse);
            assert!(ray.direction.dot(normal) >= 0.0);
            assert!((ray.direction.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn expected_contribution_is_white_for_refractive() {
        let scene = Scene::new(crate::camera::Camera::new(
            16,
            16,
            45.0,
            0.032,
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(0.0, 1.0, 0.0),
        ));
        let mut data = MaterialData::default();
        data.transmission_factor = 1.0;
        data.metallic_factor = 0.0;
        data.base_color_factor = Vec4::new(0.2, 0.4, 0.6, 1.0);
        let material = Material::new(&scene, &data);
        let v = vertex_at_origin();
        assert_eq!(material.expected_contribution(&v, Vec3::ONE), Color::ONE);
        // 拡散なら baseColor がそのまま
        let data = MaterialData {
            base_color_factor: Vec4::new(0.2, 0.4, 0.6, 1.0),
            metallic_factor: 0.0,
            ..Default::default()
        };
        let material = Material::new(&scene, &data);
        let c = material.expected_contribution(&v, Vec3::ONE);
        assert!((c - Color::new(0.2, 0.4, 0.6)).length() < 1e-6);
    }
}
