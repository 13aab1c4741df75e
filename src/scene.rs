//! Scene model: camera, meshes, textures, lights and materials, plus the
//! closest-hit query over every primitive's BVH.

use crate::bvh;
use crate::camera::Camera;
use crate::film::Film;
use crate::light::Light;
use crate::material::{Material, MaterialData};
use crate::math::{Ray, Vec2, Vec3};
use crate::mesh::Mesh;

/// 画像への参照だけを持つ薄いラッパ（glTF のテクスチャに対応）。
#[derive(Clone, Copy, Debug)]
pub struct Texture {
    pub image_idx: usize,
}

pub struct Scene {
    pub camera: Camera,
    pub meshes: Vec<Mesh>,
    pub textures: Vec<Texture>,
    pub images: Vec<Film>,
    pub lights: Vec<Light>,
    materials: Vec<MaterialData>,
    default_material: MaterialData,
}

#[derive(Clone, Copy, Debug)]
pub struct HitInfo {
    pub distance: f32,
    pub position: Vec3,
    pub normal: Vec3,
    pub geometric_normal: Vec3,
    pub texture_coord: Vec2,
    pub material_idx: Option<usize>,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            meshes: Vec::new(),
            textures: Vec::new(),
            images: Vec::new(),
            lights: Vec::new(),
            materials: Vec::new(),
            default_material: MaterialData::default(),
        }
    }

    pub fn add_material(&mut self, material: MaterialData) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn material_data(&self, material_idx: usize) -> &MaterialData {
        &self.materials[material_idx]
    }

    pub fn get_material(&self, material_idx: Option<usize>) -> Material<'_> {
        match material_idx {
            Some(idx) => {
                debug_assert!(idx < self.materials.len());
                Material::new(self, &self.materials[idx])
            }
            None => Material::new(self, &self.default_material),
        }
    }

    pub fn get_material_for(&self, mesh_idx: usize, primitive_idx: usize) -> Material<'_> {
        let mesh = &self.meshes[mesh_idx];
        self.get_material(mesh.primitives[primitive_idx].material_idx)
    }

    /// 最近接ヒット。全メッシュ × 全プリミティブの BVH を順に引く。
    pub fn intersect(&self, ray: &Ray, min_distance: f32, max_distance: f32) -> Option<HitInfo> {
        struct Hit<'a> {
            mesh: &'a Mesh,
            material_idx: Option<usize>,
            hit_info: bvh::HitInfo,
        }
        let mut closest_hit: Option<Hit> = None;
        for mesh in &self.meshes {
            for primitive in &mesh.primitives {
                let hit_info = primitive.bvh.intersect(ray, min_distance, max_distance);
                if let Some(hit_info) = hit_info {
                    if closest_hit
                        .as_ref()
                        .is_none_or(|c| hit_info.distance < c.hit_info.distance)
                    {
                        closest_hit = Some(Hit {
                            mesh,
                            material_idx: primitive.material_idx,
                            hit_info,
                        });
                    }
                }
            }
        }
        let closest_hit = closest_hit?;

        let triangle = &closest_hit.mesh.triangles[closest_hit.hit_info.triangle_idx];
        let edge1 = triangle.positions[1] - triangle.positions[0];
        let edge2 = triangle.positions[2] - triangle.positions[0];
        let weights = closest_hit.hit_info.barycentric_coords;

        Some(HitInfo {
            distance: closest_hit.hit_info.distance,
            position: closest_hit.hit_info.position,
            normal: (triangle.normals[0] * weights[0]
                + triangle.normals[1] * weights[1]
                + triangle.normals[2] * weights[2])
                .normalized(),
            geometric_normal: edge1.cross(edge2).normalized(),
            texture_coord: triangle.texture_coords[0] * weights[0]
                + triangle.texture_coords[1] * weights[1]
                + triangle.texture_coords[2] * weights[2],
            material_idx: closest_hit.material_idx,
        })
    }

    /// 最近傍 + リピートでテクスチャをサンプルする。
    pub fn sample_texture(&self, texture_idx: usize, texture_coord: Vec2) -> Vec3 {
        debug_assert!(texture_idx < self.textures.len());
        let texture = &self.textures[texture_idx];
        let image = &self.images[texture.image_idx];
        if image.is_empty() {
            return Vec3::ONE;
        }

        let width = image.width() as i64;
        let height = image.height() as i64;
        let u = ((texture_coord.x * width as f32) as i64).rem_euclid(width) as usize;
        let v = ((texture_coord.y * height as f32) as i64).rem_euclid(height) as usize;

        image.rgb(u, v)
    }
}
