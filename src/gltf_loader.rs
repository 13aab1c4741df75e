//! glTF/GLB から Scene を構築するローダ。
//! - 対応: TRS のノード変換のみ。行列ノードは読み飛ばす。
//! - マテリアル: PBR metallic-roughness + KHR_materials_transmission /
//!   KHR_materials_ior / KHR_materials_emissive_strength
//! - ライト: KHR_lights_punctual の点光源と、発光プリミティブの
//!   メッシュライト自動登録
//! - カメラ: index 0 のカメラノードから位置と基底を取り込む

use std::f32::consts::PI;
use std::path::Path as FilePath;

use gltf::khr_lights_punctual::Kind;
use log::{info, warn};
use thiserror::Error;

use crate::film::Film;
use crate::light::{Light, MeshLight, PointLight};
use crate::material::MaterialData;
use crate::math::{Vec2, Vec3, Vec4};
use crate::mesh::{Mesh, Triangle};
use crate::scene::{Scene, Texture};

/// カンデラ → ワットの換算係数。
const PBR_LUMENS_TO_WATTS: f32 = 1.0 / 683.0;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to load glTF: {0}")]
    Gltf(#[from] gltf::Error),
}

/// ノードの TRS（M = T·S·R で合成される）。
#[derive(Clone, Copy, Debug)]
struct Trs {
    translation: Vec3,
    rotation: [f32; 4],
    scale: Vec3,
}

impl Default for Trs {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: Vec3::ONE,
        }
    }
}

/// クォータニオン (x,y,z,w) によるベクトルの回転。
fn rotate_by_quat(q: [f32; 4], v: Vec3) -> Vec3 {
    let u = Vec3::new(q[0], q[1], q[2]);
    let w = q[3];
    2.0 * u.dot(v) * u + (w * w - u.dot(u)) * v + 2.0 * w * u.cross(v)
}

impl Trs {
    /// 点の変換: t + s ⊙ (R v)
    fn transform_point(&self, v: Vec3) -> Vec3 {
        self.translation + self.scale * rotate_by_quat(self.rotation, v)
    }

    /// 方向の変換（平行移動なし、スケールは掛かる）。
    fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.scale * rotate_by_quat(self.rotation, v)
    }
}

/// デコード済みの glTF 画像を 3 チャンネルの float 画像へ変換する。
fn image_data_to_film(data: &gltf::image::Data) -> Film {
    use gltf::image::Format;

    let width = data.width as usize;
    let height = data.height as usize;
    let mut film = Film::new(width, height, 3);

    let num_pixels = width * height;
    match data.format {
        Format::R8 => {
            for i in 0..num_pixels {
                let v = data.pixels[i] as f32 / 255.0;
                film.set_rgb(i % width, i / width, Vec3::splat(v));
            }
        }
        Format::R8G8B8 | Format::R8G8B8A8 => {
            let stride = if data.format == Format::R8G8B8 { 3 } else { 4 };
            for i in 0..num_pixels {
                let p = &data.pixels[i * stride..];
                film.set_rgb(
                    i % width,
                    i / width,
                    Vec3::new(
                        p[0] as f32 / 255.0,
                        p[1] as f32 / 255.0,
                        p[2] as f32 / 255.0,
                    ),
                );
            }
        }
        Format::R32G32B32FLOAT | Format::R32G32B32A32FLOAT => {
            let stride = if data.format == Format::R32G32B32FLOAT { 3 } else { 4 };
            for i in 0..num_pixels {
                let p = &data.pixels[i * stride * 4..];
                let c = |o: usize| f32::from_le_bytes([p[o], p[o + 1], p[o + 2], p[o + 3]]);
                film.set_rgb(i % width, i / width, Vec3::new(c(0), c(4), c(8)));
            }
        }
        other => {
            warn!("unsupported image format {:?}, using white", other);
            return Film::default();
        }
    }

    film
}

impl Scene {
    /// glTF/GLB を読み込んでシーンを組み立てる。
    pub fn load_gltf(&mut self, file_path: &FilePath) -> Result<(), SceneError> {
        info!("Loading GLTF: {}", file_path.display());

        let (document, buffers, images) = gltf::import(file_path)?;

        // 画像とテクスチャ
        for image in &images {
            self.images.push(image_data_to_film(image));
        }
        for texture in document.textures() {
            self.textures.push(Texture {
                image_idx: texture.source().index(),
            });
        }

        // マテリアル
        for material in document.materials() {
            let pbr = material.pbr_metallic_roughness();
            let base_color = pbr.base_color_factor();
            let emissive = material.emissive_factor();

            let mut data = MaterialData {
                name: material.name().unwrap_or("").to_string(),
                base_color_factor: Vec4::new(
                    base_color[0],
                    base_color[1],
                    base_color[2],
                    base_color[3],
                ),
                base_color_texture_idx: pbr.base_color_texture().map(|t| t.texture().index()),
                metallic_factor: pbr.metallic_factor(),
                roughness_factor: pbr.roughness_factor(),
                metallic_roughness_texture_idx: pbr
                    .metallic_roughness_texture()
                    .map(|t| t.texture().index()),
                emissive_factor: Vec3::new(emissive[0], emissive[1], emissive[2]),
                emissive_strength: material.emissive_strength().unwrap_or(1.0),
                emissive_texture_idx: material.emissive_texture().map(|t| t.texture().index()),
                ior: material.ior().unwrap_or(1.5),
                ..Default::default()
            };
            if let Some(transmission) = material.transmission() {
                data.transmission_factor = transmission.transmission_factor();
                data.transmission_texture_idx = transmission
                    .transmission_texture()
                    .map(|t| t.texture().index());
            }

            info!("Loaded material name={}", data.name);
            self.add_material(data);
        }

        // 点光源（位置はノード巡回で入る）
        if let Some(lights) = document.lights() {
            for light in lights {
                if let Kind::Point = light.kind() {
                    // カンデラをワットへ換算
                    let wattage = light.intensity() * 4.0 * PI * PBR_LUMENS_TO_WATTS;
                    let color = light.color();
                    self.lights.push(Light::Point(PointLight {
                        position: Vec3::ZERO,
                        wattage: Vec3::new(color[0], color[1], color[2]) * wattage,
                    }));
                }
            }
        }

        // ノード: TRS だけを解釈してメッシュ変換・光源位置・カメラを拾う
        let mut mesh_transforms = vec![Trs::default(); document.meshes().len()];
        for node in document.nodes() {
            let gltf::scene::Transform::Decomposed {
                translation,
                rotation,
                scale,
            } = node.transform()
            else {
                continue;
            };
            let trs = Trs {
                translation: Vec3::new(translation[0], translation[1], translation[2]),
                rotation,
                scale: Vec3::new(scale[0], scale[1], scale[2]),
            };

            if let Some(light) = node.light() {
                if let Some(Light::Point(point_light)) = self.lights.get_mut(light.index()) {
                    point_light.position = trs.translation;
                }
            } else if let Some(mesh) = node.mesh() {
                mesh_transforms[mesh.index()] = trs;
            } else if let Some(camera) = node.camera() {
                if camera.index() == 0 {
                    self.camera.position = trs.transform_point(Vec3::ZERO);
                    self.camera.forward =
                        trs.transform_vector(Vec3::new(0.0, 0.0, -1.0)).normalized();
                    self.camera.up = trs.transform_vector(Vec3::new(0.0, 1.0, 0.0)).normalized();
                    self.camera.right = trs.transform_vector(Vec3::new(1.0, 0.0, 0.0)).normalized();
                }
            }
        }

        // メッシュ
        for (mesh_idx, gltf_mesh) in document.meshes().enumerate() {
            let trs = mesh_transforms[mesh_idx];
            let mut new_mesh = Mesh {
                name: gltf_mesh.name().unwrap_or("").to_string(),
                ..Default::default()
            };

            for primitive in gltf_mesh.primitives() {
                let primitive_start_idx = new_mesh.triangles.len();
                let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()].0));

                let positions: Vec<Vec3> = match reader.read_positions() {
                    Some(iter) => iter
                        .map(|p| trs.transform_point(Vec3::new(p[0], p[1], p[2])))
                        .collect(),
                    None => {
                        warn!("primitive without POSITION attribute, skipping");
                        continue;
                    }
                };
                let normals: Vec<Vec3> = reader
                    .read_normals()
                    .map(|iter| {
                        iter.map(|n| trs.transform_vector(Vec3::new(n[0], n[1], n[2])))
                            .collect()
                    })
                    .unwrap_or_default();
                let texture_coords: Vec<Vec2> = reader
                    .read_tex_coords(0)
                    .map(|iter| iter.into_f32().map(|t| Vec2::new(t[0], t[1])).collect())
                    .unwrap_or_default();
                let indices: Vec<u32> = reader
                    .read_indices()
                    .map(|iter| iter.into_u32().collect())
                    .unwrap_or_else(|| (0..positions.len() as u32).collect());

                // 欠けている属性の既定値（法線は変換後の +X）
                let default_normal = trs.transform_vector(Vec3::new(1.0, 0.0, 0.0));

                let mut primitive_triangle_count = 0usize;
                for chunk in indices.chunks_exact(3) {
                    let mut triangle = Triangle {
                        positions: [Vec3::ZERO; 3],
                        normals: [default_normal; 3],
                        texture_coords: [Vec2::ZERO; 3],
                    };
                    for (j, &idx) in chunk.iter().enumerate() {
                        let idx = idx as usize;
                        triangle.positions[j] = positions[idx];
                        if let Some(normal) = normals.get(idx) {
                            triangle.normals[j] = *normal;
                        }
                        if let Some(texture_coord) = texture_coords.get(idx) {
                            triangle.texture_coords[j] = *texture_coord;
                        }
                    }
                    new_mesh.push_triangle(triangle);
                    primitive_triangle_count += 1;
                }

                // 発光マテリアルのプリミティブはライトとしても登録する
                let (emissive_strength, emissive_factor) = match primitive.material().index() {
                    Some(material_idx) => {
                        let data = self.material_data(material_idx);
                        (data.emissive_strength, data.emissive_factor)
                    }
                    None => (1.0, Vec3::ZERO),
                };
                if emissive_strength > 0.0 && emissive_factor.length_squared() > 0.0 {
                    let primitive_idx = new_mesh.primitives.len();
                    self.lights.push(Light::Mesh(MeshLight {
                        mesh_idx: self.meshes.len(),
                        primitive_idx,
                    }));
                    info!(
                        "Added mesh name={} primitiveIdx={} as a light",
                        new_mesh.name, primitive_idx
                    );
                }

                new_mesh.add_primitive(
                    primitive_start_idx,
                    primitive_triangle_count,
                    primitive.material().index(),
                );
            }

            info!("Loaded mesh name={}", new_mesh.name);
            self.meshes.push(new_mesh);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quaternion_rotation_matches_axis_angle() {
        // z 軸回り 90 度
        let half = std::f32::consts::FRAC_PI_4;
        let q = [0.0, 0.0, half.sin(), half.cos()];
        let rotated = rotate_by_quat(q, Vec3::new(1.0, 0.0, 0.0));
        assert!((rotated - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn trs_applies_scale_after_rotation() {
        let half = std::f32::consts::FRAC_PI_4;
        let trs = Trs {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: [0.0, 0.0, half.sin(), half.cos()],
            scale: Vec3::new(2.0, 1.0, 1.0),
        };
        // (1,0,0) -> 回転で (0,1,0) -> スケールは x にしか掛からない -> (0,1,0) + t
        let p = trs.transform_point(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(1.0, 3.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut scene = Scene::new(crate::camera::Camera::new(
            8,
            8,
            45.0,
            0.032,
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(0.0, 1.0, 0.0),
        ));
        assert!(scene.load_gltf(FilePath::new("does-not-exist.glb")).is_err());
    }

    #[test]
    fn rgba_image_drops_alpha() {
        let data = gltf::image::Data {
            pixels: vec![255, 0, 0, 10, 0, 255, 0, 20],
            format: gltf::image::Format::R8G8B8A8,
            width: 2,
            height: 1,
        };
        let film = image_data_to_film(&data);
        assert_eq!(film.width(), 2);
        assert_eq!(film.rgb(0, 0), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(film.rgb(1, 0), Vec3::new(0.0, 1.0, 0.0));
    }
}
