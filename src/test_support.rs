//! ユニットテスト用の小さなシーン群。

use crate::camera::Camera;
use crate::light::{Light, PointLight};
use crate::material::MaterialData;
use crate::math::{Vec2, Vec3, Vec4};
use crate::mesh::{Mesh, Triangle};
use crate::scene::Scene;

pub fn quad(corners: [Vec3; 4], normal: Vec3) -> [Triangle; 2] {
    let normals = [normal; 3];
    let texture_coords = [Vec2::ZERO; 3];
    [
        Triangle {
            positions: [corners[0], corners[1], corners[2]],
            normals,
            texture_coords,
        },
        Triangle {
            positions: [corners[0], corners[2], corners[3]],
            normals,
            texture_coords,
        },
    ]
}

pub fn small_camera(width: u32, height: u32) -> Camera {
    Camera::new(
        width,
        height,
        45.0,
        0.032,
        Vec3::new(0.0, 0.0, 0.9),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 1.0, 0.0),
    )
}

/// 2x2x2 の閉じた箱（内向き法線の拡散壁）。マテリアルだけでライトは付けない。
pub fn closed_box_walls(scene: &mut Scene) {
    let diffuse = scene.add_material(MaterialData {
        base_color_factor: Vec4::new(0.75, 0.75, 0.75, 1.0),
        metallic_factor: 0.0,
        roughness_factor: 1.0,
        ..Default::default()
    });

    let h = 1.0;
    let walls: [([Vec3; 4], Vec3); 6] = [
        // 床 (y = -1)
        (
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(h, -h, -h),
                Vec3::new(h, -h, h),
                Vec3::new(-h, -h, h),
            ],
            Vec3::new(0.0, 1.0, 0.0),
        ),
        // 天井 (y = 1)
        (
            [
                Vec3::new(-h, h, -h),
                Vec3::new(-h, h, h),
                Vec3::new(h, h, h),
                Vec3::new(h, h, -h),
            ],
            Vec3::new(0.0, -1.0, 0.0),
        ),
        // 奥 (z = -1)
        (
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(-h, h, -h),
                Vec3::new(h, h, -h),
                Vec3::new(h, -h, -h),
            ],
            Vec3::new(0.0, 0.0, 1.0),
        ),
        // 手前 (z = 1)
        (
            [
                Vec3::new(-h, -h, h),
                Vec3::new(h, -h, h),
                Vec3::new(h, h, h),
                Vec3::new(-h, h, h),
            ],
            Vec3::new(0.0, 0.0, -1.0),
        ),
        // 左 (x = -1)
        (
            [
                Vec3::new(-h, -h, -h),
                Vec3::new(-h, -h, h),
                Vec3::new(-h, h, h),
                Vec3::new(-h, h, -h),
            ],
            Vec3::new(1.0, 0.0, 0.0),
        ),
        // 右 (x = 1)
        (
            [
                Vec3::new(h, -h, -h),
                Vec3::new(h, h, -h),
                Vec3::new(h, h, h),
                Vec3::new(h, -h, h),
            ],
            Vec3::new(-1.0, 0.0, 0.0),
        ),
    ];

    let mut mesh = Mesh::default();
    mesh.name = "box".to_string();
    for (corners, normal) in walls {
        for triangle in quad(corners, normal) {
            mesh.push_triangle(triangle);
        }
    }
    let count = mesh.triangles.len();
    mesh.add_primitive(0, count, Some(diffuse));
    scene.meshes.push(mesh);
}

/// 閉じた箱 + 中央上寄りの点光源。
pub fn closed_box_scene() -> Scene {
    let mut scene = Scene::new(small_camera(64, 48));
    closed_box_walls(&mut scene);
    scene.lights.push(Light::Point(PointLight {
        position: Vec3::new(0.0, 0.5, 0.0),
        wattage: Vec3::splat(100.0),
    }));
    scene
}

/// 閉じた箱 + 天井の発光パネル（メッシュライト）。MLT は発光ジオメトリに
/// 当たるパスしか初期化できないので、MLT のテストはこちらを使う。
pub fn emissive_box_scene() -> Scene {
    let mut scene = Scene::new(small_camera(32, 24));
    closed_box_walls(&mut scene);

    let emissive = scene.add_material(MaterialData {
        base_color_factor: Vec4::new(0.1, 0.1, 0.1, 1.0),
        metallic_factor: 0.0,
        roughness_factor: 1.0,
        emissive_factor: Vec3::ONE,
        emissive_strength: 3.0,
        ..Default::default()
    });

    let mut panel = Mesh::default();
    panel.name = "panel".to_string();
    for triangle in quad(
        [
            Vec3::new(-0.5, 0.99, -0.5),
            Vec3::new(-0.5, 0.99, 0.5),
            Vec3::new(0.5, 0.99, 0.5),
            Vec3::new(0.5, 0.99, -0.5),
        ],
        Vec3::new(0.0, -1.0, 0.0),
    ) {
        panel.push_triangle(triangle);
    }
    panel.add_primitive(0, 2, Some(emissive));

    let mesh_idx = scene.meshes.len();
    scene.meshes.push(panel);
    scene.lights.push(Light::Mesh(crate::light::MeshLight {
        mesh_idx,
        primitive_idx: 0,
    }));

    scene
}
