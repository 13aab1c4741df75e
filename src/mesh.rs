//! Triangle meshes and their primitives (contiguous triangle ranges sharing a
//! material, each with a private BVH).

use rand::distributions::{Distribution, WeightedIndex};

use crate::bvh::Bvh;
use crate::math::{Vec2, Vec3};
use crate::rng::Pcg32;

#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
    pub texture_coords: [Vec2; 3],
}

impl Triangle {
    pub fn compute_area(&self) -> f32 {
        let edge1 = self.positions[1] - self.positions[0];
        let edge2 = self.positions[2] - self.positions[0];
        edge1.cross(edge2).length()
    }
}

pub struct Primitive {
    pub start_idx: usize,
    pub count: usize,
    pub material_idx: Option<usize>,
    pub bvh: Bvh,
    pub total_area: f32,
}

#[derive(Default)]
pub struct Mesh {
    pub name: String,
    pub triangles: Vec<Triangle>,
    pub primitives: Vec<Primitive>,
    pub triangle_areas: Vec<f32>,
    /// 面積で重み付けした三角形分布（プリミティブごと、メッシュライトの発光点選択用）。
    pub primitive_triangle_distributions: Vec<Option<WeightedIndex<f32>>>,
}

impl Mesh {
    /// トライアングルと面積を対で積む。`add_primitive` より前に呼ぶこと。
    pub fn push_triangle(&mut self, triangle: Triangle) {
        let area = triangle.compute_area();
        self.triangles.push(triangle);
        self.triangle_areas.push(area);
    }

    pub fn add_primitive(&mut self, start_idx: usize, count: usize, material_idx: Option<usize>) {
        let bvh = Bvh::new(&self.triangles, start_idx, count);
        let areas = &self.triangle_areas[start_idx..start_idx + count];
        let total_area = areas.iter().sum();
        self.primitive_triangle_distributions
            .push(WeightedIndex::new(areas.iter().copied()).ok());
        self.primitives.push(Primitive {
            start_idx,
            count,
            material_idx,
            bvh,
            total_area,
        });
    }

    /// 面積に比例して三角形を選ぶ。返り値はメッシュ内のトライアングルインデックス。
    pub fn sample_triangle(&self, primitive_idx: usize, rng: &mut Pcg32) -> usize {
        let primitive = &self.primitives[primitive_idx];
        match &self.primitive_triangle_distributions[primitive_idx] {
            Some(distribution) => primitive.start_idx + distribution.sample(rng),
            // 全トライアングルが退化（面積ゼロ）の場合は一様に選ぶ
            None => primitive.start_idx + (rng.next_u32() as usize) % primitive.count.max(1),
        }
    }
}
