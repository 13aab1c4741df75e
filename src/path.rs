//! Light-transport paths: construction by BSDF sampling with Russian
//! roulette, explicit light connections, and radiance evaluation.
//!
//! パスは固定長配列に積まれる転置バッファで、サンプルごとに作っては捨てる
//! （MLT はチェーン状態として保持する）。

use std::f32::consts::PI;

use crate::light::Light;
use crate::math::{Color, EPSILON, Ray, Vec2, Vec3};
use crate::rng::Pcg32;
use crate::scene::Scene;

pub const MAX_LENGTH: usize = 10;
pub const TERMINATION_PROBABILITY: f32 = 0.35826;

/// 頂点へどうやって到達したか。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionType {
    /// パスの始点（カメラまたは光源）。
    #[default]
    Origin,
    /// BSDF サンプリングで到達。
    Implicit,
    /// 選んだ点への決定的な接続で到達。
    Explicit,
}

/// 頂点から次へどう散乱したか。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BounceType {
    #[default]
    None,
    Diffuse,
    Reflective,
    Refractive,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Vertex {
    pub connection_type: ConnectionType,
    pub bounce_type: BounceType,
    pub position: Vec3,
    pub normal: Vec3,
    pub geometric_normal: Vec3,
    pub texture_coord: Vec2,
    pub material_idx: Option<usize>,
    /// Explicit 頂点のみ使用。
    pub light_idx: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Path {
    vertices: [Vertex; MAX_LENGTH],
    length: usize,
}

impl Default for Path {
    fn default() -> Self {
        Self::new()
    }
}

impl Path {
    pub fn new() -> Self {
        Self {
            vertices: [Vertex::default(); MAX_LENGTH],
            length: 0,
        }
    }

    pub fn from_vertex(vertex: Vertex) -> Self {
        let mut path = Self::new();
        path.vertices[0] = vertex;
        path.length = 1;
        path
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn vertex(&self, idx: usize) -> &Vertex {
        &self.vertices[idx]
    }

    pub fn last(&self) -> &Vertex {
        &self.vertices[self.length - 1]
    }

    pub fn last_mut(&mut self) -> &mut Vertex {
        &mut self.vertices[self.length - 1]
    }

    pub fn slice(&self, first: usize, last: usize) -> &[Vertex] {
        &self.vertices[first..last]
    }

    pub fn as_slice(&self) -> &[Vertex] {
        &self.vertices[..self.length]
    }

    pub fn append(&mut self, other: &[Vertex]) {
        debug_assert!(self.length + other.len() <= MAX_LENGTH);
        self.vertices[self.length..self.length + other.len()].copy_from_slice(other);
        self.length += other.len();
    }

    /// Creates a random path in the scene originating from `ray`.
    pub fn create_random_eye_path(scene: &Scene, mut ray: Ray, rng: &mut Pcg32) -> Self {
        let mut path = Self::from_vertex(Vertex {
            connection_type: ConnectionType::Origin,
            bounce_type: BounceType::None,
            position: ray.origin,
            ..Default::default()
        });

        while path.length < MAX_LENGTH {
            match path.add_bounce(scene, &ray, Some(TERMINATION_PROBABILITY), rng) {
                Some(next_ray) => ray = next_ray,
                None => return path,
            }
        }

        path
    }

    /// 光源上の 1 頂点からなるパス。光源が無ければ空パス。
    pub fn create_random_light_path(scene: &Scene, rng: &mut Pcg32) -> Self {
        let mut path = Self::new();
        if scene.lights.is_empty() {
            return path;
        }
        let light_idx = (rng.next_u32() as usize) % scene.lights.len();
        path.vertices[0] = choose_random_vertex_on_light(scene, light_idx, rng);
        path.length = 1;
        path
    }

    /// レイを飛ばして次の頂点を積み、続きのレイを返す。
    /// ミス、またはロシアンルーレット棄却で None。
    pub fn add_bounce(
        &mut self,
        scene: &Scene,
        in_ray: &Ray,
        termination_probability: Option<f32>,
        rng: &mut Pcg32,
    ) -> Option<Ray> {
        let mut hit = scene.intersect(in_ray, 0.0, f32::MAX)?;

        let material = scene.get_material(hit.material_idx);
        // 非屈折マテリアルの裏面ヒットでは法線を表へ返す
        if material.bounce_type() != BounceType::Refractive
            && in_ray.direction.dot(hit.geometric_normal) > 0.0
        {
            hit.normal = -hit.normal;
            hit.geometric_normal = -hit.geometric_normal;
        }

        self.vertices[self.length] = Vertex {
            connection_type: ConnectionType::Implicit,
            bounce_type: BounceType::None,
            position: hit.position,
            normal: hit.normal,
            geometric_normal: hit.geometric_normal,
            texture_coord: hit.texture_coord,
            material_idx: hit.material_idx,
            light_idx: None,
        };
        self.length += 1;

        if let Some(probability) = termination_probability {
            if rng.next_f32() < probability {
                return None;
            }
        }

        let (new_ray, bounce_type) =
            material.sample_direction(-in_ray.direction, self.last(), rng);
        self.last_mut().bounce_type = bounce_type;
        Some(new_ray)
    }
}

/// バリセントリック一様に三角形上の点を選ぶ。
fn choose_random_vertex_on_triangle(triangle: &crate::mesh::Triangle, rng: &mut Pcg32) -> Vertex {
    let sqrt_u1 = rng.next_f32().sqrt();
    let u2 = rng.next_f32();

    let alpha = 1.0 - sqrt_u1;
    let beta = (1.0 - u2) * sqrt_u1;
    let gamma = u2 * sqrt_u1;

    Vertex {
        connection_type: ConnectionType::Explicit,
        bounce_type: BounceType::None,
        position: triangle.positions[0] * alpha
            + triangle.positions[1] * beta
            + triangle.positions[2] * gamma,
        normal: (triangle.normals[0] * alpha
            + triangle.normals[1] * beta
            + triangle.normals[2] * gamma)
            .normalized(),
        geometric_normal: (triangle.positions[1] - triangle.positions[0])
            .cross(triangle.positions[2] - triangle.positions[0])
            .normalized(),
        texture_coord: triangle.texture_coords[0] * alpha
            + triangle.texture_coords[1] * beta
            + triangle.texture_coords[2] * gamma,
        material_idx: None,
        light_idx: None,
    }
}

fn choose_random_vertex_on_light(scene: &Scene, light_idx: usize, rng: &mut Pcg32) -> Vertex {
    match &scene.lights[light_idx] {
        Light::Point(light) => Vertex {
            connection_type: ConnectionType::Explicit,
            position: light.position,
            // 点光源に法線は無い（可視性判定はゼロ法線を許す）
            light_idx: Some(light_idx),
            ..Default::default()
        },
        Light::Mesh(light) => {
            let mesh = &scene.meshes[light.mesh_idx];
            let primitive = &mesh.primitives[light.primitive_idx];
            let triangle_idx = mesh.sample_triangle(light.primitive_idx, rng);
            let mut vertex = choose_random_vertex_on_triangle(&mesh.triangles[triangle_idx], rng);
            vertex.material_idx = primitive.material_idx;
            vertex.light_idx = Some(light_idx);
            vertex
        }
    }
}

/// 2 頂点間の可視性。両端の法線の向きが合っていない場合も不可視扱い。
pub fn has_visibility(scene: &Scene, v1: &Vertex, v2: &Vertex) -> bool {
    let origin = v1.position + v1.geometric_normal * EPSILON;
    let mut dir = v2.position - origin;
    let dist = dir.length();
    dir /= dist;
    if dir.dot(v1.normal) < EPSILON
        || (v2.normal.length_squared() > EPSILON && (-dir).dot(v2.normal) < EPSILON)
    {
        return false;
    }
    scene
        .intersect(&Ray::new(origin, dir), 0.0, dist - 2.0 * EPSILON)
        .is_none()
}

#[derive(Clone, Copy, Debug)]
pub struct EvaluationResult {
    /// The true radiance along some path.
    pub radiance: Color,
    /// The radiance scaled by inverse Russian roulette.
    pub russian_roulette_radiance: Color,
}

impl Default for EvaluationResult {
    fn default() -> Self {
        Self {
            radiance: Color::ONE,
            russian_roulette_radiance: Color::ONE,
        }
    }
}

pub fn evaluate_implicit(
    scene: &Scene,
    v1: &Vertex,
    v2: &Vertex,
    _v3: &Vertex,
) -> EvaluationResult {
    const CONTINUATION_PROBABILITY: f32 = 1.0 - TERMINATION_PROBABILITY;

    let material = scene.get_material(v2.material_idx);
    let radiance = material.expected_contribution(v2, v1.position - v2.position);

    EvaluationResult {
        radiance,
        russian_roulette_radiance: radiance / CONTINUATION_PROBABILITY,
    }
}

/// 終端の明示的ライト接続の寄与。点光源は 1/(4π)・wattage、メッシュライトは
/// 面積・放射・コサイン。一様な光源選択を打ち消すため光源数を掛ける。
pub fn evaluate_explicit_light(
    scene: &Scene,
    _x1: &Vertex,
    x2: &Vertex,
    light_vertex: &Vertex,
) -> Color {
    let Some(light_idx) = light_vertex.light_idx else {
        return Color::ZERO;
    };

    let light_dist = (light_vertex.position - x2.position).length();
    let out_dir = (light_vertex.position - x2.position).normalized();

    if !has_visibility(scene, x2, light_vertex) {
        return Color::ZERO;
    }

    let material = scene.get_material(x2.material_idx);

    let mut result = material.bsdf(x2);
    result /= light_dist * light_dist;
    result *= x2.normal.dot(out_dir).max(0.0);

    match &scene.lights[light_idx] {
        Light::Point(light) => {
            result *= 1.0 / (4.0 * PI);
            result *= light.wattage;
        }
        Light::Mesh(light) => {
            let primitive = &scene.meshes[light.mesh_idx].primitives[light.primitive_idx];
            let light_material = scene.get_material(light_vertex.material_idx);
            result *= light_vertex.normal.dot(-out_dir).max(0.0);
            result *= primitive.total_area;
            result *= light_material.emission(light_vertex);
        }
    }

    result *= scene.lights.len() as f32;

    result
}

/// パス中間の明示的接続 1 本分の係数。
pub fn evaluate_explicit(
    scene: &Scene,
    _x1: &Vertex,
    x2: &Vertex,
    _y1: &Vertex,
    y2: &Vertex,
) -> Color {
    let inv_dist = 1.0 / (y2.position - x2.position).length();
    let x2_to_y2 = (y2.position - x2.position).normalized();

    let material1 = scene.get_material(x2.material_idx);
    let material2 = scene.get_material(y2.material_idx);

    let mut result = material1.bsdf(x2);
    result *= material2.bsdf(x2);
    result *= inv_dist * inv_dist;

    result *= x2.normal.dot(x2_to_y2).max(0.0);
    result *= y2.normal.dot(-x2_to_y2).max(0.0);

    result
}

/// パス全体の放射輝度。乗算スループットを運びながら各頂点の発光と
/// 終端寄与を足し込む。
pub fn evaluate(scene: &Scene, path: &[Vertex]) -> EvaluationResult {
    let mut throughput = Color::ONE;
    let mut russian_roulette_throughput = Color::ONE;
    let mut result = EvaluationResult {
        radiance: Color::ZERO,
        russian_roulette_radiance: Color::ZERO,
    };

    let len = path.len();
    for i in 1..len.saturating_sub(1) {
        match path[i + 1].connection_type {
            ConnectionType::Implicit => {
                let implicit_evaluation = evaluate_implicit(scene, &path[i - 1], &path[i], &path[i + 1]);
                throughput *= implicit_evaluation.radiance;
                russian_roulette_throughput *= implicit_evaluation.russian_roulette_radiance;
                if i == len - 2 {
                    let material = scene.get_material(path[i + 1].material_idx);
                    let emission = material.emission(&path[i + 1]);
                    result.radiance += throughput * emission;
                    result.russian_roulette_radiance += russian_roulette_throughput * emission;
                }
            }
            ConnectionType::Explicit => {
                if i < len - 2 {
                    let explicit_evaluation =
                        evaluate_explicit(scene, &path[i - 1], &path[i], &path[i + 1], &path[i + 2]);
                    throughput *= explicit_evaluation;
                    russian_roulette_throughput *= explicit_evaluation;
                } else if path[i + 1].light_idx.is_some() {
                    let explicit_evaluation =
                        evaluate_explicit_light(scene, &path[i - 1], &path[i], &path[i + 1]);
                    result.radiance += throughput * explicit_evaluation;
                    result.russian_roulette_radiance +=
                        russian_roulette_throughput * explicit_evaluation;
                } else {
                    let material = scene.get_material(path[i + 1].material_idx);
                    let emission = material.emission(&path[i + 1]);
                    result.radiance += throughput * emission;
                    result.russian_roulette_radiance += russian_roulette_throughput * emission;
                }
            }
            ConnectionType::Origin => {}
        }

        let material = scene.get_material(path[i].material_idx);
        let emission = material.emission(&path[i]);
        result.radiance += throughput * emission;
        result.russian_roulette_radiance += russian_roulette_throughput * emission;
    }

    result
}
