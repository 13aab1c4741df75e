//! Metropolis light transport in the style of Veach & Guibas (1997).
//!
//! ワーカーごとに独立なマルコフ連鎖（[`MltProcess`]）を走らせ、受理確率で
//! 重み付けしたヒストグラムを蓄積する。絶対輝度は新規パス試行の平均
//! ロシアンルーレット輝度から推定したスケールで合わせる。

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::info;
use rand::Rng as _;
use rand::distributions::{Distribution, WeightedIndex};

use crate::distribution::{ClippedGeometric, TwoSidedClippedGeometric};
use crate::film::Film;
use crate::math::{EPSILON, Ray, Vec2, Vec3, luminance};
use crate::path::{
    self, BounceType, EvaluationResult, MAX_LENGTH, Path, Vertex,
};
use crate::renderer::Renderer;
use crate::rng::{Pcg32, splitmix64};
use crate::scene::Scene;
use crate::threadpool::WorkerPool;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnabledMutations {
    pub new_path_mutation: bool,
    pub lens_perturbation: bool,
    pub multi_chain_perturbation: bool,
    pub bidirectional_mutation: bool,
}

impl EnabledMutations {
    pub const ALL: Self = Self {
        new_path_mutation: true,
        lens_perturbation: true,
        multi_chain_perturbation: true,
        bidirectional_mutation: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum MutationKind {
    NewPath,
    Lens,
    MultiChain,
    Bidirectional,
}

/// 連鎖の現在状態: 受理済みのパスとそのピクセル・評価値。
#[derive(Clone, Debug)]
struct State {
    path: Path,
    pixel: Vec2,
    evaluation: EvaluationResult,
}

#[derive(Clone, Debug)]
struct MutationInfo {
    proposal: State,
    acceptance: f32,
    #[allow(dead_code)]
    kind: MutationKind,
}

// --- 補助関数 ---------------------------------------------------------------

fn clamp_pixel(pixel: Vec2, film: &Film) -> (usize, usize) {
    let x = (pixel.x as i64).clamp(0, film.width() as i64 - 1) as usize;
    let y = (pixel.y as i64).clamp(0, film.height() as i64 - 1) as usize;
    (x, y)
}

fn random_eye_ray(scene: &Scene, rng: &mut Pcg32) -> (Vec2, Ray) {
    let pixel = Vec2::new(
        rng.next_f32() * scene.camera.width as f32,
        rng.next_f32() * scene.camera.height as f32,
    );
    (pixel, scene.camera.eye_ray(pixel))
}

/// 半径が [r1, r2] の対数一様・角度一様なフィルム面オフセット。
fn pixel_offset(r1: f32, r2: f32, rng: &mut Pcg32) -> Vec2 {
    let phi = rng.next_f32() * 2.0 * PI;
    let r = r2 * (-(r2 / r1).ln() * rng.next_f32()).exp();
    Vec2::new(r * phi.cos(), r * phi.sin())
}

/// 方向 `dir` を角度 [theta1, theta2] の対数一様オフセットで摂動する
/// （θ ≈ sinθ の近似）。
fn offset_bounce_direction(theta1: f32, theta2: f32, dir: Vec3, rng: &mut Pcg32) -> Vec3 {
    let u = if dir.x.abs() < 0.5 {
        dir.cross(Vec3::new(1.0, 0.0, 0.0))
    } else {
        dir.cross(Vec3::new(0.0, 1.0, 0.0))
    }
    .normalized();
    let v = u.cross(dir);
    let phi = rng.next_f32() * 2.0 * PI;
    let r = theta2 * (-(theta2 / theta1).ln() * rng.next_f32()).exp();
    (dir + r * phi.cos() * u + r * phi.sin() * v).normalized()
}

/// a, b は明示的接続の両端。
fn inv_geometry_term(a: &Vertex, b: &Vertex) -> f32 {
    let mut a_to_b = b.position - (a.position + EPSILON * a.geometric_normal);
    let d2 = a_to_b.length_squared();
    a_to_b /= d2.sqrt();
    let cos1 = a.normal.dot(a_to_b).max(0.0);
    let cos2 = b.normal.dot(-a_to_b).max(0.0);
    d2 / (cos1 * cos2)
}

/// MH 受理確率。比が NaN（両輝度ゼロ等）のときは 1 に倒れる。
fn acceptance_probability(ratio: f32) -> f32 {
    ratio.min(1.0).max(0.0)
}

// --- ワーカーごとの連鎖 -------------------------------------------------------

pub struct MltProcess {
    accumulation_buffer: Film,
    accumulated_luminance: f32,
    num_new_path_mutations: u32,
    average_samples_per_pixel: f32,
    current_state: Option<State>,
    mutation_distribution: Option<WeightedIndex<f32>>,
    rng: Pcg32,
}

impl MltProcess {
    pub fn new(config: &EnabledMutations, width: usize, height: usize, seed: u64) -> Self {
        let weights = [
            config.new_path_mutation as u8 as f32,
            config.lens_perturbation as u8 as f32,
            config.multi_chain_perturbation as u8 as f32,
            config.bidirectional_mutation as u8 as f32,
        ];
        Self {
            accumulation_buffer: Film::new(width, height, 3),
            accumulated_luminance: 0.0,
            num_new_path_mutations: 0,
            average_samples_per_pixel: 0.0,
            current_state: None,
            // 全ミューテーション無効なら提案は常に棄却扱い
            mutation_distribution: WeightedIndex::new(weights).ok(),
            rng: Pcg32::new(seed),
        }
    }

    pub fn accumulation_buffer(&self) -> &Film {
        &self.accumulation_buffer
    }

    pub fn accumulated_luminance(&self) -> f32 {
        self.accumulated_luminance
    }

    pub fn num_new_path_mutations(&self) -> u32 {
        self.num_new_path_mutations
    }

    pub fn average_samples_per_pixel(&self) -> f32 {
        self.average_samples_per_pixel
    }

    pub fn reset(&mut self) {
        self.accumulation_buffer.clear();
        self.accumulated_luminance = 0.0;
        self.num_new_path_mutations = 0;
        self.average_samples_per_pixel = 0.0;
        self.current_state = None;
    }

    /// 双方向ミューテーション: 現在のパスから部分パスを削除し、新しく生成した
    /// 部分パスで置き換える。パスはカメラ側からしか生成しないので Veach &
    /// Guibas の定式化とは細部が異なるが、趣旨は同じ。
    fn bidirectional_mutation(&mut self, scene: &Scene) -> Option<MutationInfo> {
        let (current_path, current_pixel, current_radiance) = {
            let state = self.current_state.as_ref()?;
            (state.path.clone(), state.pixel, state.evaluation.radiance)
        };

        let mut clipped_geo_dist = ClippedGeometric::new(0.5);
        let mut two_sided_geo_dist = TwoSidedClippedGeometric::new(0.5);

        let current_length = current_path.length() as i32;
        clipped_geo_dist.set_parameters(current_length - 1);
        let deleted_length = clipped_geo_dist.sample(&mut self.rng);

        // 頂点 (s, s+deleted] を削除する
        let s = self.rng.gen_range(0..=(current_length - deleted_length - 1)) as usize;
        let t = s + deleted_length as usize + 1;

        // 接尾部を丸ごと消すのでなければ、その先頭が拡散頂点でないと
        // 明示的接続を張れない
        if (t as i32) < current_length
            && current_path.vertex(t).bounce_type != BounceType::Diffuse
        {
            return None;
        }

        let mut max_added_length = MAX_LENGTH as i32 - current_length + deleted_length;
        let min_added_length = 0;
        two_sided_geo_dist.set_parameters(min_added_length, deleted_length, max_added_length);
        let added_length = two_sided_geo_dist.sample(&mut self.rng);

        let mut proposal = State {
            path: Path::from_vertex(*current_path.vertex(0)),
            pixel: current_pixel,
            evaluation: EvaluationResult::default(),
        };

        let mut txy = 1.0f32;
        let mut tyx = 1.0f32;

        proposal.path.append(current_path.slice(1, s + 1));

        let mut ray;
        if s == 0 {
            // 削除が視線の最初の接点から始まるなら、視線自体を引き直す
            let (pixel, new_ray) = random_eye_ray(scene, &mut self.rng);
            ray = new_ray;
            proposal.pixel = pixel;
        } else {
            // 頂点 s のマテリアルに従って新しい方向へ出直す
            let current_vertex = *proposal.path.last();
            let in_dir = current_vertex.position - proposal.path.vertex(s - 1).position;
            let material = scene.get_material(current_vertex.material_idx);
            let (new_ray, bounce_type) =
                material.sample_direction(-in_dir, &current_vertex, &mut self.rng);
            ray = new_ray;
            proposal.path.last_mut().bounce_type = bounce_type;
        }

        for _ in 0..added_length {
            ray = proposal.path.add_bounce(scene, &ray, None, &mut self.rng)?;
        }

        // 接尾部が残っているなら元のパスへ接続し直す
        if (t as i32) < current_length {
            if proposal.path.last().bounce_type != BounceType::Diffuse {
                return None;
            }
            if !path::has_visibility(scene, proposal.path.last(), current_path.vertex(t)) {
                return None;
            }
            if proposal.path.length() > 1 {
                tyx *= PI * inv_geometry_term(proposal.path.last(), current_path.vertex(t));
            }
            if t > 1 {
                txy *= PI * inv_geometry_term(current_path.vertex(t - 1), current_path.vertex(t));
            }
            proposal
                .path
                .append(current_path.slice(t, current_length as usize));
        }

        // pd: この削除を選ぶ確率、pa: この追加を選ぶ確率
        let pd = clipped_geo_dist.pdf(deleted_length) / (current_length - deleted_length) as f32;
        let pa = two_sided_geo_dist.pdf(added_length);
        tyx *= pd * pa;

        let new_length = current_length + added_length - deleted_length;
        clipped_geo_dist.set_parameters(new_length - 1);

        max_added_length = MAX_LENGTH as i32 - new_length + added_length;
        two_sided_geo_dist.set_parameters(min_added_length, added_length, max_added_length);

        let pd = clipped_geo_dist.pdf(added_length) / (current_length - added_length) as f32;
        let pa = two_sided_geo_dist.pdf(deleted_length);
        txy *= pd * pa;

        proposal.evaluation = path::evaluate(scene, proposal.path.as_slice());
        let current_luminance = luminance(current_radiance);
        let proposal_luminance = luminance(proposal.evaluation.radiance);
        let acceptance =
            acceptance_probability((proposal_luminance * txy) / (current_luminance * tyx));
        Some(MutationInfo {
            proposal,
            acceptance,
            kind: MutationKind::Bidirectional,
        })
    }

    /// レンズ / マルチチェーン摂動: フィルム上の位置を少しずらし、元のパスと
    /// 同じバウンス列を辿り直して拡散頂点で元のパスへ接続する。multi_chain
    /// では拡散頂点の先が鏡面でも、出射方向を摂動して追跡を続ける。
    fn eye_path_perturbation(&mut self, scene: &Scene, multi_chain: bool) -> Option<MutationInfo> {
        let (current_path, current_pixel, current_radiance) = {
            let state = self.current_state.as_ref()?;
            (state.path.clone(), state.pixel, state.evaluation.radiance)
        };

        let width = self.accumulation_buffer.width();
        let height = self.accumulation_buffer.height();
        let new_pixel = current_pixel + pixel_offset(0.1, 0.1 * width as f32, &mut self.rng);
        if new_pixel.x > width as f32
            || new_pixel.x < 0.0
            || new_pixel.y > height as f32
            || new_pixel.y < 0.0
        {
            return None;
        }

        let mut next_ray = scene.camera.eye_ray(new_pixel);

        let kind = if multi_chain {
            MutationKind::MultiChain
        } else {
            MutationKind::Lens
        };
        let mut proposal = State {
            path: Path::from_vertex(Vertex {
                bounce_type: BounceType::None,
                position: next_ray.origin,
                ..Default::default()
            }),
            pixel: new_pixel,
            evaluation: EvaluationResult::default(),
        };

        let mut txy = 1.0f32;
        let mut tyx = 1.0f32;

        for i in 1..current_path.length() {
            let current_vertex = *current_path.vertex(i);
            next_ray = proposal.path.add_bounce(scene, &next_ray, None, &mut self.rng)?;

            // バウンス列が一致しなければ棄却
            if proposal.path.last().bounce_type != current_vertex.bounce_type {
                return None;
            }

            if current_vertex.bounce_type == BounceType::Diffuse {
                if i == current_path.length() - 1 {
                    return Some(MutationInfo {
                        proposal,
                        acceptance: 0.0,
                        kind,
                    });
                }

                let next_vertex = *current_path.vertex(i + 1);

                if next_vertex.bounce_type != BounceType::Diffuse {
                    if !multi_chain {
                        return None;
                    }
                    // マルチチェーン: 出射方向を摂動して追跡を続ける
                    let original_direction = next_vertex.position - current_vertex.position;
                    next_ray.direction =
                        offset_bounce_direction(0.0001, 0.1, original_direction, &mut self.rng);
                    txy *= original_direction.dot(current_vertex.normal).max(0.0);
                    tyx *= next_ray.direction.dot(current_vertex.normal).max(0.0);
                    continue;
                }

                if !path::has_visibility(scene, proposal.path.last(), &next_vertex) {
                    return None;
                }

                txy *= inv_geometry_term(&current_vertex, &next_vertex);
                tyx *= inv_geometry_term(proposal.path.last(), &next_vertex);

                proposal
                    .path
                    .append(current_path.slice(i + 1, current_path.length()));
                break;
            }
        }

        proposal.evaluation = path::evaluate(scene, proposal.path.as_slice());
        let current_luminance = luminance(current_radiance);
        let proposal_luminance = luminance(proposal.evaluation.radiance);

        let acceptance =
            acceptance_probability((proposal_luminance * txy) / (current_luminance * tyx));
        Some(MutationInfo {
            proposal,
            acceptance,
            kind,
        })
    }

    /// 新規パスミューテーション: 現在のパスと独立に新しいパスを引く。
    /// 試行回数と累積輝度は画像の明るさ推定（スケール係数）に使う。
    fn compute_new_path_mutation(&mut self, scene: &Scene) -> Option<MutationInfo> {
        let current_rr_radiance = self
            .current_state
            .as_ref()?
            .evaluation
            .russian_roulette_radiance;

        let (pixel, new_ray) = random_eye_ray(scene, &mut self.rng);
        let proposal_path = Path::create_random_eye_path(scene, new_ray, &mut self.rng);
        if proposal_path.length() <= 1 {
            self.num_new_path_mutations += 1;
            return None;
        }

        let evaluation = path::evaluate(scene, proposal_path.as_slice());
        let current_luminance = luminance(current_rr_radiance);
        let proposal_luminance = luminance(evaluation.russian_roulette_radiance);

        self.num_new_path_mutations += 1;
        self.accumulated_luminance += proposal_luminance;

        let acceptance = acceptance_probability(proposal_luminance / current_luminance);
        Some(MutationInfo {
            proposal: State {
                path: proposal_path,
                pixel,
                evaluation,
            },
            acceptance,
            kind: MutationKind::NewPath,
        })
    }

    fn compute_random_mutation(&mut self, scene: &Scene) -> Option<MutationInfo> {
        let kind = match &self.mutation_distribution {
            Some(distribution) => distribution.sample(&mut self.rng),
            None => return None,
        };
        match kind {
            0 => self.compute_new_path_mutation(scene),
            1 => self.eye_path_perturbation(scene, false),
            2 => self.eye_path_perturbation(scene, true),
            _ => self.bidirectional_mutation(scene),
        }
    }

    pub fn accumulate(&mut self, scene: &Scene, num_mutations: usize, is_stopping: &AtomicBool) {
        // 輝度が非ゼロの初期状態が見つかるまで引き直す
        while !is_stopping.load(Ordering::Relaxed) && self.current_state.is_none() {
            let (pixel, ray) = random_eye_ray(scene, &mut self.rng);
            let path = Path::create_random_eye_path(scene, ray, &mut self.rng);
            let evaluation = path::evaluate(scene, path.as_slice());
            if luminance(evaluation.radiance) > EPSILON {
                self.current_state = Some(State {
                    path,
                    pixel,
                    evaluation,
                });
            }
        }

        for _ in 0..num_mutations {
            if is_stopping.load(Ordering::Relaxed) {
                break;
            }
            let Some((current_color, x, y)) = self.current_state.as_ref().map(|state| {
                let color = state.evaluation.radiance / luminance(state.evaluation.radiance);
                let (x, y) = clamp_pixel(state.pixel, &self.accumulation_buffer);
                (color, x, y)
            }) else {
                break;
            };

            let Some(info) = self.compute_random_mutation(scene) else {
                // 提案なし: 自己遷移として現在の色を足す
                self.accumulation_buffer.add_rgb(x, y, current_color);
                continue;
            };

            let mut new_color = info.proposal.evaluation.radiance;
            let new_luminance = luminance(new_color);
            if new_luminance < EPSILON {
                self.accumulation_buffer.add_rgb(x, y, current_color);
                continue;
            }
            new_color /= new_luminance;

            let (new_x, new_y) = clamp_pixel(info.proposal.pixel, &self.accumulation_buffer);

            self.accumulation_buffer
                .add_rgb(x, y, current_color * (1.0 - info.acceptance));
            self.accumulation_buffer
                .add_rgb(new_x, new_y, new_color * info.acceptance);

            if self.rng.next_f32() < info.acceptance {
                self.current_state = Some(info.proposal);
            }
        }

        let num_pixels = self.accumulation_buffer.width() * self.accumulation_buffer.height();
        self.average_samples_per_pixel += num_mutations as f32 / num_pixels as f32;
    }
}

// --- レンダラ本体 ------------------------------------------------------------

pub struct Mlt {
    config: EnabledMutations,
    width: usize,
    height: usize,
    processes: Vec<Arc<Mutex<MltProcess>>>,
    average_samples_per_pixel: AtomicU32,
    is_stopping: Arc<AtomicBool>,
}

impl Mlt {
    pub fn new(config: &EnabledMutations, width: usize, height: usize, num_processes: usize) -> Self {
        let seed = {
            use rand::RngCore as _;
            Pcg32::from_entropy().next_u64()
        };
        Self::with_seed(config, width, height, num_processes, seed)
    }

    /// 決定的なシードで構築する（テスト・再現用）。
    pub fn with_seed(
        config: &EnabledMutations,
        width: usize,
        height: usize,
        num_processes: usize,
        seed: u64,
    ) -> Self {
        if config.new_path_mutation {
            info!("New path mutations enabled");
        }
        if config.lens_perturbation {
            info!("Lens perturbations enabled");
        }
        if config.multi_chain_perturbation {
            info!("Multi-chain perturbations enabled");
        }
        if config.bidirectional_mutation {
            info!("Bidirectional mutations enabled");
        }
        let num_processes = num_processes.max(1);
        let processes = (0..num_processes)
            .map(|i| {
                Arc::new(Mutex::new(MltProcess::new(
                    config,
                    width,
                    height,
                    splitmix64(seed ^ (i as u64).wrapping_mul(0xA24BAED4963EE407)),
                )))
            })
            .collect();
        Self {
            config: *config,
            width,
            height,
            processes,
            average_samples_per_pixel: AtomicU32::new(0),
            is_stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &EnabledMutations {
        &self.config
    }

    /// ヒストグラムを画像に近づけるためのスケール係数。新規パス試行の平均
    /// ロシアンルーレット輝度を、ピクセルあたりの平均ミューテーション数で
    /// 割ったもの。試行が無い場合は 0 を返す（ゼロ除算を避ける）。
    fn compute_scale_factor(&self) -> f32 {
        let mut total_accumulated_luminance = 0.0f32;
        let mut total_num_new_path_mutations = 0u64;
        for process in &self.processes {
            let process = process.lock().unwrap();
            total_accumulated_luminance += process.accumulated_luminance();
            total_num_new_path_mutations += process.num_new_path_mutations() as u64;
        }
        let average_samples_per_pixel = self.average_samples_per_pixel.load(Ordering::Relaxed);
        if total_num_new_path_mutations == 0 || average_samples_per_pixel == 0 {
            return 0.0;
        }
        (total_accumulated_luminance / total_num_new_path_mutations as f32)
            / average_samples_per_pixel as f32
    }
}

impl Renderer for Mlt {
    fn accumulate(&self, scene: &Arc<Scene>, num_samples: u32, pool: Option<&WorkerPool>) {
        let num_mutations_per_process =
            num_samples as usize * self.width * self.height / self.processes.len();
        if let Some(pool) = pool {
            for process in &self.processes {
                let process = Arc::clone(process);
                let scene = Arc::clone(scene);
                let is_stopping = Arc::clone(&self.is_stopping);
                pool.assign_work(move || {
                    process
                        .lock()
                        .unwrap()
                        .accumulate(&scene, num_mutations_per_process, &is_stopping);
                });
            }
            pool.wait();
        } else {
            for process in &self.processes {
                process
                    .lock()
                    .unwrap()
                    .accumulate(scene, num_mutations_per_process, &self.is_stopping);
            }
        }
        self.average_samples_per_pixel
            .fetch_add(num_samples, Ordering::Relaxed);
    }

    fn update_frame_buffer(&self, frame_buffer: &mut Film) {
        frame_buffer.clear();
        // 各プロセスの蓄積バッファをスケールを掛けて合算する
        let scale_factor = self.compute_scale_factor();
        for process in &self.processes {
            let process = process.lock().unwrap();
            for y in 0..frame_buffer.height() {
                for x in 0..frame_buffer.width() {
                    frame_buffer.add_rgb(
                        x,
                        y,
                        process.accumulation_buffer().rgb(x, y) * scale_factor,
                    );
                }
            }
        }
        // 最後に表示用の補正
        for y in 0..frame_buffer.height() {
            for x in 0..frame_buffer.width() {
                frame_buffer.set_rgb(x, y, Film::apply_correction(frame_buffer.rgb(x, y)));
            }
        }
    }

    fn num_samples_per_pixel(&self) -> u32 {
        self.average_samples_per_pixel.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.is_stopping.store(false, Ordering::Relaxed);
        for process in &self.processes {
            process.lock().unwrap().reset();
        }
        self.average_samples_per_pixel.store(0, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.is_stopping.store(true, Ordering::Relaxed);
    }

    fn is_stopping(&self) -> bool {
        self.is_stopping.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_tracer::PathTracer;
    use crate::test_support;

    #[test]
    fn empty_scene_yields_zero_image_without_nans() {
        let scene = Arc::new(Scene::new(test_support::small_camera(16, 12)));
        let mlt = Mlt::with_seed(&EnabledMutations::ALL, 16, 12, 1, 5);
        // 空シーンでは初期化が終わらないので、停止フラグで抜ける
        mlt.stop();
        mlt.accumulate(&scene, 1, None);
        mlt.reset();

        let mut frame = Film::new(16, 12, 3);
        mlt.update_frame_buffer(&mut frame);
        for &v in frame.pixels() {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn scale_factor_is_guarded_without_new_path_mutations() {
        let config = EnabledMutations {
            lens_perturbation: true,
            ..Default::default()
        };
        let scene = Arc::new(test_support::emissive_box_scene());
        let mlt = Mlt::with_seed(&config, 32, 24, 1, 11);
        mlt.accumulate(&scene, 1, None);
        // 新規パス試行がゼロでもスケールは 0 に落ちるだけ
        let mut frame = Film::new(32, 24, 3);
        mlt.update_frame_buffer(&mut frame);
        assert!(frame.pixels().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn acceptance_stays_in_unit_interval() {
        let scene = test_support::emissive_box_scene();
        let mut process = MltProcess::new(&EnabledMutations::ALL, 32, 24, 42);
        let is_stopping = AtomicBool::new(false);
        // 初期化だけ走らせる
        process.accumulate(&scene, 0, &is_stopping);
        assert!(process.current_state.is_some());

        let mut proposals = 0;
        let mut seen_kinds = std::collections::HashSet::new();
        for _ in 0..5000 {
            if let Some(info) = process.compute_random_mutation(&scene) {
                assert!(
                    (0.0..=1.0).contains(&info.acceptance),
                    "acceptance = {}",
                    info.acceptance
                );
                proposals += 1;
                seen_kinds.insert(info.kind);
                // 受理して連鎖を進める（状態が変わるほど色々な提案を踏む）
                if info.acceptance > 0.5 {
                    process.current_state = Some(info.proposal);
                }
            }
        }
        assert!(proposals > 100);
        // 少なくとも新規パスと何らかの摂動は提案されている
        assert!(seen_kinds.contains(&MutationKind::NewPath));
        assert!(seen_kinds.len() >= 2, "kinds = {:?}", seen_kinds);
    }

    #[test]
    fn chain_accumulates_unit_luminance_per_mutation() {
        let scene = test_support::emissive_box_scene();
        let mut process = MltProcess::new(&EnabledMutations::ALL, 32, 24, 77);
        let is_stopping = AtomicBool::new(false);
        const MUTATIONS: usize = 2000;
        process.accumulate(&scene, MUTATIONS, &is_stopping);

        // 1 ミューテーションにつき合計 1 の輝度をヒストグラムへ足している
        let mut total = 0.0f64;
        for &v in process.accumulation_buffer().pixels() {
            assert!(v.is_finite() && v >= 0.0);
        }
        for y in 0..24 {
            for x in 0..32 {
                total += luminance(process.accumulation_buffer().rgb(x, y)) as f64;
            }
        }
        let per_mutation = total / MUTATIONS as f64;
        assert!(
            (per_mutation - 1.0).abs() < 0.05,
            "per-mutation luminance = {}",
            per_mutation
        );
    }

    #[test]
    fn deterministic_with_fixed_seed_and_one_process() {
        let scene = Arc::new(test_support::emissive_box_scene());
        let run = || {
            let mlt = Mlt::with_seed(&EnabledMutations::ALL, 32, 24, 1, 2024);
            mlt.accumulate(&scene, 2, None);
            mlt.accumulate(&scene, 2, None);
            let mut frame = Film::new(32, 24, 3);
            mlt.update_frame_buffer(&mut frame);
            frame
        };
        let a = run();
        let b = run();
        assert_eq!(a.pixels(), b.pixels());
    }

    #[test]
    fn new_path_only_mlt_roughly_matches_path_tracer_brightness() {
        let scene = Arc::new(test_support::emissive_box_scene());

        let tracer = PathTracer::new(32, 24);
        tracer.accumulate(&scene, 64, None);
        let mut pt_frame = Film::new(32, 24, 3);
        tracer.update_frame_buffer(&mut pt_frame);

        let config = EnabledMutations {
            new_path_mutation: true,
            ..Default::default()
        };
        let mlt = Mlt::with_seed(&config, 32, 24, 1, 7);
        // 32x24 で 300 spp 相当 ≈ 23 万ミューテーション
        for _ in 0..3 {
            mlt.accumulate(&scene, 100, None);
        }
        let mut mlt_frame = Film::new(32, 24, 3);
        mlt.update_frame_buffer(&mut mlt_frame);

        let mean = |frame: &Film| {
            let mut total = 0.0f64;
            for y in 0..frame.height() {
                for x in 0..frame.width() {
                    total += luminance(frame.rgb(x, y)) as f64;
                }
            }
            total / (frame.width() * frame.height()) as f64
        };

        let pt_mean = mean(&pt_frame);
        let mlt_mean = mean(&mlt_frame);
        assert!(pt_mean > 0.0 && mlt_mean > 0.0);
        let ratio = mlt_mean / pt_mean;
        assert!((0.6..=1.6).contains(&ratio), "ratio = {}", ratio);
    }
}
