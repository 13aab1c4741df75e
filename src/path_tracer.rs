//! Unidirectional path tracer: tiled accumulation over pixels with
//! progressive sample counts.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::film::Film;
use crate::math::{Color, Vec2};
use crate::path::{self, BounceType, Path};
use crate::renderer::Renderer;
use crate::rng::{Pcg32, splitmix64};
use crate::scene::Scene;
use crate::threadpool::WorkerPool;

const BLOCK_WIDTH: usize = 32;

pub struct PathTracer {
    accumulation_buffer: Arc<Mutex<Film>>,
    num_samples_per_pixel: AtomicU32,
    is_stopping: Arc<AtomicBool>,
    width: usize,
    height: usize,
}

impl PathTracer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            accumulation_buffer: Arc::new(Mutex::new(Film::new(width, height, 3))),
            num_samples_per_pixel: AtomicU32::new(0),
            is_stopping: Arc::new(AtomicBool::new(false)),
            width,
            height,
        }
    }
}

/// ブロック内の各ピクセルに `num_samples` サンプルを足す。
/// ピクセルごとの RNG は (エポック, 座標) から決定的にシードする。
fn accumulate_block(
    scene: &Scene,
    is_stopping: &AtomicBool,
    num_samples: u32,
    epoch: u32,
    x: usize,
    y: usize,
    block_width: usize,
    buffer: &Mutex<Film>,
    width: usize,
    height: usize,
) {
    let mut results: Vec<(usize, usize, Color)> = Vec::new();

    'block: for j in y..height.min(y + block_width) {
        for i in x..width.min(x + block_width) {
            let mut rng = Pcg32::new(splitmix64(
                ((epoch as u64) << 40) ^ ((j as u64) << 20) ^ i as u64,
            ));
            let mut radiance = Color::ZERO;
            for _ in 0..num_samples {
                if is_stopping.load(Ordering::Relaxed) {
                    break 'block;
                }
                let ray = scene.camera.eye_ray(Vec2::new(
                    i as f32 + rng.next_f32(),
                    j as f32 + rng.next_f32(),
                ));
                let eye_path = Path::create_random_eye_path(scene, ray, &mut rng);
                let light_path = Path::create_random_light_path(scene, &mut rng);

                let mut throughput = Color::ONE;
                for v in 1..eye_path.length() {
                    let prev_vertex = eye_path.vertex(v - 1);
                    let vertex = eye_path.vertex(v);

                    if v < eye_path.length() - 1 {
                        let implicit_evaluation = path::evaluate_implicit(
                            scene,
                            prev_vertex,
                            vertex,
                            eye_path.vertex(v + 1),
                        );
                        throughput *= implicit_evaluation.russian_roulette_radiance;
                    }

                    if vertex.bounce_type == BounceType::Diffuse && light_path.length() > 0 {
                        radiance += 0.5
                            * throughput
                            * path::evaluate_explicit_light(
                                scene,
                                prev_vertex,
                                vertex,
                                light_path.vertex(0),
                            );
                    }

                    let material = scene.get_material(vertex.material_idx);
                    radiance += 0.5 * throughput * material.emission(vertex);
                }
            }
            results.push((i, j, radiance));
        }
    }

    // タイル同士は互いに素なピクセル集合なので、短いロックでまとめて書く
    let mut buffer = buffer.lock().unwrap();
    for (i, j, radiance) in results {
        buffer.add_rgb(i, j, radiance);
    }
}

impl Renderer for PathTracer {
    fn accumulate(&self, scene: &Arc<Scene>, num_samples: u32, pool: Option<&WorkerPool>) {
        let epoch = self.num_samples_per_pixel.load(Ordering::Relaxed);
        if let Some(pool) = pool {
            let mut y = 0;
            while y < self.height {
                let mut x = 0;
                while x < self.width {
                    let scene = Arc::clone(scene);
                    let buffer = Arc::clone(&self.accumulation_buffer);
                    let is_stopping = Arc::clone(&self.is_stopping);
                    let (width, height) = (self.width, self.height);
                    pool.assign_work(move || {
                        accumulate_block(
                            &scene,
                            &is_stopping,
                            num_samples,
                            epoch,
                            x,
                            y,
                            BLOCK_WIDTH,
                            &buffer,
                            width,
                            height,
                        );
                    });
                    x += BLOCK_WIDTH;
                }
                y += BLOCK_WIDTH;
            }
            pool.wait();
        } else {
            accumulate_block(
                scene,
                &self.is_stopping,
                num_samples,
                epoch,
                0,
                0,
                self.width.max(self.height),
                &self.accumulation_buffer,
                self.width,
                self.height,
            );
        }

        self.num_samples_per_pixel
            .fetch_add(num_samples, Ordering::Relaxed);
    }

    fn update_frame_buffer(&self, frame_buffer: &mut Film) {
        let num_samples = self.num_samples_per_pixel.load(Ordering::Relaxed);
        if num_samples == 0 {
            frame_buffer.clear();
            return;
        }
        let inv_samples = 1.0 / num_samples as f32;
        let buffer = self.accumulation_buffer.lock().unwrap();
        for y in 0..frame_buffer.height() {
            for x in 0..frame_buffer.width() {
                frame_buffer.set_rgb(x, y, Film::apply_correction(buffer.rgb(x, y) * inv_samples));
            }
        }
    }

    fn num_samples_per_pixel(&self) -> u32 {
        self.num_samples_per_pixel.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.is_stopping.store(false, Ordering::Relaxed);
        self.accumulation_buffer.lock().unwrap().clear();
        self.num_samples_per_pixel.store(0, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.is_stopping.store(true, Ordering::Relaxed);
    }

    fn is_stopping(&self) -> bool {
        self.is_stopping.load(Ordering::Relaxed)
    }
}
