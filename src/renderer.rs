//! The estimator contract shared by the path tracer and the MLT sampler, and
//! the progressive render driver that owns the render thread and the
//! double-buffered frame.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use log::info;

use crate::film::Film;
use crate::scene::Scene;
use crate::threadpool::WorkerPool;

/// Common contract for rendering techniques.
///
/// 実装は内部可変性で蓄積バッファを持ち、`accumulate` は同じシーンに対して
/// 何度でも呼べる（プログレッシブ）。`stop` は協調的キャンセルで、長い
/// ループはサンプル / タイルの合間にフラグを確認して早期脱出する。
pub trait Renderer: Send + Sync {
    /// Accumulate `num_samples` more samples per pixel into the private
    /// buffer(s), parallelized over `pool` when given. Returns only after
    /// every sub-job completed.
    fn accumulate(&self, scene: &Arc<Scene>, num_samples: u32, pool: Option<&WorkerPool>);

    /// Read the current accumulation back into `frame_buffer`
    /// (tone-mapped + gamma-corrected, values in [0,1]).
    fn update_frame_buffer(&self, frame_buffer: &mut Film);

    fn num_samples_per_pixel(&self) -> u32;

    fn reset(&self);

    fn stop(&self);

    fn is_stopping(&self) -> bool;
}

/// 目標サンプル数に達するまでステップ幅を 1→128 へ倍々で伸ばしながら
/// accumulate → バックバッファ更新 → スワップを繰り返す。
const NUM_SAMPLES_TO_TAKE: u32 = 16384;
const MAX_NUM_SAMPLES_PER_STEP: u32 = 128;

pub struct RenderProcess {
    renderer: Arc<dyn Renderer>,
    scene: Arc<Scene>,
    front_buffer: Arc<Mutex<Film>>,
    pool: Option<Arc<WorkerPool>>,
    width: usize,
    height: usize,
    target_samples: u32,
    thread: Option<JoinHandle<()>>,
}

impl RenderProcess {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        scene: Arc<Scene>,
        width: usize,
        height: usize,
        num_jobs: usize,
    ) -> Self {
        Self::with_target(renderer, scene, width, height, num_jobs, NUM_SAMPLES_TO_TAKE)
    }

    /// 目標サンプル数を指定して開始する（ヘッドレス運転用）。
    pub fn with_target(
        renderer: Arc<dyn Renderer>,
        scene: Arc<Scene>,
        width: usize,
        height: usize,
        num_jobs: usize,
        target_samples: u32,
    ) -> Self {
        let pool = (num_jobs > 1).then(|| Arc::new(WorkerPool::new(num_jobs)));
        let mut process = Self {
            renderer,
            scene,
            front_buffer: Arc::new(Mutex::new(Film::new(width, height, 3))),
            pool,
            width,
            height,
            target_samples,
            thread: None,
        };
        process.spawn_render_thread();
        process
    }

    /// Live converging frame buffer for presentation. Returns a snapshot;
    /// the render thread keeps swapping the shared front buffer underneath.
    pub fn frame_buffer(&self) -> Film {
        self.front_buffer.lock().unwrap().clone()
    }

    pub fn num_samples_per_pixel(&self) -> u32 {
        self.renderer.num_samples_per_pixel()
    }

    /// レンダースレッドが目標サンプル数へ到達して終了したか。
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Should be called when the scene changes: stops the render thread,
    /// resets the renderer and starts over.
    pub fn reset(&mut self) {
        self.stop_and_join();
        self.renderer.reset();
        self.spawn_render_thread();
    }

    fn stop_and_join(&mut self) {
        self.renderer.stop();
        if let Some(thread) = self.thread.take() {
            let _unused = thread.join();
        }
    }

    fn spawn_render_thread(&mut self) {
        let renderer = Arc::clone(&self.renderer);
        let scene = Arc::clone(&self.scene);
        let front_buffer = Arc::clone(&self.front_buffer);
        let pool = self.pool.clone();
        let (width, height) = (self.width, self.height);
        let target_samples = self.target_samples;
        self.thread = Some(
            std::thread::Builder::new()
                .name("render".to_string())
                .spawn(move || {
                    render_loop(
                        &*renderer,
                        &scene,
                        pool.as_deref(),
                        &front_buffer,
                        width,
                        height,
                        target_samples,
                    )
                })
                .expect("failed to spawn render thread"),
        );
    }
}

impl Drop for RenderProcess {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn render_loop(
    renderer: &dyn Renderer,
    scene: &Arc<Scene>,
    pool: Option<&WorkerPool>,
    front_buffer: &Mutex<Film>,
    width: usize,
    height: usize,
    target_samples: u32,
) {
    let mut back_buffer = Film::new(width, height, 3);
    let mut sample_step_size = 1u32;
    let start_time = Instant::now();

    while renderer.num_samples_per_pixel() < target_samples {
        renderer.accumulate(scene, sample_step_size, pool);
        if renderer.is_stopping() {
            break;
        }
        if sample_step_size < MAX_NUM_SAMPLES_PER_STEP {
            sample_step_size *= 2;
        } else {
            info!(
                "Samples per pixel: {}, Time: {:.3}s",
                renderer.num_samples_per_pixel(),
                start_time.elapsed().as_secs_f64()
            );
        }
        renderer.update_frame_buffer(&mut back_buffer);
        // フロントと差し替え（presenter はロック越しのスナップショットを読む）
        std::mem::swap(&mut *front_buffer.lock().unwrap(), &mut back_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// 全ピクセルを定数で塗るだけのダミーレンダラ。
    struct Flat {
        samples: AtomicU32,
        stopping: AtomicBool,
    }

    impl Flat {
        fn new() -> Self {
            Self {
                samples: AtomicU32::new(0),
                stopping: AtomicBool::new(false),
            }
        }
    }

    impl Renderer for Flat {
        fn accumulate(&self, _scene: &Arc<Scene>, num_samples: u32, _pool: Option<&WorkerPool>) {
            self.samples.fetch_add(num_samples, Ordering::Relaxed);
        }

        fn update_frame_buffer(&self, frame_buffer: &mut Film) {
            for y in 0..frame_buffer.height() {
                for x in 0..frame_buffer.width() {
                    frame_buffer.set_rgb(x, y, crate::math::Color::splat(0.5));
                }
            }
        }

        fn num_samples_per_pixel(&self) -> u32 {
            self.samples.load(Ordering::Relaxed)
        }

        fn reset(&self) {
            self.samples.store(0, Ordering::Relaxed);
            self.stopping.store(false, Ordering::Relaxed);
        }

        fn stop(&self) {
            self.stopping.store(true, Ordering::Relaxed);
        }

        fn is_stopping(&self) -> bool {
            self.stopping.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn driver_runs_to_completion_and_publishes_frames() {
        let scene = Arc::new(Scene::new(crate::test_support::small_camera(8, 8)));
        let renderer = Arc::new(Flat::new());
        let process = RenderProcess::with_target(renderer.clone(), scene, 8, 8, 1, 64);

        while !process.is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(process.num_samples_per_pixel() >= 64);
        let frame = process.frame_buffer();
        assert_eq!(frame.rgb(3, 3), crate::math::Color::splat(0.5));
    }

    #[test]
    fn reset_restarts_the_render_thread() {
        let scene = Arc::new(Scene::new(crate::test_support::small_camera(4, 4)));
        let renderer = Arc::new(Flat::new());
        let mut process = RenderProcess::with_target(renderer.clone(), scene, 4, 4, 1, 64);
        while !process.is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        process.reset();
        while !process.is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(process.num_samples_per_pixel() >= 64);
    }

    #[test]
    fn stop_interrupts_the_loop() {
        let scene = Arc::new(Scene::new(crate::test_support::small_camera(4, 4)));
        let renderer = Arc::new(Flat::new());
        let process = RenderProcess::new(renderer.clone(), scene, 4, 4, 1);
        renderer.stop();
        // stop 後にスレッドが終了するまで待てる
        drop(process);
    }
}
