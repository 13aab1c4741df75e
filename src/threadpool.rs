//! 固定サイズのワーカープール。共有 FIFO に積まれたクロージャをワーカーが
//! 取り出して実行し、キューが空かつ実行中タスクがゼロになった時点で
//! `wait()` が解除される。

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolState {
    stopping: bool,
    num_active_tasks: u32,
    work_queue: VecDeque<Job>,
}

struct Shared {
    state: Mutex<PoolState>,
    available_work: Condvar,
    all_idle: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::default()),
            available_work: Condvar::new(),
            all_idle: Condvar::new(),
        });

        let mut threads = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let shared = Arc::clone(&shared);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("worker-{}", i))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread"),
            );
        }
        debug!("worker pool started with {} threads", num_threads);

        Self { shared, threads }
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn assign_work(&self, work: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.work_queue.push_back(Box::new(work));
            state.num_active_tasks += 1;
        }
        self.shared.available_work.notify_one();
    }

    /// キューが空になり、実行中のタスクが無くなるまでブロックする。
    pub fn wait(&self) {
        let state = self.shared.state.lock().unwrap();
        let _unused = self
            .shared
            .all_idle
            .wait_while(state, |s| s.num_active_tasks != 0 || !s.work_queue.is_empty())
            .unwrap();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
        }
        self.shared.available_work.notify_all();
        for thread in self.threads.drain(..) {
            let _unused = thread.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let work_unit = {
            let state = lock_state(shared);
            let mut state = shared
                .available_work
                .wait_while(state, |s| !s.stopping && s.work_queue.is_empty())
                .unwrap();

            if state.stopping && state.work_queue.is_empty() {
                break;
            }

            state.work_queue.pop_front().expect("queue is non-empty")
        };

        work_unit();

        {
            let mut state = lock_state(shared);
            state.num_active_tasks -= 1;
            if state.num_active_tasks == 0 && state.work_queue.is_empty() {
                shared.all_idle.notify_all();
            }
        }
    }
}

fn lock_state(shared: &Shared) -> std::sync::MutexGuard<'_, PoolState> {
    shared.state.lock().unwrap()
}
