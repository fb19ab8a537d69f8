//! The connector's small fixed-size worker pool (§5): asynchronous
//! backend init, deferred stream destroy, deferred config hints, deferred
//! device-change fan-out. `std::thread` + condvar-guarded queue, never
//! `tokio`/`rayon` — matching the corpus's idiom for small background
//! work (`sonido-gui`'s dedicated `thread::spawn` audio thread, here
//! generalized to a small fixed pool instead of a single thread).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Maximum worker threads the pool will run concurrently.
const MAX_THREADS: usize = 3;

/// How long an idle worker waits for a job before parking itself out of
/// existence.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type Job = Box<dyn FnOnce() + Send>;

struct State {
    queue: Mutex<VecDeque<Job>>,
    wake: Condvar,
    live_threads: Mutex<usize>,
    shutdown: Mutex<bool>,
}

/// A small pool of lazily-spawned background worker threads.
pub struct WorkerPool {
    state: Arc<State>,
}

impl WorkerPool {
    /// An empty pool; the first `submit` spawns its first thread.
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                queue: Mutex::new(VecDeque::new()),
                wake: Condvar::new(),
                live_threads: Mutex::new(0),
                shutdown: Mutex::new(false),
            }),
        }
    }

    /// Enqueue `job`, spawning another worker thread if all existing
    /// ones are likely busy and the pool hasn't hit `MAX_THREADS`.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.state.queue.lock().unwrap().push_back(Box::new(job));
        self.state.wake.notify_one();

        let mut live = self.state.live_threads.lock().unwrap();
        let queued = self.state.queue.lock().unwrap().len();
        if *live < MAX_THREADS && *live < queued + 1 {
            *live += 1;
            drop(live);
            Self::spawn_worker(Arc::clone(&self.state));
        }
    }

    fn spawn_worker(state: Arc<State>) {
        std::thread::Builder::new()
            .name("audiocore-worker".into())
            .spawn(move || {
                loop {
                    if *state.shutdown.lock().unwrap() {
                        break;
                    }
                    let job = {
                        let mut queue = state.queue.lock().unwrap();
                        if let Some(job) = queue.pop_front() {
                            Some(job)
                        } else {
                            let (_, timed_out) = state.wake.wait_timeout(queue, IDLE_TIMEOUT).unwrap();
                            if timed_out.timed_out() {
                                None
                            } else {
                                None
                            }
                        }
                    };
                    match job {
                        Some(job) => job(),
                        None => {
                            let still_empty = state.queue.lock().unwrap().is_empty();
                            if still_empty {
                                break;
                            }
                        }
                    }
                }
                *state.live_threads.lock().unwrap() -= 1;
            })
            .expect("failed to spawn worker-pool thread");
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        *self.state.shutdown.lock().unwrap() = true;
        self.state.wake.notify_all();
    }
}
