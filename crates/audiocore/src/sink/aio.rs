//! Per-sink AIO worker thread (component E, §4.2.3).
//!
//! One dedicated OS thread per sink, woken by a condvar rather than
//! cooperatively scheduled, per §9's "keep the one-thread-per-sink model;
//! avoid async/await" guidance — the update call holds the sink lock for
//! a short, predictable duration.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{MixerSink, SCRATCH_BYTES};
use crate::backend::Direction;
use crate::clock::MonotonicClock;
use crate::telemetry::Telemetry;

/// Bound on `Drop`'s wait for the worker thread to notice shutdown and
/// exit, per §5.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// An update job registered on a sink, run once per AIO wakeup in
/// addition to the direction's own input/output update.
pub type UpdateJob = Box<dyn FnMut(&mut MixerSink) + Send>;

struct Shared {
    sink: Mutex<MixerSink>,
    wake: Condvar,
    shutdown: Mutex<bool>,
}

/// Handle to a running AIO worker. Dropping it requests shutdown and
/// joins the thread (bounded by a 30 s wait, §5).
pub struct AioWorker {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl AioWorker {
    /// Spawn the worker thread for `sink`. `jobs` are extra per-wakeup
    /// callbacks (config hints, stats flushing); `min_job_interval` bounds
    /// how long the worker waits between wakeups while draining.
    pub fn spawn(
        sink: MixerSink,
        mut jobs: Vec<UpdateJob>,
        min_job_interval: Duration,
        telemetry: Arc<dyn Telemetry>,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            wake: Condvar::new(),
            shutdown: Mutex::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let join = std::thread::Builder::new()
            .name("audiocore-aio".into())
            .spawn(move || {
                let mut scratch = [0u8; SCRATCH_BYTES];
                loop {
                    let draining = worker_shared.sink.lock().unwrap().status().draining;
                    let mut guard = worker_shared.shutdown.lock().unwrap();
                    // Check the predicate before ever calling wait(): if
                    // Drop already set shutdown and fired its notify, we
                    // must see that here rather than descend into wait()
                    // and block on a wakeup that already happened.
                    if !*guard {
                        guard = if draining {
                            worker_shared.wake.wait_timeout(guard, min_job_interval).unwrap().0
                        } else {
                            worker_shared.wake.wait(guard).unwrap()
                        };
                    }
                    if *guard {
                        break;
                    }
                    drop(guard);

                    let mut sink = worker_shared.sink.lock().unwrap();
                    let status = sink.status();
                    if status.running || status.draining {
                        if sink.direction() == Direction::In {
                            sink.input_update(&mut scratch, telemetry.as_ref());
                        }
                        for job in jobs.iter_mut() {
                            job(&mut sink);
                        }
                        if sink.direction() == Direction::Out {
                            sink.output_update(&mut scratch, telemetry.as_ref(), clock.now_ns());
                        }
                    }
                }
            })
            .expect("failed to spawn AIO worker thread");

        Self { shared, join: Some(join) }
    }

    /// Wake the worker for an immediate update pass.
    pub fn notify(&self) {
        self.shared.wake.notify_one();
    }

    /// Run a closure against the sink under its lock (used by the
    /// connector's DMA transfer calls, §4.2.4).
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut MixerSink) -> R) -> R {
        let mut sink = self.shared.sink.lock().unwrap();
        f(&mut sink)
    }
}

impl Drop for AioWorker {
    fn drop(&mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.wake.notify_one();
        if let Some(join) = self.join.take() {
            let deadline = Instant::now() + SHUTDOWN_JOIN_TIMEOUT;
            while !join.is_finished() {
                if Instant::now() >= deadline {
                    return;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            let _ = join.join();
        }
    }
}
