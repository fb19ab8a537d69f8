//! Per-driver connector (component G, §3/§4.3/§5): owns the list of
//! connector streams, direction-enable flags, the worker pool, and the
//! hot-plug/device-change fan-out.

pub mod config;
pub mod stream;
pub mod workerpool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use audiocore_core::PcmProps;

use crate::arena::{Arena, Id};
use crate::backend::{BackendCfg, BackendStreamCfg, Direction, HostAudioBackend, StreamCreateOutcome};
use crate::clock::MonotonicClock;
use crate::error::{Error, Result};
use crate::telemetry::Telemetry;
use config::ConnectorConfig;
use stream::{ConnectorStream, ControlCommand};
use workerpool::WorkerPool;

/// Default target buffer hold time, absent an override (§4.3.1 step 3).
const DEFAULT_BUFFER_MS: u64 = 300;
/// Pre-buffer is capped at this many milliseconds even at 50% of buffer.
const PREBUFFER_CAP_MS: u64 = 200;

/// A handle naming one connector stream, stable across `Connector` calls.
pub type StreamId = Id;

struct DirectionState {
    enabled: bool,
    free_slots: u32,
}

/// Guards the global stream list and direction-enable flags (§3's first
/// reader/writer lock). The hot-plug lock below guards the backend
/// pointer; per §3's locking order the stream list lock is always
/// acquired before the hot-plug lock, never after.
struct StreamList {
    streams: Arena<ConnectorStream>,
    directions: HashMap<Direction, DirectionState>,
}

struct Inner {
    list: RwLock<StreamList>,
    backend: RwLock<Arc<dyn HostAudioBackend>>,
    backend_cfg: RwLock<BackendCfg>,
}

/// Per-driver singleton described in §3/§5.
pub struct Connector {
    inner: Arc<Inner>,
    pool: WorkerPool,
    config: ConnectorConfig,
    telemetry: Arc<dyn Telemetry>,
    clock: Arc<dyn MonotonicClock>,
    name_seq: AtomicU64,
}

impl Connector {
    /// Attach to `backend` under `config`.
    pub fn new(
        backend: Arc<dyn HostAudioBackend>,
        config: ConnectorConfig,
        telemetry: Arc<dyn Telemetry>,
        clock: Arc<dyn MonotonicClock>,
    ) -> Self {
        let cfg = backend.get_config();
        let mut directions = HashMap::new();
        directions.insert(Direction::Out, DirectionState { enabled: config.output_enabled, free_slots: cfg.max_streams_out });
        directions.insert(Direction::In, DirectionState { enabled: config.input_enabled, free_slots: cfg.max_streams_in });
        Self {
            inner: Arc::new(Inner {
                list: RwLock::new(StreamList { streams: Arena::new(), directions }),
                backend_cfg: RwLock::new(cfg),
                backend: RwLock::new(backend),
            }),
            pool: WorkerPool::new(),
            config,
            telemetry,
            clock,
            name_seq: AtomicU64::new(0),
        }
    }

    fn overrides(&self, direction: Direction) -> &config::DirectionOverrides {
        match direction {
            Direction::In => &self.config.input,
            Direction::Out => &self.config.output,
        }
    }

    /// Derive buffer/period/pre-buffer sizing from the requested PCM
    /// format and this driver's overrides (§4.3.1 step 3).
    fn derive_sizes(&self, pcm: &PcmProps, direction: Direction) -> (usize, usize, usize) {
        let overrides = self.overrides(direction);
        let buffer_ms = overrides.buffer_size_ms.map(u64::from).unwrap_or(DEFAULT_BUFFER_MS).max(1);
        let buffer_frames = (pcm.ms_to_frames(buffer_ms) as usize).max(1);
        let period_frames = match overrides.period_size_ms {
            Some(ms) => (pcm.ms_to_frames(ms as u64) as usize).max(1),
            None => (buffer_frames / 4).max(1),
        }
        .min((buffer_frames / 2).max(2) - 1);
        let prebuf_ms = match overrides.prebuffer_size_ms {
            Some(ms) => u64::from(ms),
            None => (buffer_ms / 2).min(PREBUFFER_CAP_MS),
        };
        let prebuf_frames = (pcm.ms_to_frames(prebuf_ms) as usize).max(1);
        (buffer_frames, period_frames.max(1), prebuf_frames)
    }

    /// Apply per-direction configuration overrides to the guest-requested
    /// PCM format, producing the configuration actually offered to the
    /// backend (§4.3.1 step 2).
    fn apply_overrides(&self, requested: &PcmProps, direction: Direction) -> Result<PcmProps> {
        let overrides = self.overrides(direction);
        let sample_size = match overrides.pcm_sample_bits {
            Some(bits) if bits > 0 => (bits / 8).max(1),
            _ => requested.sample_size(),
        };
        let pcm = PcmProps::new(
            sample_size,
            overrides.pcm_sample_signed.unwrap_or_else(|| requested.signed()),
            overrides.pcm_sample_swap_endian.unwrap_or_else(|| requested.swap_endian()),
            overrides.pcm_sample_channels.unwrap_or_else(|| requested.channels()),
            overrides.pcm_sample_hz.unwrap_or_else(|| requested.hz()),
        )?;
        Ok(pcm)
    }

    fn next_name(&self) -> String {
        let n = self.name_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}", self.config.driver_name, n)
    }

    /// Create a new connector stream for the given direction and guest
    /// PCM request (§4.3.1).
    pub fn create_stream(&self, direction: Direction, requested: PcmProps) -> Result<StreamId> {
        {
            let list = self.inner.list.read().unwrap();
            if !list.directions.get(&direction).map(|d| d.enabled).unwrap_or(false) {
                return Err(Error::ConfigInvalid("direction disabled".into()));
            }
        }

        let accepted_request = self.apply_overrides(&requested, direction)?;
        let (buffer_frames, period_frames, prebuf_frames) = self.derive_sizes(&accepted_request, direction);
        let frame_size = accepted_request.frame_size();
        let prebuf_threshold_bytes = prebuf_frames * frame_size;
        let prebuf_capacity_bytes = (buffer_frames * frame_size).max(prebuf_threshold_bytes + 8192).div_ceil(4096) * 4096;

        {
            let mut list = self.inner.list.write().unwrap();
            let slots = list.directions.get_mut(&direction).ok_or(Error::NoFreeSlots)?;
            if slots.free_slots == 0 {
                return Err(Error::NoFreeSlots);
            }
            slots.free_slots -= 1;
        }

        let backend = Arc::clone(&self.inner.backend.read().unwrap());
        let cfg_req = BackendStreamCfg { pcm: accepted_request, direction, period_frames, buffer_frames };
        let (outcome, accepted) = match backend.stream_create(&cfg_req) {
            Ok(v) => v,
            Err(err) => {
                self.release_slot(direction);
                return Err(err);
            }
        };

        let now_ns = self.clock.now_ns();
        let (handle, needs_async) = match outcome {
            StreamCreateOutcome::Ready(handle) => (handle, false),
            StreamCreateOutcome::AsyncInitNeeded(handle) => (handle, true),
            StreamCreateOutcome::NotSupported | StreamCreateOutcome::CouldNotCreate => {
                self.release_slot(direction);
                return Err(Error::StreamCouldNotCreate);
            }
        };

        let _name = self.next_name();
        let mut connector_stream =
            ConnectorStream::new(Arc::clone(&backend), handle, accepted, prebuf_capacity_bytes, prebuf_threshold_bytes, now_ns);

        if !needs_async {
            connector_stream.mark_backend_ready();
            let mut list = self.inner.list.write().unwrap();
            return Ok(list.streams.insert(connector_stream));
        }

        let cancel = connector_stream.async_init_cancel_flag();
        let id = self.inner.list.write().unwrap().streams.insert(connector_stream);

        let inner = Arc::clone(&self.inner);
        let telemetry = Arc::clone(&self.telemetry);
        self.pool.submit(move || {
            let handle = {
                let list = inner.list.read().unwrap();
                match list.streams.get(id).and_then(ConnectorStream::backend_handle_arc) {
                    Some(handle) => handle,
                    None => return,
                }
            };
            // Lock dropped above: `stream_init_async` can block for the
            // full init, and a concurrent destroy must be free to take
            // the write lock and flip `cancel` without waiting on us.
            let result = backend.stream_init_async(&handle, &cancel);
            if result.is_err() {
                telemetry.flow_error();
            }
            let mut list = inner.list.write().unwrap();
            if let Some(s) = list.streams.get_mut(id) {
                s.mark_backend_ready();
                s.reconcile_backend_state(now_ns);
            }
        });
        Ok(id)
    }

    fn release_slot(&self, direction: Direction) {
        let mut list = self.inner.list.write().unwrap();
        if let Some(d) = list.directions.get_mut(&direction) {
            d.free_slots += 1;
        }
    }

    /// Destroy a stream (§4.3.2). Runs inline unless the backend
    /// advertises `async_stream_destroy`, in which case it is dispatched
    /// to the worker pool and this call returns immediately.
    pub fn destroy_stream(&self, id: StreamId, immediate: bool) {
        let async_destroy = self.inner.backend_cfg.read().unwrap().async_stream_destroy;
        if async_destroy {
            let inner = Arc::clone(&self.inner);
            self.pool.submit(move || Self::destroy_stream_inline(&inner, id, immediate));
        } else {
            Self::destroy_stream_inline(&self.inner, id, immediate);
        }
    }

    fn destroy_stream_inline(inner: &Inner, id: StreamId, immediate: bool) {
        let direction = {
            let mut list = inner.list.write().unwrap();
            let Some(stream) = list.streams.get_mut(id) else { return };
            stream.destroy_backend(immediate);
            let direction = stream.cfg().direction;
            list.streams.remove(id);
            direction
        };
        let mut list = inner.list.write().unwrap();
        if let Some(d) = list.directions.get_mut(&direction) {
            d.free_slots += 1;
        }
    }

    /// Issue a control command against a live stream (§4.3.3).
    pub fn control(&self, id: StreamId, cmd: ControlCommand) -> Result<()> {
        let now_ns = self.clock.now_ns();
        let mut list = self.inner.list.write().unwrap();
        let stream = list.streams.get_mut(id).ok_or(Error::StreamNotReady)?;
        stream.control(cmd, now_ns)
    }

    /// Force re-initialization of a stream after a device change the
    /// backend could not absorb in place (§4.3.5).
    pub fn reinit_stream(&self, id: StreamId) -> Result<()> {
        let now_ns = self.clock.now_ns();
        let mut list = self.inner.list.write().unwrap();
        let stream = list.streams.get_mut(id).ok_or(Error::StreamNotReady)?;
        stream.reinit(now_ns)
    }

    /// Play bytes to an output stream (§4.3.6).
    pub fn output_play(&self, id: StreamId, buf: &[u8]) -> Result<usize> {
        let mut list = self.inner.list.write().unwrap();
        let stream = list.streams.get_mut(id).ok_or(Error::StreamNotReady)?;
        Ok(stream.output_play(buf, self.telemetry.as_ref()))
    }

    /// Capture bytes from an input stream (§4.3.7).
    pub fn input_capture(&self, id: StreamId, dst: &mut [u8]) -> Result<usize> {
        let now_ns = self.clock.now_ns();
        let mut list = self.inner.list.write().unwrap();
        let stream = list.streams.get_mut(id).ok_or(Error::StreamNotReady)?;
        stream.input_capture(dst, now_ns)
    }

    /// Query writable bytes (§4.3.8).
    pub fn writable(&self, id: StreamId) -> usize {
        let list = self.inner.list.read().unwrap();
        list.streams.get(id).map(|s| s.writable()).unwrap_or(0)
    }

    /// Query readable bytes (§4.3.8).
    pub fn readable(&self, id: StreamId) -> usize {
        let now_ns = self.clock.now_ns();
        let list = self.inner.list.read().unwrap();
        list.streams.get(id).map(|s| s.readable(now_ns)).unwrap_or(0)
    }

    /// Warn every output stream that a device switch is about to happen
    /// (§8 scenario 5). Called ahead of [`Self::notify_device_changed`]
    /// once the host backend knows a switch is imminent, so in-flight
    /// playback starts mirroring into the pre-buffer before the switch
    /// actually lands.
    pub fn prepare_device_switch(&self) {
        let mut list = self.inner.list.write().unwrap();
        for (_, stream) in list.streams.iter_mut() {
            stream.prepare_device_switch();
        }
    }

    /// Fan out a device-change notification to every live stream
    /// (hot-plug, §5). Acquires the stream-list lock first, then the
    /// hot-plug lock, per §3's locking order. Returns the streams whose
    /// backend couldn't absorb the change in place and so need
    /// `reinit_stream` (§4.3.5).
    pub fn notify_device_changed(&self) -> Vec<StreamId> {
        let mut needs_reinit = Vec::new();
        let mut list = self.inner.list.write().unwrap();
        let _hotplug_guard = self.inner.backend.read().unwrap();
        for (id, stream) in list.streams.iter_mut() {
            if !stream.notify_device_changed() {
                needs_reinit.push(id);
            }
        }
        needs_reinit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendSts, BackendState, BackendStreamHandle};
    use crate::clock::ManualClock;
    use crate::telemetry::NullTelemetry;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Condvar, Mutex};
    use std::time::{Duration, Instant};

    /// Gate letting a test hold `stream_init_async` open until it either
    /// observes the destroy-requested flag or is explicitly released.
    struct Gate {
        released: Mutex<bool>,
        cv: Condvar,
        finished: AtomicBool,
    }

    struct AsyncBackend {
        gate: Arc<Gate>,
    }

    impl HostAudioBackend for AsyncBackend {
        fn get_config(&self) -> BackendCfg {
            BackendCfg {
                name: "mock-async".into(),
                async_hint: false,
                async_stream_destroy: false,
                stream_byte_size: 0,
                max_streams_in: 1,
                max_streams_out: 1,
            }
        }

        fn get_status(&self, _direction: Direction) -> BackendSts {
            BackendSts::Working
        }

        fn stream_create(&self, cfg_req: &BackendStreamCfg) -> Result<(StreamCreateOutcome, BackendStreamCfg)> {
            Ok((StreamCreateOutcome::AsyncInitNeeded(BackendStreamHandle::new(())), cfg_req.clone()))
        }

        fn stream_init_async(&self, _handle: &BackendStreamHandle, destroyed: &AtomicBool) -> Result<()> {
            let mut released = self.gate.released.lock().unwrap();
            while !*released && !destroyed.load(Ordering::SeqCst) {
                let (g, _) = self.gate.cv.wait_timeout(released, Duration::from_millis(5)).unwrap();
                released = g;
            }
            self.gate.finished.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stream_destroy(&self, _handle: &BackendStreamHandle, _immediate: bool) {}
        fn stream_enable(&self, _handle: &BackendStreamHandle) -> Result<()> {
            Ok(())
        }
        fn stream_disable(&self, _handle: &BackendStreamHandle) -> Result<()> {
            Ok(())
        }
        fn stream_pause(&self, _handle: &BackendStreamHandle) -> Result<()> {
            Ok(())
        }
        fn stream_resume(&self, _handle: &BackendStreamHandle) -> Result<()> {
            Ok(())
        }
        fn stream_get_readable(&self, _handle: &BackendStreamHandle) -> usize {
            0
        }
        fn stream_get_writable(&self, _handle: &BackendStreamHandle) -> usize {
            0
        }
        fn stream_get_pending(&self, _handle: &BackendStreamHandle) -> usize {
            0
        }
        fn stream_get_state(&self, _handle: &BackendStreamHandle) -> BackendState {
            BackendState::Initializing
        }
        fn stream_play(&self, _handle: &BackendStreamHandle, buf: &[u8]) -> Result<usize> {
            Ok(buf.len())
        }
        fn stream_capture(&self, _handle: &BackendStreamHandle, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
    }

    /// Invariant 7: destroying a stream while its `StreamInitAsync` is
    /// still in flight cancels the init cooperatively (via the shared
    /// cancel flag) instead of the destroy blocking on it, and the
    /// callback racing the destroy must not touch freed/reused state.
    #[test]
    fn destroy_cancels_pending_async_init_without_blocking() {
        let gate = Arc::new(Gate { released: Mutex::new(false), cv: Condvar::new(), finished: AtomicBool::new(false) });
        let backend = Arc::new(AsyncBackend { gate: gate.clone() });
        let connector = Connector::new(
            backend,
            ConnectorConfig::new("mock-async"),
            Arc::new(NullTelemetry),
            Arc::new(ManualClock::new()),
        );

        let pcm = PcmProps::new(2, true, false, 2, 48_000).unwrap();
        let id = connector.create_stream(Direction::Out, pcm).unwrap();

        // The async-init worker thread is parked in the gate, observing
        // the cancel flag but not yet released. Destroy now, before it
        // ever completes normally.
        connector.destroy_stream(id, true);

        // The destroy call itself must return immediately (it does, since
        // we reached this line); the worker thread should now notice the
        // stream's cancel flag and unwind on its own.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !gate.finished.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(gate.finished.load(Ordering::SeqCst), "pending async-init must unwind after a destroy, not hang forever");

        // The stream is gone; querying it is safe and reports the
        // not-found defaults rather than touching freed state.
        assert_eq!(connector.writable(id), 0);
        assert_eq!(connector.readable(id), 0);
        assert!(connector.control(id, ControlCommand::Enable).is_err());
    }
}
