//! The host audio backend contract (§6).
//!
//! A backend is anything that can actually move bytes in or out of the
//! machine's audio hardware (ALSA, CoreAudio, WASAPI, or a test double).
//! This module only describes the contract; no concrete backend ships
//! here, mirroring `sonido_io::backend::AudioBackend`'s "type-erased
//! handle + trait object" shape, adapted from realtime audio-thread
//! callbacks to synchronous query/command calls because a connector
//! stream drives the backend from its own worker/DMA context rather than
//! being driven by one.

use std::any::Any;
use std::sync::atomic::AtomicBool;

use crate::error::Result;
use audiocore_core::PcmProps;

/// Which side of the stream a component concerns itself with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture: backend → core → guest.
    In,
    /// Playback: guest → core → backend.
    Out,
}

/// Backend capability/limits snapshot, as returned by `GetConfig`.
#[derive(Debug, Clone)]
pub struct BackendCfg {
    /// Human-readable backend name (e.g. "pulseaudio", "wasapi", "mock").
    pub name: String,
    /// The backend may want `StreamConfigHint` dispatched to the worker
    /// pool rather than called inline.
    pub async_hint: bool,
    /// The backend may want `StreamDestroy` dispatched to the worker pool.
    pub async_stream_destroy: bool,
    /// Bytes the backend needs allocated per stream for its own state.
    pub stream_byte_size: usize,
    /// Maximum concurrent input streams the backend can host.
    pub max_streams_in: u32,
    /// Maximum concurrent output streams the backend can host.
    pub max_streams_out: u32,
}

/// Coarse backend availability, as returned by `GetStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSts {
    /// No hot-plug pointer attached for this direction.
    NotAttached,
    /// Attached and functional.
    Working,
    /// Attached but reporting a hardware/driver failure.
    NotWorking,
}

/// Per-stream state as reported by `StreamGetState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Async init is still in flight.
    Initializing,
    /// The backend reports an unrecoverable failure for this stream.
    NotWorking,
    /// Attached but not currently producing/consuming (e.g. device
    /// unplugged).
    Inactive,
    /// Normal operating state.
    Okay,
    /// The backend is winding down a requested drain.
    Draining,
}

/// Requested/accepted stream configuration exchanged with `StreamCreate`.
///
/// Mirrors `sonido_io::backend::BackendStreamConfig`'s field shape,
/// generalized to carry a full [`PcmProps`] plus the period/buffer sizing
/// the connector derives (§4.3.1).
#[derive(Debug, Clone)]
pub struct BackendStreamCfg {
    /// Requested or accepted PCM format.
    pub pcm: PcmProps,
    /// Which direction this stream moves data.
    pub direction: Direction,
    /// Target period size, in frames.
    pub period_frames: usize,
    /// Target ring/buffer size, in frames.
    pub buffer_frames: usize,
}

/// A type-erased, backend-owned stream handle.
///
/// Replaces the original's "extra bytes allocated past the end of the
/// connector-stream struct" (§9): the backend allocates and owns
/// whatever state it needs and hands back an opaque, `Send + Sync`
/// handle the core never downcasts except in tests with a known mock.
pub struct BackendStreamHandle(Box<dyn Any + Send + Sync>);

impl BackendStreamHandle {
    /// Wrap a backend-specific stream object.
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Box::new(inner))
    }

    /// Attempt to downcast to a concrete backend stream type (used by
    /// mock backends in tests to inspect their own state).
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for BackendStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendStreamHandle").finish_non_exhaustive()
    }
}

/// The outcome of `StreamCreate`.
pub enum StreamCreateOutcome {
    /// The stream is immediately usable.
    Ready(BackendStreamHandle),
    /// The stream was created but needs `StreamInitAsync` run on the
    /// worker pool before it is usable.
    AsyncInitNeeded(BackendStreamHandle),
    /// The backend does not support this configuration at all.
    NotSupported,
    /// The backend reported the specific missing-hardware code.
    CouldNotCreate,
}

/// The contract a host audio backend must satisfy (§6).
///
/// Object-safe and `Send + Sync` so the connector can hold it behind an
/// `Arc<dyn HostAudioBackend>` guarded by the hot-plug lock and call it
/// from the AIO worker, the DMA pump's timer thread, and arbitrary caller
/// threads alike.
pub trait HostAudioBackend: Send + Sync {
    /// Capability/limits snapshot.
    fn get_config(&self) -> BackendCfg;

    /// Coarse per-direction availability. Optional; defaults to
    /// reporting the backend as working.
    fn get_status(&self, _direction: Direction) -> BackendSts {
        BackendSts::Working
    }

    /// Hint at an upcoming configuration before `StreamCreate`. Optional;
    /// may block, so the connector dispatches it to the worker pool when
    /// `BackendCfg::async_hint` is set.
    fn stream_config_hint(&self, _cfg: &BackendStreamCfg) {}

    /// Create a backend stream for `cfg_req`. Returns the outcome plus
    /// the configuration the backend actually accepted (which may shrink
    /// or grow buffer sizes, but must not change rate/channels/format
    /// without the caller validating and logging it).
    fn stream_create(&self, cfg_req: &BackendStreamCfg) -> Result<(StreamCreateOutcome, BackendStreamCfg)>;

    /// Complete an async-init handed back by `StreamCreate`. `destroyed`
    /// is observed so a concurrent destroy can abort the init cheaply
    /// (§5 cancellation). Optional; default succeeds immediately.
    fn stream_init_async(&self, _handle: &BackendStreamHandle, _destroyed: &AtomicBool) -> Result<()> {
        Ok(())
    }

    /// Tear down a backend stream.
    fn stream_destroy(&self, handle: &BackendStreamHandle, immediate: bool);

    /// Start data motion.
    fn stream_enable(&self, handle: &BackendStreamHandle) -> Result<()>;
    /// Stop data motion and release backend-side buffering.
    fn stream_disable(&self, handle: &BackendStreamHandle) -> Result<()>;
    /// Pause without releasing buffering.
    fn stream_pause(&self, handle: &BackendStreamHandle) -> Result<()>;
    /// Resume from pause.
    fn stream_resume(&self, handle: &BackendStreamHandle) -> Result<()>;
    /// Ask the backend to flush remaining buffered data then stop.
    /// Optional; default is a no-op (callers must not assume the backend
    /// drains on its own if this isn't overridden).
    fn stream_drain(&self, _handle: &BackendStreamHandle) -> Result<()> {
        Ok(())
    }

    /// Bytes the backend can accept right now (output streams).
    fn stream_get_readable(&self, handle: &BackendStreamHandle) -> usize;
    /// Bytes the backend has captured and not yet delivered (input streams).
    fn stream_get_writable(&self, handle: &BackendStreamHandle) -> usize;
    /// Bytes still in flight inside the backend (used for drain accounting).
    fn stream_get_pending(&self, handle: &BackendStreamHandle) -> usize;
    /// Current backend-observed state of the stream.
    fn stream_get_state(&self, handle: &BackendStreamHandle) -> BackendState;

    /// Push `buf` to the backend. Returns bytes actually accepted.
    fn stream_play(&self, handle: &BackendStreamHandle, buf: &[u8]) -> Result<usize>;
    /// Pull captured bytes into `buf`. Returns bytes actually delivered.
    fn stream_capture(&self, handle: &BackendStreamHandle, buf: &mut [u8]) -> Result<usize>;

    /// Notify the backend that the underlying device changed in place.
    /// Optional; if the backend can't do this, it returns `false` and the
    /// core sets `NEED_REINIT` instead (§4.3.5).
    fn stream_notify_device_changed(&self, _handle: &BackendStreamHandle, _reinit: bool) -> bool {
        false
    }

    /// Enumerate device names. Optional.
    fn get_devices(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run `job` on whatever thread context the backend considers safe
    /// for this stream. Optional; default runs it inline on the caller.
    fn do_on_worker_thread(&self, _handle: &BackendStreamHandle, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}
