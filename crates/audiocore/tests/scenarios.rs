//! End-to-end scenarios exercising the connector lifecycle, the mixer
//! sink and the device DMA pump together, against a deterministic mock
//! backend and manually-advanced clock.
//!
//! Each test is self-contained and picks concrete byte/frame counts it
//! can trace by hand; none of them depend on wall-clock time or thread
//! scheduling beyond what's noted inline.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use audiocore::backend::{
    BackendCfg, BackendSts, BackendState, BackendStreamCfg, BackendStreamHandle, Direction, HostAudioBackend,
    StreamCreateOutcome,
};
use audiocore::clock::ManualClock;
use audiocore::connector::Connector;
use audiocore::connector::config::ConnectorConfig;
use audiocore::connector::stream::ControlCommand;
use audiocore::dma::bdl::GuestMemory;
use audiocore::dma::{DmaPump, PumpCodec, SR_BCIS, SR_CELV, SR_DCH, SR_LVBCI};
use audiocore::sink::MixerSink;
use audiocore::sink::aio::AioWorker;
use audiocore::sink::stream::{MixerStream, StreamCodec};
use audiocore::telemetry::NullTelemetry;
use audiocore_core::PcmProps;

/// What a call to `stream_create` should hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CreateMode {
    Ready,
    CouldNotCreate,
}

struct MockStream {
    state: BackendState,
    played: Vec<u8>,
    capture_queue: VecDeque<u8>,
}

/// The only concrete type ever stashed inside a `BackendStreamHandle` in
/// these tests; `id` indexes `MockBackend::streams`.
struct MockHandle(usize);

/// A `HostAudioBackend` test double. Every stream it creates gets a
/// sequential id starting at 0 in creation order, which tests rely on to
/// look up recorded state without threading the handle back out.
struct MockBackend {
    cfg: BackendCfg,
    next_id: AtomicUsize,
    streams: Mutex<HashMap<usize, MockStream>>,
    create_mode: Mutex<CreateMode>,
    absorbs_device_change: Mutex<bool>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            cfg: BackendCfg {
                name: "mock".into(),
                async_hint: false,
                async_stream_destroy: false,
                stream_byte_size: 0,
                max_streams_in: 4,
                max_streams_out: 4,
            },
            next_id: AtomicUsize::new(0),
            streams: Mutex::new(HashMap::new()),
            create_mode: Mutex::new(CreateMode::Ready),
            absorbs_device_change: Mutex::new(true),
        }
    }

    fn set_create_mode(&self, mode: CreateMode) {
        *self.create_mode.lock().unwrap() = mode;
    }

    fn set_absorbs_device_change(&self, absorbs: bool) {
        *self.absorbs_device_change.lock().unwrap() = absorbs;
    }

    fn played_len(&self, id: usize) -> usize {
        self.streams.lock().unwrap().get(&id).map(|s| s.played.len()).unwrap_or(0)
    }

    fn push_capture(&self, id: usize, bytes: &[u8]) {
        self.streams.lock().unwrap().get_mut(&id).unwrap().capture_queue.extend(bytes.iter().copied());
    }
}

impl HostAudioBackend for MockBackend {
    fn get_config(&self) -> BackendCfg {
        self.cfg.clone()
    }

    fn get_status(&self, _direction: Direction) -> BackendSts {
        BackendSts::Working
    }

    fn stream_create(&self, cfg_req: &BackendStreamCfg) -> audiocore::Result<(StreamCreateOutcome, BackendStreamCfg)> {
        match *self.create_mode.lock().unwrap() {
            CreateMode::CouldNotCreate => Ok((StreamCreateOutcome::CouldNotCreate, cfg_req.clone())),
            CreateMode::Ready => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.streams.lock().unwrap().insert(
                    id,
                    MockStream { state: BackendState::Okay, played: Vec::new(), capture_queue: VecDeque::new() },
                );
                let handle = BackendStreamHandle::new(MockHandle(id));
                Ok((StreamCreateOutcome::Ready(handle), cfg_req.clone()))
            }
        }
    }

    fn stream_destroy(&self, handle: &BackendStreamHandle, _immediate: bool) {
        let id = handle.downcast_ref::<MockHandle>().unwrap().0;
        self.streams.lock().unwrap().remove(&id);
    }

    fn stream_enable(&self, _handle: &BackendStreamHandle) -> audiocore::Result<()> {
        Ok(())
    }

    fn stream_disable(&self, _handle: &BackendStreamHandle) -> audiocore::Result<()> {
        Ok(())
    }

    fn stream_pause(&self, _handle: &BackendStreamHandle) -> audiocore::Result<()> {
        Ok(())
    }

    fn stream_resume(&self, _handle: &BackendStreamHandle) -> audiocore::Result<()> {
        Ok(())
    }

    fn stream_get_readable(&self, handle: &BackendStreamHandle) -> usize {
        let id = handle.downcast_ref::<MockHandle>().unwrap().0;
        self.streams.lock().unwrap().get(&id).map(|s| s.capture_queue.len()).unwrap_or(0)
    }

    fn stream_get_writable(&self, _handle: &BackendStreamHandle) -> usize {
        1 << 20
    }

    fn stream_get_pending(&self, _handle: &BackendStreamHandle) -> usize {
        0
    }

    fn stream_get_state(&self, handle: &BackendStreamHandle) -> BackendState {
        let id = handle.downcast_ref::<MockHandle>().unwrap().0;
        self.streams.lock().unwrap().get(&id).map(|s| s.state).unwrap_or(BackendState::NotWorking)
    }

    fn stream_play(&self, handle: &BackendStreamHandle, buf: &[u8]) -> audiocore::Result<usize> {
        let id = handle.downcast_ref::<MockHandle>().unwrap().0;
        let mut streams = self.streams.lock().unwrap();
        let Some(s) = streams.get_mut(&id) else { return Ok(0) };
        s.played.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn stream_capture(&self, handle: &BackendStreamHandle, buf: &mut [u8]) -> audiocore::Result<usize> {
        let id = handle.downcast_ref::<MockHandle>().unwrap().0;
        let mut streams = self.streams.lock().unwrap();
        let Some(s) = streams.get_mut(&id) else { return Ok(0) };
        let n = buf.len().min(s.capture_queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = s.capture_queue.pop_front().unwrap();
        }
        Ok(n)
    }

    fn stream_notify_device_changed(&self, _handle: &BackendStreamHandle, _reinit: bool) -> bool {
        *self.absorbs_device_change.lock().unwrap()
    }
}

fn stereo_16(hz: u32) -> PcmProps {
    PcmProps::new(2, true, false, 2, hz).unwrap()
}

fn connector_config(buffer_ms: u32, prebuffer_ms: u32) -> ConnectorConfig {
    let mut cfg = ConnectorConfig::new("mock");
    cfg.output_enabled = true;
    cfg.input_enabled = true;
    cfg.output.buffer_size_ms = Some(buffer_ms);
    cfg.output.prebuffer_size_ms = Some(prebuffer_ms);
    cfg
}

/// Scenario 1: a freshly enabled output stream buffers into its
/// pre-buffer (not touching the backend at all) until the threshold is
/// crossed, then drains the whole pre-buffer to the backend on the next
/// call before returning to straight-through `Play`.
#[test]
fn scenario1_output_prebuffer_fills_then_drains() {
    let backend = Arc::new(MockBackend::new());
    let connector = Connector::new(
        backend.clone(),
        connector_config(1000, 100),
        Arc::new(NullTelemetry),
        Arc::new(ManualClock::new()),
    );

    let pcm = stereo_16(48_000);
    let id = connector.create_stream(Direction::Out, pcm).unwrap();
    connector.control(id, ControlCommand::Enable).unwrap();

    // 100ms pre-buffer at 48kHz/stereo/16-bit = 4800 frames = 19200 bytes.
    let chunk = vec![0xABu8; 9_600]; // 2400 frames

    assert_eq!(connector.output_play(id, &chunk).unwrap(), 9_600);
    assert_eq!(backend.played_len(0), 0, "still buffering, nothing reaches the backend yet");

    // Second chunk crosses the 19200-byte threshold; the transition to
    // PrebufCommitting happens in this same call but draining happens on
    // the next one.
    assert_eq!(connector.output_play(id, &chunk).unwrap(), 9_600);
    assert_eq!(backend.played_len(0), 0, "threshold just crossed, drain happens next call");

    assert_eq!(connector.output_play(id, &[]).unwrap(), 0);
    assert_eq!(backend.played_len(0), 19_200, "whole pre-buffer flushed to the backend");

    let tail = vec![0xCDu8; 400];
    assert_eq!(connector.output_play(id, &tail).unwrap(), 400);
    assert_eq!(backend.played_len(0), 19_600, "back in steady-state Play, writes go straight through");
}

/// Scenario 2: a 3-entry buffer-descriptor list where the middle entry
/// raises BCIS without halting, and the final (LVI) entry raises
/// LVBCI+DCH+CELV. CIV/PIV tracked via the register read-back added for
/// guest-visible BDL position.
#[test]
fn scenario2_bdl_walk_sets_bcis_then_halts_at_lvi() {
    struct VecMemory(Mutex<Vec<u8>>);
    impl GuestMemory for VecMemory {
        fn read_physical(&self, addr: u64, buf: &mut [u8]) {
            let data = self.0.lock().unwrap();
            let start = addr as usize;
            buf.copy_from_slice(&data[start..start + buf.len()]);
        }
        fn write_physical(&mut self, addr: u64, buf: &[u8]) {
            let mut data = self.0.lock().unwrap();
            let start = addr as usize;
            data[start..start + buf.len()].copy_from_slice(buf);
        }
    }

    fn put_entry(bytes: &mut [u8], index: u8, addr: u32, len_samples: u16, ioc: bool) {
        let off = index as usize * 8;
        bytes[off..off + 4].copy_from_slice(&addr.to_le_bytes());
        let mut ctl = len_samples as u32;
        if ioc {
            ctl |= 1 << 31;
        }
        bytes[off + 4..off + 8].copy_from_slice(&ctl.to_le_bytes());
    }

    let mut raw = vec![0u8; 65_536];
    put_entry(&mut raw, 0, 0x1000, 128, true);
    put_entry(&mut raw, 1, 0x2000, 128, false);
    put_entry(&mut raw, 2, 0x3000, 64, true);
    let mut mem = VecMemory(Mutex::new(raw));

    let pcm = PcmProps::new(2, true, false, 2, 48_000).unwrap();
    let sink = MixerSink::new("dma-out", Direction::Out, pcm, 4096).unwrap();
    let write_state = sink.init_device_write_state();
    let worker = AioWorker::spawn(sink, Vec::new(), Duration::from_secs(3600), Arc::new(NullTelemetry), Arc::new(ManualClock::new()));

    let mut pump = DmaPump::new(Direction::Out, pcm, 4096, 256, PumpCodec::Write(write_state));
    pump.set_bdbar(0);
    pump.set_lvi(2);
    pump.run();

    pump.tick(&mut mem, &worker, &NullTelemetry).unwrap();
    assert_eq!(pump.status(), SR_BCIS);
    assert_eq!(pump.civ(), 1);
    assert_eq!(pump.piv(), 2);

    pump.ack_status(SR_BCIS);
    pump.tick(&mut mem, &worker, &NullTelemetry).unwrap();
    assert_eq!(pump.status(), SR_CELV, "mid-list entry has no IOC, only CELV from reaching CIV==LVI's neighbor");
    assert_eq!(pump.civ(), 2);
    assert_eq!(pump.piv(), 3);

    pump.tick(&mut mem, &worker, &NullTelemetry).unwrap();
    assert_eq!(pump.status(), SR_DCH | SR_CELV | SR_LVBCI | SR_BCIS, "final LVI entry halts the controller");
    assert_eq!(pump.civ(), 2);
    assert_eq!(pump.lvi(), 2);

    // Halted: a further tick makes no progress until the guest acks and
    // restarts.
    pump.tick(&mut mem, &worker, &NullTelemetry).unwrap();
    assert_eq!(pump.status(), SR_DCH | SR_CELV | SR_LVBCI | SR_BCIS);
}

/// Scenario 3: two input streams blended into one sink, using a 4-byte
/// identity PCM format so decode/encode round-trips bit-exactly and the
/// saturating-add result is exact integer arithmetic.
#[test]
fn scenario3_input_blend_of_two_streams_is_exact() {
    let backend = Arc::new(MockBackend::new());
    let pcm = PcmProps::new(4, true, false, 1, 48_000).unwrap();
    let mut sink = MixerSink::new("in-sink", Direction::In, pcm, 4096).unwrap();

    let cfg = BackendStreamCfg { pcm, direction: Direction::In, period_frames: 64, buffer_frames: 1024 };

    let (outcome_a, accepted_a) = backend.stream_create(&cfg).unwrap();
    let StreamCreateOutcome::Ready(handle_a) = outcome_a else { panic!("mock always returns Ready") };
    backend.push_capture(0, &1000i32.to_le_bytes().repeat(4));
    let mut stream_a = MixerStream::new(
        "a",
        backend.clone(),
        handle_a,
        accepted_a,
        StreamCodec::Write(sink.init_device_write_state()),
    );
    stream_a.enable().unwrap();

    let (outcome_b, accepted_b) = backend.stream_create(&cfg).unwrap();
    let StreamCreateOutcome::Ready(handle_b) = outcome_b else { panic!("mock always returns Ready") };
    backend.push_capture(1, &(-500i32).to_le_bytes().repeat(4));
    let mut stream_b = MixerStream::new(
        "b",
        backend.clone(),
        handle_b,
        accepted_b,
        StreamCodec::Write(sink.init_device_write_state()),
    );
    stream_b.enable().unwrap();

    sink.attach_stream(stream_a);
    sink.attach_stream(stream_b);

    let mut scratch = [0u8; audiocore::sink::SCRATCH_BYTES];
    sink.input_update(&mut scratch, &NullTelemetry);

    let mut ring = audiocore_core::ByteRing::new(64);
    let mut peek_state = sink.init_device_peek_state();
    sink.transfer_to_circ_buf(&mut ring, 4, &mut peek_state);

    let mut out = [0u8; 16];
    let n = ring.read_copy(&mut out);
    assert_eq!(n, 16);
    for frame in out.chunks_exact(4) {
        assert_eq!(i32::from_le_bytes(frame.try_into().unwrap()), 500);
    }
}

/// Scenario 4: a drain that outlives its deadline forces every attached
/// stream disabled and resets the sink.
#[test]
fn scenario4_drain_deadline_forces_reset() {
    let backend = Arc::new(MockBackend::new());
    let pcm = stereo_16(48_000);
    let mut sink = MixerSink::new("out-sink", Direction::Out, pcm, 8192).unwrap();
    sink.start();

    let cfg = BackendStreamCfg { pcm, direction: Direction::Out, period_frames: 64, buffer_frames: 1024 };
    let (outcome, accepted) = backend.stream_create(&cfg).unwrap();
    let StreamCreateOutcome::Ready(handle) = outcome else { panic!("mock always returns Ready") };
    let mut stream = MixerStream::new(
        "s",
        backend.clone(),
        handle,
        accepted,
        StreamCodec::Peek(sink.init_device_peek_state()),
    );
    stream.enable().unwrap();
    let id = sink.attach_stream(stream);

    sink.request_drain(9_600, 0, 650_000_000);

    let mut scratch = [0u8; audiocore::sink::SCRATCH_BYTES];
    sink.output_update(&mut scratch, &NullTelemetry, 0);
    assert!(sink.status().draining);
    assert!(sink.stream(id).unwrap().status().enabled);

    sink.output_update(&mut scratch, &NullTelemetry, 1_300_000_000);
    assert!(!sink.status().draining, "deadline exceeded forces a full reset");
    assert!(!sink.status().running);
    assert!(!sink.stream(id).unwrap().status().enabled, "every stream forced disabled on deadline overrun");
}

/// Scenario 5: a device switch mid-playback mirrors into the pre-buffer
/// while still playing straight through, then a successful in-place
/// absorption resets play-state back to buffering instead of straight
/// playback.
#[test]
fn scenario5_device_switch_absorbed_resets_to_prebuf() {
    let backend = Arc::new(MockBackend::new());
    let connector = Connector::new(
        backend.clone(),
        connector_config(1000, 100),
        Arc::new(NullTelemetry),
        Arc::new(ManualClock::new()),
    );

    let pcm = stereo_16(48_000);
    let id = connector.create_stream(Direction::Out, pcm).unwrap();
    connector.control(id, ControlCommand::Enable).unwrap();

    // Drive the stream to steady-state Play exactly like scenario 1.
    let chunk = vec![0xABu8; 9_600];
    connector.output_play(id, &chunk).unwrap();
    connector.output_play(id, &chunk).unwrap();
    connector.output_play(id, &[]).unwrap();
    assert_eq!(backend.played_len(0), 19_200);

    connector.prepare_device_switch();
    let mirrored = vec![0xEFu8; 200];
    assert_eq!(connector.output_play(id, &mirrored).unwrap(), 200);
    assert_eq!(backend.played_len(0), 19_400, "PlayPrebuf still writes straight through");

    backend.set_absorbs_device_change(true);
    let needs_reinit = connector.notify_device_changed();
    assert!(needs_reinit.is_empty(), "absorbed in place, no stream needs reinit");

    // Back in PREBUF: further writes buffer up instead of reaching the backend.
    assert_eq!(connector.output_play(id, &[]).unwrap(), 0);
    assert_eq!(backend.played_len(0), 19_400, "no new bytes reach the backend while re-buffering");
}

/// Scenario 6: re-init is throttled to 5 attempts with a `try_count *
/// 1s` backoff; once exhausted the stream is disabled and further
/// output is silently discarded.
#[test]
fn scenario6_reinit_exhausts_after_five_throttled_attempts() {
    let backend = Arc::new(MockBackend::new());
    let clock = Arc::new(ManualClock::new());
    let connector = Connector::new(backend.clone(), connector_config(1000, 100), Arc::new(NullTelemetry), clock.clone());

    let pcm = stereo_16(48_000);
    let id = connector.create_stream(Direction::Out, pcm).unwrap();
    connector.control(id, ControlCommand::Enable).unwrap();

    backend.set_create_mode(CreateMode::CouldNotCreate);

    let gaps = [0u64, 1, 2, 3, 4];
    for (i, gap) in gaps.iter().enumerate() {
        clock.advance_ns(gap * 1_000_000_000);
        let result = connector.reinit_stream(id);
        if i < 4 {
            assert!(result.is_err(), "attempt {i} should still be retrying");
        } else {
            assert!(result.is_err(), "5th attempt exhausts and reports failure");
        }
    }

    // Exhausted: output is silently discarded, no backend stream exists
    // to receive it.
    let buf = vec![0u8; 128];
    assert_eq!(connector.output_play(id, &buf).unwrap(), 128);
}
