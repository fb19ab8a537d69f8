//! A named, direction-typed container of mixer streams sharing one mix
//! buffer (component D, §4.2).

pub mod aio;
pub mod stream;

use audiocore_core::{ByteRing, MixBuffer, PcmProps, Volume, codec};

use crate::arena::{Arena, Id};
use crate::backend::Direction;
use crate::telemetry::Telemetry;
use stream::{MixerStream, StreamCodec};

/// Size of the AIO worker's stack-local scratch buffer, matching the
/// original's `uint8_t abBuf[_8K]` (§4 supplement).
pub const SCRATCH_BYTES: usize = 8192;

/// Status bits public to the device DMA pump (§6), modeled as explicit
/// flags rather than a bitset per §9.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStatus {
    /// The sink is actively moving data.
    pub running: bool,
    /// A drain has been requested and is in progress.
    pub draining: bool,
    /// The device side has handed over its last byte for this drain.
    pub drained_dma: bool,
    /// The mix buffer went empty while draining and the backend was told
    /// to drain.
    pub drained_mixbuf: bool,
    /// The sink has unflushed mix-buffer content.
    pub dirty: bool,
}

/// An identifier for a [`MixerStream`] attached to a sink.
pub type StreamId = Id;

/// A mixer sink: one mix buffer, N backend-facing mixer streams, one AIO
/// worker loop driving transfers between them.
pub struct MixerSink {
    direction: Direction,
    name: String,
    mixbuf: MixBuffer,
    pcm: PcmProps,
    streams: Arena<MixerStream>,
    volume: Volume,
    status: SinkStatus,
    prebuf_threshold_bytes: usize,
    drain_start_ns: u64,
    drain_deadline_ns: u64,
    dma_bytes_left_to_drain: u64,
}

impl MixerSink {
    /// Create a sink with a fresh mix buffer.
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        pcm: PcmProps,
        mixbuf_capacity_frames: usize,
    ) -> audiocore_core::Result<Self> {
        let name = name.into();
        let mixbuf = MixBuffer::new(name.clone(), pcm.channels(), pcm.hz(), mixbuf_capacity_frames)?;
        Ok(Self {
            direction,
            name,
            mixbuf,
            pcm,
            streams: Arena::new(),
            volume: Volume::unity(pcm.channels()),
            status: SinkStatus::default(),
            prebuf_threshold_bytes: 0,
            drain_start_ns: 0,
            drain_deadline_ns: 0,
            dma_bytes_left_to_drain: 0,
        })
    }

    /// The sink's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sink's direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The sink's guest-device-facing PCM format.
    pub fn pcm(&self) -> PcmProps {
        self.pcm
    }

    /// Current status flags.
    pub fn status(&self) -> SinkStatus {
        self.status
    }

    /// Attach a mixer stream, returning its id.
    pub fn attach_stream(&mut self, stream: MixerStream) -> StreamId {
        self.mixbuf.set_volume(self.volume);
        self.streams.insert(stream)
    }

    /// Detach and return a previously attached stream.
    pub fn detach_stream(&mut self, id: StreamId) -> Option<MixerStream> {
        self.streams.remove(id)
    }

    /// Borrow a stream by id.
    pub fn stream(&self, id: StreamId) -> Option<&MixerStream> {
        self.streams.get(id)
    }

    /// Set the sink's combined volume.
    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
        self.mixbuf.set_volume(volume);
    }

    /// Start the sink (`NONE → RUNNING`).
    pub fn start(&mut self) {
        self.status.running = true;
    }

    /// Request a drain (output only). A zero `dma_bytes_left` is treated
    /// as already-drained and this is a no-op.
    pub fn request_drain(&mut self, dma_bytes_left: u64, now_ns: u64, deadline_ns: u64) {
        if self.direction != Direction::Out || dma_bytes_left == 0 {
            return;
        }
        self.status.draining = true;
        self.dma_bytes_left_to_drain = dma_bytes_left;
        self.drain_start_ns = now_ns;
        self.drain_deadline_ns = now_ns + deadline_ns;
    }

    /// Reset the sink to `NONE`: stop, drop mix-buffer content, clear
    /// drain state.
    pub fn reset(&mut self) {
        self.status = SinkStatus::default();
        self.mixbuf.drop_contents();
        self.dma_bytes_left_to_drain = 0;
    }

    /// Decrement the drain byte counter as DMA hands bytes to the sink;
    /// sets `drained_dma` once it reaches zero.
    pub fn note_dma_drained(&mut self, bytes: u64) {
        self.dma_bytes_left_to_drain = self.dma_bytes_left_to_drain.saturating_sub(bytes);
        if self.dma_bytes_left_to_drain == 0 {
            self.status.drained_dma = true;
        }
    }

    /// Run one output update (§4.2.1). `scratch` is the AIO worker's
    /// reusable 8 KiB buffer.
    pub fn output_update(&mut self, scratch: &mut [u8; SCRATCH_BYTES], telemetry: &dyn Telemetry, now_ns: u64) {
        debug_assert_eq!(self.direction, Direction::Out);
        for (_, stream) in self.streams.iter_mut() {
            stream.clear_unreliable();
            stream.refresh_status();
        }

        let mut candidates: Vec<(StreamId, usize)> = Vec::new();
        for (id, stream) in self.streams.iter() {
            if !stream.status().enabled || !stream.status().can_write {
                continue;
            }
            let backend_frame = stream.backend_cfg().pcm.frame_size().max(1);
            let backend_frames = stream.backend_writable() / backend_frame;
            let sink_frames = frames_at_rate(backend_frames, self.mixbuf.hz(), stream.backend_cfg().pcm.hz());
            candidates.push((id, sink_frames));
        }

        let mut transfer = reliable_min(&candidates, &self.streams);
        if transfer == 0 && candidates.len() > 1 && self.mixbuf.free() > 2 {
            if let Some(&(smallest, _)) = candidates.iter().min_by_key(|(_, f)| *f) {
                if let Some(s) = self.streams.get_mut(smallest) {
                    s.mark_unreliable();
                    telemetry.unreliable_stream_marked();
                }
            }
            transfer = reliable_min(&candidates, &self.streams);
        }

        if !candidates.is_empty() && transfer > 0 {
            for (id, _) in &candidates {
                let mixbuf = &self.mixbuf;
                let Some(stream) = self.streams.get_mut(*id) else { continue };
                let StreamCodec::Peek(peek_state) = stream.codec_mut() else { continue };
                let mut produced = 0usize;
                while produced < transfer {
                    let (peeked, bytes) = mixbuf.peek(produced, transfer - produced, peek_state, scratch);
                    if peeked == 0 {
                        break;
                    }
                    match stream.play(&scratch[..bytes]) {
                        Ok(_) => {}
                        Err(crate::error::Error::StreamNotReady) => {
                            tracing::debug!(stream = stream.name(), "backend not ready, pausing this stream's transfer");
                            break;
                        }
                        Err(err) => {
                            tracing::warn!(stream = stream.name(), error = %err, "backend play failed");
                            break;
                        }
                    }
                    produced += peeked;
                }
            }
            self.mixbuf.advance(transfer);
        } else if candidates.is_empty() {
            self.mixbuf.drop_contents();
        }

        self.drain_tick(now_ns);
    }

    fn drain_tick(&mut self, now_ns: u64) {
        if !self.status.draining {
            return;
        }
        if now_ns > self.drain_deadline_ns {
            for (_, stream) in self.streams.iter_mut() {
                let _ = stream.disable();
            }
            self.reset();
            return;
        }
        if !self.status.drained_mixbuf && !self.status.dirty && self.mixbuf.used() == 0 {
            self.status.drained_mixbuf = true;
            for (_, stream) in self.streams.iter_mut() {
                let _ = stream.drain();
            }
        }
        let all_disabled = self.streams.iter().all(|(_, s)| !s.status().enabled);
        if self.status.drained_mixbuf && all_disabled && !self.streams.is_empty() {
            self.reset();
        }
    }

    /// Run one input update (§4.2.2).
    pub fn input_update(&mut self, scratch: &mut [u8; SCRATCH_BYTES], telemetry: &dyn Telemetry) {
        debug_assert_eq!(self.direction, Direction::In);
        for (_, stream) in self.streams.iter_mut() {
            stream.clear_unreliable();
            stream.refresh_status();
        }

        let mut candidates: Vec<(StreamId, usize)> = Vec::new();
        for (id, stream) in self.streams.iter() {
            if !stream.status().enabled || !stream.status().can_read {
                continue;
            }
            let backend_frame = stream.backend_cfg().pcm.frame_size().max(1);
            let backend_frames = stream.backend_readable() / backend_frame;
            let sink_frames = frames_at_rate(backend_frames, self.mixbuf.hz(), stream.backend_cfg().pcm.hz());
            candidates.push((id, sink_frames));
        }

        let transfer = reliable_min(&candidates, &self.streams);
        if candidates.is_empty() || transfer == 0 {
            return;
        }

        let mut first = true;
        for (id, _) in &candidates {
            let Some(stream) = self.streams.get_mut(*id) else { continue };
            let backend_frame_size = stream.backend_cfg().pcm.frame_size();
            let ext_props = stream.backend_cfg().pcm;
            let max_bytes = scratch.len().min(transfer * backend_frame_size.max(1));
            let captured = stream.capture(&mut scratch[..max_bytes]).unwrap_or(0);
            let captured_frames = captured / backend_frame_size.max(1);

            let StreamCodec::Write(write_state) = stream.codec_mut() else { continue };
            let silent = captured_frames > 0 && is_silent(&scratch[..captured], ext_props);

            if first {
                if silent && write_state_is_identity(write_state) {
                    write_state.blend_gap(captured_frames as u64);
                } else if captured_frames > 0 {
                    self.mixbuf.write(write_state, &scratch[..captured], 0, captured_frames);
                }
                if captured_frames < transfer {
                    let remainder = transfer - captured_frames;
                    let silence = silence_bytes(ext_props, remainder);
                    self.mixbuf.write(write_state, &silence, captured_frames, remainder);
                }
            } else if silent && write_state_is_identity(write_state) {
                write_state.blend_gap(captured_frames as u64);
                if captured_frames < transfer {
                    write_state.blend_gap((transfer - captured_frames) as u64);
                }
            } else {
                if captured_frames > 0 {
                    self.mixbuf.blend(write_state, &scratch[..captured], 0, captured_frames);
                }
                if captured_frames < transfer {
                    let remainder = transfer - captured_frames;
                    write_state.blend_gap(remainder as u64);
                }
            }
            first = false;
        }

        self.mixbuf.commit(transfer);
        let _ = telemetry;
    }

    /// Build the write state the device DMA pump uses to encode its own
    /// guest-facing PCM format into this sink's mix buffer (§4.2.4).
    pub fn init_device_write_state(&self) -> audiocore_core::WriteState {
        self.mixbuf.init_write_state(self.pcm)
    }

    /// Build the peek state the device DMA pump uses to decode this
    /// sink's mix buffer into its own guest-facing PCM format (§4.2.4).
    pub fn init_device_peek_state(&self) -> audiocore_core::PeekState {
        self.mixbuf.init_peek_state(self.pcm)
    }

    /// Transfer from the device's per-stream ring into this output
    /// sink's mix buffer (§4.2.4).
    pub fn transfer_from_circ_buf(&mut self, ring: &mut ByteRing, frame_size: usize, write_state: &mut audiocore_core::WriteState) -> usize {
        debug_assert_eq!(self.direction, Direction::Out);
        if frame_size == 0 {
            return 0;
        }
        let sink_writable_frames = self.mixbuf.writable();
        let ring_readable_frames = ring.readable() / frame_size;
        let to_move = sink_writable_frames.min(ring_readable_frames);
        if to_move == 0 {
            return 0;
        }
        let byte_count = to_move * frame_size;
        let mut scratch = vec![0u8; byte_count];
        ring.read_copy(&mut scratch);
        let written = self.mixbuf.write(write_state, &scratch, 0, to_move);
        self.mixbuf.commit(written);
        let transferred_bytes = written * frame_size;
        if self.status.draining && !self.status.drained_dma {
            self.note_dma_drained(transferred_bytes as u64);
        }
        transferred_bytes
    }

    /// Transfer from this input sink's mix buffer into the device's
    /// per-stream ring (§4.2.4).
    pub fn transfer_to_circ_buf(&mut self, ring: &mut ByteRing, frame_size: usize, peek_state: &mut audiocore_core::PeekState) -> usize {
        debug_assert_eq!(self.direction, Direction::In);
        if frame_size == 0 {
            return 0;
        }
        let sink_readable_frames = self.mixbuf.readable();
        let ring_writable_frames = ring.writable() / frame_size;
        let to_move = sink_readable_frames.min(ring_writable_frames);
        if to_move == 0 {
            return 0;
        }
        let mut scratch = vec![0u8; to_move * frame_size];
        let (peeked, bytes) = self.mixbuf.peek(0, to_move, peek_state, &mut scratch);
        ring.write_copy(&scratch[..bytes]);
        self.mixbuf.advance(peeked);
        bytes
    }
}

fn reliable_min(candidates: &[(StreamId, usize)], streams: &Arena<MixerStream>) -> usize {
    candidates
        .iter()
        .filter(|(id, _)| streams.get(*id).map(|s| !s.is_unreliable()).unwrap_or(false))
        .map(|(_, f)| *f)
        .min()
        .unwrap_or(0)
}

fn frames_at_rate(count: usize, dst_hz: u32, src_hz: u32) -> usize {
    if src_hz == 0 {
        return 0;
    }
    (count as u64 * dst_hz as u64 / src_hz as u64) as usize
}

fn is_silent(bytes: &[u8], props: PcmProps) -> bool {
    let sample_size = props.sample_size() as usize;
    if sample_size == 0 || bytes.len() < sample_size {
        return true;
    }
    let mut zero = vec![0u8; sample_size];
    codec::zero_sample(&mut zero, &props);
    bytes.chunks_exact(sample_size).all(|c| c == zero.as_slice())
}

fn silence_bytes(props: PcmProps, frames: usize) -> Vec<u8> {
    let sample_size = props.sample_size() as usize;
    let mut zero = vec![0u8; sample_size];
    codec::zero_sample(&mut zero, &props);
    let frame_size = props.frame_size();
    let mut out = vec![0u8; frames * frame_size];
    for chunk in out.chunks_mut(sample_size) {
        chunk.copy_from_slice(&zero);
    }
    out
}

fn write_state_is_identity(state: &audiocore_core::WriteState) -> bool {
    state.rate_kind() == audiocore_core::RateKind::Identity
}
