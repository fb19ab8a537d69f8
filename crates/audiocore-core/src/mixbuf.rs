//! The mix buffer: a fixed-size ring of interleaved signed-32-bit
//! frames at the sink's rate/channel layout, plus the peek/write state
//! bound to it (§3, §4.1).

use crate::chanmap::{ChanSrc, ChannelMap};
use crate::codec::{decode_sample, encode_sample};
use crate::error::{Error, Result};
use crate::pcm::PcmProps;
use crate::rate::RateConv;
use crate::volume::Volume;

/// Per-reader decode state bound to one (mix buffer, external PCM
/// layout) pair. Recreate on any format change (§3).
#[derive(Debug, Clone)]
pub struct PeekState {
    rate: RateConv,
    chan_map: ChannelMap,
    ext_props: PcmProps,
    int_channels: u8,
}

impl PeekState {
    fn new(int_channels: u8, int_hz: u32, ext_props: PcmProps) -> Self {
        Self {
            rate: RateConv::new(int_hz, ext_props.hz(), int_channels as usize),
            chan_map: ChannelMap::build(int_channels, ext_props.channels()),
            ext_props,
            int_channels,
        }
    }

    /// The external PCM format this state decodes into.
    pub fn ext_props(&self) -> PcmProps {
        self.ext_props
    }

    /// Which rate-conversion path this state takes.
    pub fn rate_kind(&self) -> crate::rate::RateKind {
        self.rate.kind()
    }
}

/// Per-writer encode state bound to one (mix buffer, external PCM
/// layout) pair. Recreate on any format change (§3).
#[derive(Debug, Clone)]
pub struct WriteState {
    rate: RateConv,
    chan_map: ChannelMap,
    ext_props: PcmProps,
    int_channels: u8,
}

impl WriteState {
    fn new(int_channels: u8, int_hz: u32, ext_props: PcmProps) -> Self {
        Self {
            rate: RateConv::new(ext_props.hz(), int_hz, int_channels as usize),
            chan_map: ChannelMap::build(ext_props.channels(), int_channels),
            ext_props,
            int_channels,
        }
    }

    /// The external PCM format this state encodes from.
    pub fn ext_props(&self) -> PcmProps {
        self.ext_props
    }

    /// Advance the rate-conversion phase as if `src_frames` of silence
    /// had passed through, without touching any mix-buffer samples.
    /// Keeps resampler phase aligned when a source is known silent.
    pub fn blend_gap(&mut self, src_frames: u64) {
        self.rate.advance_silent(src_frames);
    }

    /// Which rate-conversion path this state takes.
    pub fn rate_kind(&self) -> crate::rate::RateKind {
        self.rate.kind()
    }
}

/// A fixed-size ring of interleaved signed-32-bit frames.
pub struct MixBuffer {
    name: String,
    channels: u8,
    hz: u32,
    capacity: usize,
    samples: Vec<i32>,
    read: usize,
    write: usize,
    used: usize,
    volume: Volume,
}

impl MixBuffer {
    /// Allocate a mix buffer with `capacity_frames` of storage at
    /// `channels`/`hz`. Contents start zeroed, cursors at zero, volume
    /// at unity.
    pub fn new(name: impl Into<String>, channels: u8, hz: u32, capacity_frames: usize) -> Result<Self> {
        if channels == 0 {
            return Err(Error::ConfigInvalid("mix buffer channel count must be >= 1"));
        }
        Ok(Self {
            name: name.into(),
            channels,
            hz,
            capacity: capacity_frames,
            samples: vec![0i32; capacity_frames * channels as usize],
            read: 0,
            write: 0,
            used: 0,
            volume: Volume::unity(channels),
        })
    }

    /// The buffer's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity in frames.
    pub fn size(&self) -> usize {
        self.capacity
    }

    /// Frames currently holding data.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Frames of free space.
    pub fn free(&self) -> usize {
        self.capacity - self.used
    }

    /// Alias for [`MixBuffer::used`]: frames a reader may peek.
    pub fn readable(&self) -> usize {
        self.used
    }

    /// Alias for [`MixBuffer::free`]: frames a writer may commit.
    pub fn writable(&self) -> usize {
        self.free()
    }

    /// The buffer's internal channel count.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// The buffer's internal sample rate.
    pub fn hz(&self) -> u32 {
        self.hz
    }

    /// Set the volume applied by subsequent [`MixBuffer::peek`] calls.
    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    /// Current volume.
    pub fn volume(&self) -> Volume {
        self.volume
    }

    /// Build a decoder from the internal format to `props`.
    pub fn init_peek_state(&self, props: PcmProps) -> PeekState {
        PeekState::new(self.channels, self.hz, props)
    }

    /// Build an encoder from `props` to the internal format.
    pub fn init_write_state(&self, props: PcmProps) -> WriteState {
        WriteState::new(self.channels, self.hz, props)
    }

    /// Read up to `min(cMaxSrc, used - off_src_frame)` source frames
    /// starting at `(read + off_src_frame) mod capacity`, apply volume,
    /// rate-convert and channel-map into `dst`, encoding each sample in
    /// `state`'s external format. Does not advance the read cursor.
    ///
    /// Returns `(src_frames_peeked, dst_bytes_written)`.
    pub fn peek(
        &self,
        off_src_frame: usize,
        max_src_frames: usize,
        state: &mut PeekState,
        dst: &mut [u8],
    ) -> (usize, usize) {
        let avail = self.used.saturating_sub(off_src_frame);
        let to_read = max_src_frames.min(avail);
        if to_read == 0 {
            return (0, 0);
        }

        let channels = self.channels as usize;
        let mut internal = vec![0i32; to_read * channels];
        self.read_ring(self.read, off_src_frame, to_read, &mut internal);
        apply_volume(&mut internal, channels, &self.volume);

        let ext_frame_size = state.ext_props.frame_size();
        let max_ext_frames = dst.len() / ext_frame_size;
        if max_ext_frames == 0 {
            return (0, 0);
        }

        let mut resampled = vec![0i32; max_ext_frames * channels];
        let (consumed, produced) = state.rate.convert(&internal, to_read, &mut resampled);

        let ext_channels = state.chan_map.dst_channels();
        for f in 0..produced {
            for (dst_ch, src) in (0..ext_channels).zip(state.chan_map.iter()) {
                let raw = &mut dst[(f * ext_channels + dst_ch) * state.ext_props.sample_size() as usize
                    ..(f * ext_channels + dst_ch + 1) * state.ext_props.sample_size() as usize];
                match src {
                    ChanSrc::Channel(idx) if (idx as usize) < channels => {
                        encode_sample(resampled[f * channels + idx as usize], raw, &state.ext_props);
                    }
                    ChanSrc::Channel(_) | ChanSrc::Zero => raw.fill(0),
                    ChanSrc::Midpoint => encode_sample(0, raw, &state.ext_props),
                }
            }
        }

        (consumed, produced * ext_frame_size)
    }

    /// Advance the read cursor by `frames`, decreasing `used`. Must not
    /// exceed `used`.
    pub fn advance(&mut self, frames: usize) {
        debug_assert!(frames <= self.used, "advance past readable frames");
        let frames = frames.min(self.used);
        self.read = (self.read + frames) % self.capacity.max(1);
        self.used -= frames;
    }

    /// Decode `src` through `state` and assign it at
    /// `(write + off_dst_frame) mod capacity`, up to `max_dst_frames`.
    /// Does not advance the write cursor. Returns frames written.
    pub fn write(
        &mut self,
        state: &mut WriteState,
        src: &[u8],
        off_dst_frame: usize,
        max_dst_frames: usize,
    ) -> usize {
        self.write_or_blend(state, src, off_dst_frame, max_dst_frames, false)
    }

    /// Like [`MixBuffer::write`] but saturating-adds into existing
    /// samples instead of overwriting (multi-stream input mixing).
    pub fn blend(
        &mut self,
        state: &mut WriteState,
        src: &[u8],
        off_dst_frame: usize,
        max_dst_frames: usize,
    ) -> usize {
        self.write_or_blend(state, src, off_dst_frame, max_dst_frames, true)
    }

    fn write_or_blend(
        &mut self,
        state: &mut WriteState,
        src: &[u8],
        off_dst_frame: usize,
        max_dst_frames: usize,
        blend: bool,
    ) -> usize {
        let ext_frame_size = state.ext_props.frame_size();
        if ext_frame_size == 0 {
            return 0;
        }
        let src_frames = src.len() / ext_frame_size;
        if src_frames == 0 {
            return 0;
        }

        let channels = self.channels as usize;
        let src_channels = state.ext_props.channels() as usize;
        let sample_size = state.ext_props.sample_size() as usize;
        let mut decoded = vec![0i32; src_frames * channels];
        for f in 0..src_frames {
            for (int_ch, srcmap) in state.chan_map.iter().enumerate() {
                let v = match srcmap {
                    ChanSrc::Channel(ext_idx) if (ext_idx as usize) < src_channels => {
                        let start = (f * src_channels + ext_idx as usize) * sample_size;
                        decode_sample(&src[start..start + sample_size], &state.ext_props)
                    }
                    ChanSrc::Channel(_) | ChanSrc::Zero | ChanSrc::Midpoint => 0,
                };
                decoded[f * channels + int_ch] = v;
            }
        }

        let mut converted = vec![0i32; max_dst_frames * channels];
        let (_consumed, produced) = state.rate.convert(&decoded, src_frames, &mut converted);
        let write_frames = produced.min(max_dst_frames);

        self.write_ring(self.write, off_dst_frame, write_frames, &converted, blend);
        write_frames
    }

    /// Advance `state`'s rate-conversion phase as if `frames` of
    /// silence had been blended, without touching mix-buffer samples.
    pub fn blend_gap(&self, state: &mut WriteState, frames: u64) {
        state.blend_gap(frames);
    }

    /// Advance the write cursor and increase `used` by `frames`. Must
    /// not cause `used > capacity`.
    pub fn commit(&mut self, frames: usize) {
        debug_assert!(self.used + frames <= self.capacity, "commit overflows capacity");
        let frames = frames.min(self.capacity.saturating_sub(self.used));
        self.write = (self.write + frames) % self.capacity.max(1);
        self.used += frames;
    }

    /// Drop all buffered content: `used = 0`, `read = write`.
    pub fn drop_contents(&mut self) {
        self.used = 0;
        self.read = self.write;
    }

    fn read_ring(&self, base: usize, off_frames: usize, count: usize, out: &mut [i32]) {
        let channels = self.channels as usize;
        let cap = self.capacity;
        let start = (base + off_frames) % cap.max(1);
        for i in 0..count {
            let idx = (start + i) % cap;
            out[i * channels..(i + 1) * channels]
                .copy_from_slice(&self.samples[idx * channels..(idx + 1) * channels]);
        }
    }

    fn write_ring(&mut self, base: usize, off_frames: usize, count: usize, src: &[i32], blend: bool) {
        let channels = self.channels as usize;
        let cap = self.capacity;
        let start = (base + off_frames) % cap.max(1);
        for i in 0..count {
            let idx = (start + i) % cap;
            let dst = &mut self.samples[idx * channels..(idx + 1) * channels];
            let s = &src[i * channels..(i + 1) * channels];
            if blend {
                for ch in 0..channels {
                    dst[ch] = dst[ch].saturating_add(s[ch]);
                }
            } else {
                dst.copy_from_slice(s);
            }
        }
    }
}

fn apply_volume(internal: &mut [i32], channels: usize, volume: &Volume) {
    if channels == 0 {
        return;
    }
    for frame in internal.chunks_mut(channels) {
        for (ch, sample) in frame.iter_mut().enumerate() {
            let gain = volume.linear_gain(ch);
            *sample = (*sample as f64 * gain).round() as i32;
        }
    }
}
