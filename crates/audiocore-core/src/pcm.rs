//! PCM stream properties.
//!
//! [`PcmProps`] is a value object describing the wire format of a PCM
//! stream: sample size, signedness, endianness, channel layout and rate.
//! It carries no buffers and no state — it is cheap to copy and compare.

use crate::error::{Error, Result};

/// Maximum channel count a [`PcmProps`] may describe.
pub const MAX_CHANNELS: u8 = 16;

/// Minimum accepted sample rate, in Hz.
pub const MIN_HZ: u32 = 6_000;

/// Maximum accepted sample rate, in Hz.
pub const MAX_HZ: u32 = 768_000;

/// Sample byte sizes `audiocore` understands.
const VALID_SAMPLE_SIZES: [u8; 4] = [1, 2, 4, 8];

/// Describes the wire format of a PCM stream.
///
/// Frame size is `sample_size * channels` bytes; helpers below convert
/// between frames, bytes, milliseconds and nanoseconds using that frame
/// size and `hz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmProps {
    sample_size: u8,
    signed: bool,
    swap_endian: bool,
    channels: u8,
    hz: u32,
}

impl PcmProps {
    /// Construct PCM properties, validating ranges per spec §3.
    ///
    /// Returns [`Error::ConfigInvalid`] for an unsupported sample size,
    /// zero or over-limit channel count, or an out-of-range sample rate.
    pub fn new(
        sample_size: u8,
        signed: bool,
        swap_endian: bool,
        channels: u8,
        hz: u32,
    ) -> Result<Self> {
        if !VALID_SAMPLE_SIZES.contains(&sample_size) {
            return Err(Error::ConfigInvalid("sample size must be 1, 2, 4 or 8 bytes"));
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::ConfigInvalid("channel count must be 1..=16"));
        }
        if !(MIN_HZ..=MAX_HZ).contains(&hz) {
            return Err(Error::ConfigInvalid("sample rate out of range (6000..768000)"));
        }
        Ok(Self {
            sample_size,
            signed,
            swap_endian,
            channels,
            hz,
        })
    }

    /// Internal mix-buffer format: signed 32-bit samples at `hz`/`channels`.
    pub fn mixbuf_format(channels: u8, hz: u32) -> Result<Self> {
        Self::new(4, true, false, channels, hz)
    }

    /// Sample byte size (1, 2, 4 or 8).
    pub fn sample_size(&self) -> u8 {
        self.sample_size
    }

    /// Whether samples are signed.
    pub fn signed(&self) -> bool {
        self.signed
    }

    /// Whether samples are byte-swapped relative to host endianness.
    pub fn swap_endian(&self) -> bool {
        self.swap_endian
    }

    /// Channel count (1..=16).
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Sample rate in Hz.
    pub fn hz(&self) -> u32 {
        self.hz
    }

    /// Frame size in bytes: `sample_size * channels`.
    pub fn frame_size(&self) -> usize {
        self.sample_size as usize * self.channels as usize
    }

    /// Convert a frame count to a byte count.
    pub fn frames_to_bytes(&self, frames: u64) -> u64 {
        frames * self.frame_size() as u64
    }

    /// Convert a byte count to a frame count (floor).
    pub fn bytes_to_frames(&self, bytes: u64) -> u64 {
        bytes / self.frame_size() as u64
    }

    /// Floor a byte count down to the nearest whole frame.
    pub fn floor_bytes_to_frame(&self, bytes: u64) -> u64 {
        self.bytes_to_frames(bytes) * self.frame_size() as u64
    }

    /// Convert a frame count to a duration in nanoseconds.
    pub fn frames_to_ns(&self, frames: u64) -> u64 {
        frames * 1_000_000_000 / self.hz as u64
    }

    /// Convert a duration in nanoseconds to a frame count (floor).
    pub fn ns_to_frames(&self, ns: u64) -> u64 {
        ns * self.hz as u64 / 1_000_000_000
    }

    /// Convert a frame count to a duration in milliseconds.
    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        frames * 1000 / self.hz as u64
    }

    /// Convert a duration in milliseconds to a frame count (floor).
    pub fn ms_to_frames(&self, ms: u64) -> u64 {
        ms * self.hz as u64 / 1000
    }

    /// Convert a byte count to a duration in nanoseconds.
    pub fn bytes_to_ns(&self, bytes: u64) -> u64 {
        self.frames_to_ns(self.bytes_to_frames(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_sample_size() {
        assert!(PcmProps::new(3, true, false, 2, 48_000).is_err());
    }

    #[test]
    fn rejects_channel_overflow() {
        assert!(PcmProps::new(2, true, false, 17, 48_000).is_err());
        assert!(PcmProps::new(2, true, false, 0, 48_000).is_err());
    }

    #[test]
    fn rejects_rate_out_of_range() {
        assert!(PcmProps::new(2, true, false, 2, 5_999).is_err());
        assert!(PcmProps::new(2, true, false, 2, 768_001).is_err());
    }

    #[test]
    fn frame_and_byte_conversions() {
        let props = PcmProps::new(2, true, false, 2, 48_000).unwrap();
        assert_eq!(props.frame_size(), 4);
        assert_eq!(props.frames_to_bytes(100), 400);
        assert_eq!(props.bytes_to_frames(400), 100);
        assert_eq!(props.frames_to_ms(48_000), 1000);
        assert_eq!(props.ms_to_frames(1000), 48_000);
        assert_eq!(props.frames_to_ns(48_000), 1_000_000_000);
    }

    #[test]
    fn floor_bytes_to_frame_rounds_down() {
        let props = PcmProps::new(2, true, false, 2, 48_000).unwrap();
        assert_eq!(props.floor_bytes_to_frame(401), 400);
    }
}
