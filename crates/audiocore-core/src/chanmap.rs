//! Channel mapping between a mix buffer's internal layout and an
//! external (caller-facing) channel count.

/// One destination channel's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanSrc {
    /// Copy from this source channel index.
    Channel(u8),
    /// Emit digital zero (spec sentinel `-1`).
    Zero,
    /// Emit the format's silence midpoint (spec sentinel `-2`), used for
    /// unsigned sample formats where "silence" is the representable
    /// midpoint rather than all-zero bits.
    Midpoint,
}

/// An index-based channel map: one [`ChanSrc`] per destination channel.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    entries: Vec<ChanSrc>,
}

impl ChannelMap {
    /// Build a channel map selecting source channels for each
    /// destination channel by index; destination channels beyond the
    /// source's count emit zero.
    pub fn build(src_channels: u8, dst_channels: u8) -> Self {
        let entries = (0..dst_channels)
            .map(|ch| {
                if ch < src_channels {
                    ChanSrc::Channel(ch)
                } else {
                    ChanSrc::Zero
                }
            })
            .collect();
        Self { entries }
    }

    /// Build an identity map (each destination channel copies the same
    /// source channel index). Used when `src_channels == dst_channels`.
    pub fn identity(channels: u8) -> Self {
        Self {
            entries: (0..channels).map(ChanSrc::Channel).collect(),
        }
    }

    /// Mono downmix: every destination channel reads source channel 0.
    pub fn mono_source(dst_channels: u8) -> Self {
        Self {
            entries: (0..dst_channels).map(|_| ChanSrc::Channel(0)).collect(),
        }
    }

    /// Number of destination channels this map produces.
    pub fn dst_channels(&self) -> usize {
        self.entries.len()
    }

    /// The source for a given destination channel.
    pub fn entry(&self, dst_channel: usize) -> ChanSrc {
        self.entries[dst_channel]
    }

    /// Iterate all entries in destination-channel order.
    pub fn iter(&self) -> impl Iterator<Item = ChanSrc> + '_ {
        self.entries.iter().copied()
    }
}
