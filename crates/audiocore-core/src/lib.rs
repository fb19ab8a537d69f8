//! PCM properties, volume, rate conversion, channel mapping and the
//! mix-buffer ring that a mixer sink drives directly (§3, §4.1).
//!
//! This crate carries no threads and no I/O: it is pure data-transform
//! logic, kept separate so it can be fuzzed and property-tested in
//! isolation from the sink/connector/device machinery in `audiocore`.

pub mod chanmap;
pub mod codec;
pub mod error;
pub mod mixbuf;
pub mod pcm;
pub mod rate;
pub mod ring;
pub mod volume;

pub use chanmap::{ChanSrc, ChannelMap};
pub use error::{Error, Result};
pub use mixbuf::{MixBuffer, PeekState, WriteState};
pub use pcm::PcmProps;
pub use rate::{RateConv, RateKind};
pub use ring::ByteRing;
pub use volume::Volume;
