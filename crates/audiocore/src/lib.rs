//! Mixer sinks, connector-stream lifecycle and the device DMA pump that sit
//! between an emulated audio device and a host audio backend (§3).
//!
//! `audiocore-core` carries the PCM/mixbuf/ring data-transform logic;
//! this crate carries the threads, locks and state machines that drive it.

pub mod arena;
pub mod backend;
pub mod clock;
pub mod connector;
pub mod dma;
pub mod error;
pub mod sink;
pub mod telemetry;

pub use arena::{Arena, Id};
pub use backend::{
    BackendCfg, BackendSts, BackendState, BackendStreamCfg, BackendStreamHandle, Direction,
    HostAudioBackend, StreamCreateOutcome,
};
pub use clock::{ManualClock, MonotonicClock, SystemClock};
pub use connector::{Connector, StreamId as ConnectorStreamId};
pub use connector::config::{ConnectorConfig, DirectionOverrides};
pub use connector::stream::{ConnectorStream, ControlCommand};
pub use dma::{DmaPump, PumpCodec, SR_BCIS, SR_CELV, SR_DCH, SR_LVBCI};
pub use dma::bdl::{BdlEntry, GuestMemory};
pub use error::{Error, Result};
pub use sink::{MixerSink, SinkStatus, StreamId as SinkStreamId};
pub use sink::aio::AioWorker;
pub use sink::stream::{MixerStream, MixerStreamStatus, StreamCodec};
pub use telemetry::{NullTelemetry, Telemetry};
