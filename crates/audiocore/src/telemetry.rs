//! Narrow stats seam replacing `STAM_REL_COUNTER_INC`-style registration
//! (§9). Every place the original increments a release counter calls
//! through this trait instead; the concrete stats backend stays external.

/// Counters the core increments at well-known points. A no-op
/// implementation ([`NullTelemetry`]) is the default.
pub trait Telemetry: Send + Sync {
    /// A flow error occurred (silence injected to keep DMA on schedule,
    /// or a ring overrun dropped data).
    fn flow_error(&self) {}
    /// A mixer stream was marked unreliable during an `Update`.
    fn unreliable_stream_marked(&self) {}
    /// A sink's drain exceeded its deadline and was forced.
    fn drain_timeout(&self) {}
    /// A connector stream exhausted its re-init retry budget.
    fn reinit_exhausted(&self) {}
}

/// A [`Telemetry`] implementation that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {}
