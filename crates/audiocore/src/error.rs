//! Error taxonomy for the sink/connector/DMA layers (spec §7).

/// Errors produced by `audiocore`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture was attempted on an un-initialized or re-initializing input
    /// stream. Play on output silently discards instead of returning this.
    #[error("stream not ready")]
    StreamNotReady,

    /// `Create` was called while the direction's free-slot budget was zero.
    #[error("no free slots for this direction")]
    NoFreeSlots,

    /// A backend call was attempted while the hot-plug pointer is absent.
    /// Treated as transient by callers; the stream stays in its last state.
    #[error("backend not attached")]
    BackendNotAttached,

    /// `Create`/`ReInit` reported an unrecoverable backend failure. The
    /// caller replaces the backend with a null stub.
    #[error("backend init failed: {0}")]
    BackendInitFailed(String),

    /// `StreamCreate` returned the specific missing-hardware code.
    #[error("backend could not create the stream")]
    StreamCouldNotCreate,

    /// The requested PCM configuration failed validation.
    #[error("invalid stream configuration: {0}")]
    ConfigInvalid(String),

    /// A pre-buffer commit found the backend still not ready past
    /// threshold; callers transition to `PREBUF_OVERDUE` rather than
    /// failing on this.
    #[error("pre-buffer overflowed while waiting for the backend")]
    BufferOverflow,

    /// A drain exceeded its deadline; every stream of the sink is forced
    /// to `DISABLE`.
    #[error("drain exceeded its deadline")]
    DrainTimeout,

    /// Untrusted guest-supplied data (a BDL entry, a physical address)
    /// failed a sanity check. Always downgrades to a log event; callers
    /// must never let this propagate as a hard failure or panic (§9).
    #[error("guest supplied invalid input: {0}")]
    GuestInputError(String),

    /// A lower-level mix-buffer/rate-conversion/PCM-validation failure.
    #[error(transparent)]
    Core(#[from] audiocore_core::Error),
}

/// Convenience result type for `audiocore`.
pub type Result<T> = std::result::Result<T, Error>;
