//! Error types for PCM validation, rate conversion and the mix buffer.

/// Errors produced by `audiocore-core`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A requested PCM configuration failed range validation.
    #[error("invalid PCM configuration: {0}")]
    ConfigInvalid(&'static str),

    /// A mix-buffer operation was asked to move more frames than available.
    #[error("mix buffer operation out of range: {0}")]
    OutOfRange(&'static str),
}

/// Convenience result type for `audiocore-core`.
pub type Result<T> = core::result::Result<T, Error>;
