//! Per-driver configuration overrides (§6). Reading these from a config
//! file or CLI is out of scope; this is just the value struct the
//! connector's public API receives them through.

/// Direction-specific override keys (`In/<Key>` or `Out/<Key>`, §6).
/// Legacy flat `<Key>In`/`<Key>Out` naming is intentionally not modeled.
#[derive(Debug, Clone, Default)]
pub struct DirectionOverrides {
    /// Override sample bit depth (0/8/16/32/64; `None`/0 ⇒ use default).
    pub pcm_sample_bits: Option<u8>,
    /// Override sample rate in Hz (6000..768000; `None` ⇒ use default).
    pub pcm_sample_hz: Option<u32>,
    /// Override signedness.
    pub pcm_sample_signed: Option<bool>,
    /// Override byte-swap.
    pub pcm_sample_swap_endian: Option<bool>,
    /// Override channel count (≤ 16).
    pub pcm_sample_channels: Option<u8>,
    /// Override period size, milliseconds (≤ 1000).
    pub period_size_ms: Option<u32>,
    /// Override buffer size, milliseconds (≤ 5000).
    pub buffer_size_ms: Option<u32>,
    /// Override pre-buffer size, milliseconds (≤ 1000; `None` ⇒ unset,
    /// use the sink's computed default).
    pub prebuffer_size_ms: Option<u32>,
}

/// Per-driver connector configuration (§6 global keys plus the two
/// direction override blocks).
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Overrides applied to input streams.
    pub input: DirectionOverrides,
    /// Overrides applied to output streams.
    pub output: DirectionOverrides,
    /// Human-readable driver name, used to build unique stream names.
    pub driver_name: String,
    /// Whether input is enabled for this driver instance.
    pub input_enabled: bool,
    /// Whether output is enabled for this driver instance.
    pub output_enabled: bool,
    /// Whether debug instrumentation is enabled.
    pub debug_enabled: bool,
}

impl ConnectorConfig {
    /// A config with both directions enabled, no overrides, debug off.
    pub fn new(driver_name: impl Into<String>) -> Self {
        Self {
            input: DirectionOverrides::default(),
            output: DirectionOverrides::default(),
            driver_name: driver_name.into(),
            input_enabled: true,
            output_enabled: true,
            debug_enabled: false,
        }
    }
}
