//! One backend-facing stream attached to a sink (component C).

use std::sync::Arc;

use audiocore_core::{PeekState, WriteState};

use crate::backend::{BackendState, BackendStreamCfg, BackendStreamHandle, HostAudioBackend};

/// Status bits derived from the backend's reported state (§3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerStreamStatus {
    /// The stream has been told to run.
    pub enabled: bool,
    /// The backend currently has capturable data (input streams).
    pub can_read: bool,
    /// The backend currently has room for more data (output streams).
    pub can_write: bool,
}

/// Per-direction codec/rate state a mixer stream carries, bound to the
/// sink's mix buffer and the stream's own backend PCM format.
pub enum StreamCodec {
    /// Output stream: decodes sink-rate frames into the backend's format.
    Peek(PeekState),
    /// Input stream: encodes the backend's format into sink-rate frames.
    Write(WriteState),
}

/// One backend stream multiplexed/demultiplexed through a sink's mix
/// buffer.
pub struct MixerStream {
    name: String,
    backend: Arc<dyn HostAudioBackend>,
    handle: BackendStreamHandle,
    backend_cfg: BackendStreamCfg,
    codec: StreamCodec,
    status: MixerStreamStatus,
    frames_last_available: usize,
    unreliable: bool,
    backend_buffer_frames: usize,
}

impl MixerStream {
    /// Attach a freshly created backend stream to a sink.
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn HostAudioBackend>,
        handle: BackendStreamHandle,
        backend_cfg: BackendStreamCfg,
        codec: StreamCodec,
    ) -> Self {
        let backend_buffer_frames = backend_cfg.buffer_frames;
        Self {
            name: name.into(),
            backend,
            handle,
            backend_cfg,
            codec,
            status: MixerStreamStatus::default(),
            frames_last_available: 0,
            unreliable: false,
            backend_buffer_frames,
        }
    }

    /// The stream's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend-accepted PCM/period/buffer configuration.
    pub fn backend_cfg(&self) -> &BackendStreamCfg {
        &self.backend_cfg
    }

    /// Current derived status bits.
    pub fn status(&self) -> MixerStreamStatus {
        self.status
    }

    /// Size in frames of the backend's own buffer.
    pub fn backend_buffer_frames(&self) -> usize {
        self.backend_buffer_frames
    }

    /// Whether this stream was marked unreliable during the last `Update`
    /// (§9: sticky within one `Update`, recomputed on the next).
    pub fn is_unreliable(&self) -> bool {
        self.unreliable
    }

    /// Clear the unreliable mark; called at the start of every `Update`.
    pub fn clear_unreliable(&mut self) {
        self.unreliable = false;
    }

    /// Mark this stream unreliable for the remainder of the current
    /// `Update`.
    pub fn mark_unreliable(&mut self) {
        self.unreliable = true;
    }

    /// Re-derive [`MixerStreamStatus`] from the backend's reported state.
    pub fn refresh_status(&mut self) {
        let state = self.backend.stream_get_state(&self.handle);
        match state {
            BackendState::Okay | BackendState::Draining => {
                self.status.can_read = true;
                self.status.can_write = true;
            }
            BackendState::Initializing | BackendState::NotWorking | BackendState::Inactive => {
                self.status.can_read = false;
                self.status.can_write = false;
            }
        }
    }

    /// Bytes the backend can currently accept.
    pub fn backend_writable(&self) -> usize {
        self.backend.stream_get_writable(&self.handle)
    }

    /// Bytes the backend currently has ready to deliver.
    pub fn backend_readable(&self) -> usize {
        self.backend.stream_get_readable(&self.handle)
    }

    /// Push `buf` to the backend. Returns bytes accepted.
    pub fn play(&mut self, buf: &[u8]) -> crate::error::Result<usize> {
        let n = self.backend.stream_play(&self.handle, buf)?;
        self.frames_last_available = n / self.backend_cfg.pcm.frame_size().max(1);
        Ok(n)
    }

    /// Pull captured bytes from the backend into `buf`. Returns bytes
    /// delivered.
    pub fn capture(&mut self, buf: &mut [u8]) -> crate::error::Result<usize> {
        let n = self.backend.stream_capture(&self.handle, buf)?;
        self.frames_last_available = n / self.backend_cfg.pcm.frame_size().max(1);
        Ok(n)
    }

    /// Enable the backend side of this stream.
    pub fn enable(&mut self) -> crate::error::Result<()> {
        self.backend.stream_enable(&self.handle)?;
        self.status.enabled = true;
        Ok(())
    }

    /// Disable the backend side of this stream.
    pub fn disable(&mut self) -> crate::error::Result<()> {
        self.backend.stream_disable(&self.handle)?;
        self.status.enabled = false;
        self.status.can_read = false;
        self.status.can_write = false;
        Ok(())
    }

    /// Ask the backend to drain.
    pub fn drain(&mut self) -> crate::error::Result<()> {
        self.backend.stream_drain(&self.handle)
    }

    /// Mutable access to the decode/encode state bound to this stream.
    pub fn codec_mut(&mut self) -> &mut StreamCodec {
        &mut self.codec
    }

    /// Tear down the backend stream.
    pub fn destroy(self, immediate: bool) {
        self.backend.stream_destroy(&self.handle, immediate);
    }
}
