//! Device-side DMA pump (component H, §4.4): walks a buffer-descriptor
//! list, moves bytes between guest memory and a per-stream ring, and
//! hands the ring to/from a mixer sink via transfer-to/from-circ-buf.
//!
//! Grounded on the AC'97 bus-master `tick`/`complete_current_buffer`
//! pattern from the reference PCM-out DMA engine, generalized to both
//! directions and to the sink's ring hand-off instead of a direct
//! `AudioSink` callback.

pub mod bdl;

use audiocore_core::{PeekState, WriteState, codec};

use crate::backend::Direction;
use crate::error::Result;
use crate::sink::aio::AioWorker;
use crate::telemetry::Telemetry;
use audiocore_core::{ByteRing, PcmProps};
use bdl::{BdlEntry, GuestMemory};

/// Controller halted: no tick makes progress until the guest restarts it.
pub const SR_DCH: u16 = 1 << 0;
/// Current-equals-last-valid: CIV has caught up to LVI.
pub const SR_CELV: u16 = 1 << 1;
/// Last-valid-buffer completion interrupt pending.
pub const SR_LVBCI: u16 = 1 << 2;
/// Buffer-completion interrupt pending for the just-finished entry.
pub const SR_BCIS: u16 = 1 << 3;

enum DeviceCodec {
    /// Output: decode guest-format ring bytes into the sink's mix buffer.
    Write(WriteState),
    /// Input: encode the sink's mix buffer into guest-format ring bytes.
    Peek(PeekState),
}

/// Per-emulated-stream DMA engine (§3's "Device DMA state").
pub struct DmaPump {
    direction: Direction,
    pcm: PcmProps,
    bdbar: u64,
    civ: u8,
    lvi: u8,
    piv: u8,
    status: u16,
    cur_entry: Option<BdlEntry>,
    entry_total_bytes: u64,
    bytes_left_in_entry: u64,
    emit_silence: bool,
    ring: ByteRing,
    nominal_period_bytes: usize,
    period_bytes: usize,
    codec: DeviceCodec,
}

impl DmaPump {
    /// Build a pump for one emulated stream. `ring_capacity_bytes` sizes
    /// the device↔sink hand-off ring; `nominal_period_bytes` is the
    /// per-tick transfer size at the controller's configured rate.
    pub fn new(
        direction: Direction,
        pcm: PcmProps,
        ring_capacity_bytes: usize,
        nominal_period_bytes: usize,
        codec: PumpCodec,
    ) -> Self {
        let codec = match codec {
            PumpCodec::Write(w) => DeviceCodec::Write(w),
            PumpCodec::Peek(p) => DeviceCodec::Peek(p),
        };
        Self {
            direction,
            pcm,
            bdbar: 0,
            civ: 0,
            lvi: 0,
            piv: 0,
            status: SR_DCH,
            cur_entry: None,
            entry_total_bytes: 0,
            bytes_left_in_entry: 0,
            emit_silence: false,
            ring: ByteRing::new(ring_capacity_bytes),
            nominal_period_bytes,
            period_bytes: nominal_period_bytes,
            codec,
        }
    }

    /// Current status register value (CELV/LVBCI/BCIS/DCH bits).
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Current-index-value register: the BDL slot being transferred.
    pub fn civ(&self) -> u8 {
        self.civ
    }

    /// Last-valid-index register as last programmed by the guest.
    pub fn lvi(&self) -> u8 {
        self.lvi
    }

    /// Prefetch-index-value register: the BDL slot that will be fetched next.
    pub fn piv(&self) -> u8 {
        self.piv
    }

    /// Clear write-1-to-clear status bits (BCIS, LVBCI); mirrors the
    /// guest writing its status register.
    pub fn ack_status(&mut self, clear: u16) {
        self.status &= !(clear & (SR_BCIS | SR_LVBCI));
    }

    /// Program the BDL base address (8-byte aligned).
    pub fn set_bdbar(&mut self, addr: u64) {
        self.bdbar = addr & !0x7;
    }

    /// Program the last-valid-index register (5 bits).
    pub fn set_lvi(&mut self, lvi: u8) {
        self.lvi = lvi & 0x1f;
        self.update_celv();
    }

    /// Start the controller: clears DCH, takes effect on the next tick.
    pub fn run(&mut self) {
        self.status &= !SR_DCH;
    }

    /// Halt the controller.
    pub fn halt(&mut self) {
        self.status |= SR_DCH;
    }

    fn update_celv(&mut self) {
        if self.civ == self.lvi {
            self.status |= SR_CELV;
        } else {
            self.status &= !SR_CELV;
        }
    }

    /// Advance CIV/PIV and fetch the new current entry (§4.4.1).
    fn fetch_next_entry(&mut self, mem: &dyn GuestMemory) -> Result<()> {
        loop {
            self.civ = self.piv;
            self.piv = (self.piv + 1) & 0x1f;
            let entry = BdlEntry::fetch(mem, self.bdbar, self.civ)?;
            self.update_celv();
            if entry.len_samples == 0 {
                if self.civ != self.lvi {
                    if entry.ioc {
                        self.status |= SR_BCIS;
                    }
                    continue;
                }
                self.cur_entry = None;
                self.entry_total_bytes = 0;
                self.bytes_left_in_entry = 0;
                return Ok(());
            }
            let total_bytes = entry.len_samples as u64 * self.pcm.sample_size() as u64;
            self.cur_entry = Some(entry);
            self.entry_total_bytes = total_bytes;
            self.bytes_left_in_entry = total_bytes;
            self.recompute_period();
            return Ok(());
        }
    }

    fn recompute_period(&mut self) {
        self.period_bytes = (self.nominal_period_bytes as u64).min(self.bytes_left_in_entry.max(1)) as usize;
    }

    /// Run one tick: skip if halted or a completion is still pending
    /// acknowledgement; otherwise move one period's worth of bytes
    /// between guest memory and the sink (§4.4).
    pub fn tick(&mut self, mem: &mut dyn GuestMemory, worker: &AioWorker, telemetry: &dyn Telemetry) -> Result<()> {
        if self.status & (SR_DCH | SR_BCIS) != 0 {
            return Ok(());
        }
        if self.cur_entry.is_none() {
            self.fetch_next_entry(mem)?;
        }
        let Some(entry) = self.cur_entry else { return Ok(()) };

        let transfer_bytes = self.period_bytes.min(self.bytes_left_in_entry as usize);
        if transfer_bytes == 0 {
            return Ok(());
        }
        let frame_size = self.pcm.frame_size().max(1);
        let offset = entry.addr as u64 + (self.entry_total_bytes - self.bytes_left_in_entry);

        let moved = match self.direction {
            Direction::Out => self.tick_output(mem, offset, transfer_bytes, frame_size, worker, telemetry),
            Direction::In => self.tick_input(mem, offset, transfer_bytes, frame_size, worker, telemetry),
        };

        self.bytes_left_in_entry = self.bytes_left_in_entry.saturating_sub(moved as u64);
        if self.bytes_left_in_entry == 0 {
            self.complete_entry(mem)?;
        }
        Ok(())
    }

    fn tick_output(
        &mut self,
        mem: &mut dyn GuestMemory,
        offset: u64,
        transfer_bytes: usize,
        frame_size: usize,
        worker: &AioWorker,
        telemetry: &dyn Telemetry,
    ) -> usize {
        let mut raw = vec![0u8; transfer_bytes];
        mem.read_physical(offset, &mut raw);
        let accepted = self.ring.write_copy(&raw);
        if accepted < raw.len() {
            let shortfall = raw.len() - accepted;
            let silence = silence_bytes(self.pcm, shortfall);
            self.ring.write_copy(&silence);
            telemetry.flow_error();
        }

        let DeviceCodec::Write(write_state) = &mut self.codec else { unreachable!("output pump without a write state") };
        worker.with_sink(|sink| sink.transfer_from_circ_buf(&mut self.ring, frame_size, write_state));
        transfer_bytes
    }

    fn tick_input(
        &mut self,
        mem: &mut dyn GuestMemory,
        offset: u64,
        transfer_bytes: usize,
        frame_size: usize,
        worker: &AioWorker,
        telemetry: &dyn Telemetry,
    ) -> usize {
        if self.ring.writable() < transfer_bytes {
            let need = transfer_bytes - self.ring.writable();
            self.ring.discard_oldest(need);
            telemetry.flow_error();
        }

        let DeviceCodec::Peek(peek_state) = &mut self.codec else { unreachable!("input pump without a peek state") };
        worker.with_sink(|sink| sink.transfer_to_circ_buf(&mut self.ring, frame_size, peek_state));

        let available = self.ring.readable().min(transfer_bytes);
        let mut raw = vec![0u8; available];
        let n = self.ring.read_copy(&mut raw);
        if n < transfer_bytes {
            let silence = silence_bytes(self.pcm, transfer_bytes - n);
            raw.truncate(n);
            mem.write_physical(offset, &raw);
            mem.write_physical(offset + n as u64, &silence);
        } else {
            mem.write_physical(offset, &raw);
        }
        transfer_bytes
    }

    fn complete_entry(&mut self, mem: &dyn GuestMemory) -> Result<()> {
        let Some(entry) = self.cur_entry else { return Ok(()) };
        self.status &= !SR_CELV;
        if entry.ioc {
            self.status |= SR_BCIS;
        }
        if self.civ != self.lvi {
            self.fetch_next_entry(mem)
        } else {
            self.status |= SR_LVBCI | SR_DCH | SR_CELV;
            self.emit_silence = entry.bup;
            self.cur_entry = None;
            self.entry_total_bytes = 0;
            self.bytes_left_in_entry = 0;
            Ok(())
        }
    }

    /// Whether the last completed last-valid entry asked for silence
    /// injection on underrun (BUP) rather than a hard stop.
    pub fn emit_silence_on_underrun(&self) -> bool {
        self.emit_silence
    }
}

/// The rate-conversion state a [`DmaPump`] needs, selected by direction.
pub enum PumpCodec {
    /// Output pump: decodes ring bytes into the sink's mix buffer.
    Write(WriteState),
    /// Input pump: encodes the sink's mix buffer into ring bytes.
    Peek(PeekState),
}

fn silence_bytes(props: PcmProps, bytes: usize) -> Vec<u8> {
    let sample_size = props.sample_size() as usize;
    if sample_size == 0 {
        return vec![0u8; bytes];
    }
    let mut zero = vec![0u8; sample_size];
    codec::zero_sample(&mut zero, &props);
    let mut out = vec![0u8; bytes];
    for chunk in out.chunks_mut(sample_size) {
        let len = chunk.len();
        chunk.copy_from_slice(&zero[..len]);
    }
    out
}
