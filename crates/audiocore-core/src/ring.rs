//! A single-producer/single-consumer byte ring buffer.
//!
//! Used as the hand-off between the device DMA pump and a mixer sink
//! (§4.2.4, §5): one side acquires a contiguous block, reads or writes
//! it, then releases exactly what it consumed. Needs no lock beyond
//! this acquire/release discipline as long as one side only produces
//! and the other only consumes.

/// A byte ring buffer with acquire/release block access.
pub struct ByteRing {
    data: Vec<u8>,
    capacity: usize,
    read: usize,
    write: usize,
    used: usize,
}

impl ByteRing {
    /// Allocate a ring with `capacity` bytes of storage.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            capacity,
            read: 0,
            write: 0,
            used: 0,
        }
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued for the reader.
    pub fn readable(&self) -> usize {
        self.used
    }

    /// Bytes of free space for the writer.
    pub fn writable(&self) -> usize {
        self.capacity - self.used
    }

    /// Acquire the largest contiguous writable run up to `max_len`
    /// bytes, hand it to `f`, and release exactly the byte count `f`
    /// reports having filled.
    ///
    /// `f` returns `(bytes_written, result)`; `bytes_written` must be
    /// `<= slice.len()`. A single call never wraps past the end of the
    /// backing storage — if the writable region wraps, call this twice.
    pub fn with_write_slice<R>(&mut self, max_len: usize, f: impl FnOnce(&mut [u8]) -> (usize, R)) -> R {
        let run = max_len.min(self.writable()).min(self.capacity - self.write);
        let slice = &mut self.data[self.write..self.write + run];
        let (written, result) = f(slice);
        let written = written.min(run);
        self.write = (self.write + written) % self.capacity.max(1);
        self.used += written;
        result
    }

    /// Acquire the largest contiguous readable run up to `max_len`
    /// bytes, hand it to `f`, and release exactly the byte count `f`
    /// reports having consumed.
    pub fn with_read_slice<R>(&mut self, max_len: usize, f: impl FnOnce(&[u8]) -> (usize, R)) -> R {
        let run = max_len.min(self.readable()).min(self.capacity - self.read);
        let slice = &self.data[self.read..self.read + run];
        let (consumed, result) = f(slice);
        let consumed = consumed.min(run);
        self.read = (self.read + consumed) % self.capacity.max(1);
        self.used -= consumed;
        result
    }

    /// Copy `src` into the ring, wrapping as needed. Returns the number
    /// of bytes actually written (may be less than `src.len()` if the
    /// ring has insufficient free space).
    pub fn write_copy(&mut self, src: &[u8]) -> usize {
        let mut total = 0;
        let mut remaining = src;
        while !remaining.is_empty() && self.writable() > 0 {
            let n = self.with_write_slice(remaining.len(), |slice| {
                let n = slice.len();
                slice.copy_from_slice(&remaining[..n]);
                (n, n)
            });
            if n == 0 {
                break;
            }
            total += n;
            remaining = &remaining[n..];
        }
        total
    }

    /// Copy from the ring into `dst`, wrapping as needed. Returns the
    /// number of bytes actually read.
    pub fn read_copy(&mut self, dst: &mut [u8]) -> usize {
        let mut total = 0;
        while total < dst.len() && self.readable() > 0 {
            let remaining = dst.len() - total;
            let n = self.with_read_slice(remaining, |slice| {
                let n = slice.len();
                dst[total..total + n].copy_from_slice(slice);
                (n, n)
            });
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    /// Drop the oldest `n` bytes without reading them (used by the
    /// input overrun policy, §4.4.2).
    pub fn discard_oldest(&mut self, n: usize) {
        let n = n.min(self.used);
        self.read = (self.read + n) % self.capacity.max(1);
        self.used -= n;
    }

    /// Copy `src` into the ring, discarding the oldest buffered bytes to
    /// make room rather than dropping the incoming (newest) bytes on
    /// overflow. If `src` itself is longer than the ring's capacity,
    /// only its last `capacity` bytes are kept. Used by the pre-buffer
    /// (§4.3.6): the most recent audio must survive, not the stalest.
    pub fn write_overwrite(&mut self, src: &[u8]) {
        let src = if src.len() > self.capacity { &src[src.len() - self.capacity..] } else { src };
        let overflow = src.len().saturating_sub(self.writable());
        if overflow > 0 {
            self.discard_oldest(overflow);
        }
        self.write_copy(src);
    }

    /// Reset to empty.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut ring = ByteRing::new(16);
        let n = ring.write_copy(&[1, 2, 3, 4]);
        assert_eq!(n, 4);
        let mut out = [0u8; 4];
        let n = ring.read_copy(&mut out);
        assert_eq!(n, 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn wraps_around_capacity() {
        let mut ring = ByteRing::new(4);
        ring.write_copy(&[1, 2, 3]);
        let mut scratch = [0u8; 2];
        ring.read_copy(&mut scratch); // consume 2, leaves 1 buffered, read=2
        let n = ring.write_copy(&[4, 5, 6]); // wraps: fills tail then head
        assert_eq!(n, 3);
        let mut out = [0u8; 4];
        let n = ring.read_copy(&mut out);
        assert_eq!(n, 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn write_stops_when_full() {
        let mut ring = ByteRing::new(4);
        let n = ring.write_copy(&[1, 2, 3, 4, 5]);
        assert_eq!(n, 4);
        assert_eq!(ring.writable(), 0);
    }

    #[test]
    fn write_overwrite_keeps_newest_bytes_on_overflow() {
        let mut ring = ByteRing::new(4);
        ring.write_overwrite(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.readable(), 4);
        let mut out = [0u8; 4];
        ring.read_copy(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn discard_oldest_drops_without_reading() {
        let mut ring = ByteRing::new(8);
        ring.write_copy(&[1, 2, 3, 4]);
        ring.discard_oldest(2);
        assert_eq!(ring.readable(), 2);
        let mut out = [0u8; 2];
        ring.read_copy(&mut out);
        assert_eq!(out, [3, 4]);
    }
}
