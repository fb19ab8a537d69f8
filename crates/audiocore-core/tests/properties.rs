//! Property-based tests for the mix buffer and byte ring invariants.

use audiocore_core::{ByteRing, MixBuffer, PcmProps};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// After any sequence of write/commit/advance calls, `used + free`
    /// must still equal the buffer's capacity and `used` must never
    /// exceed it.
    #[test]
    fn mixbuf_used_plus_free_is_invariant(
        ops in prop::collection::vec((0u8..=1, 1usize..=40), 1..=50),
        capacity in 8usize..=256,
    ) {
        let mut buf = MixBuffer::new("prop", 1, 48_000, capacity).unwrap();
        let props = PcmProps::new(4, true, false, 1, 48_000).unwrap();
        let mut ws = buf.init_write_state(props);

        for (kind, n) in ops {
            if kind == 0 {
                let samples = vec![0i32; n];
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                let written = buf.write(&mut ws, &bytes, 0, buf.free());
                buf.commit(written);
            } else {
                buf.advance(n.min(buf.used()));
            }
            prop_assert_eq!(buf.used() + buf.free(), buf.size());
            prop_assert!(buf.used() <= buf.size());
        }
    }

    /// A `ByteRing` never reports more readable bytes than were
    /// actually written and not yet consumed, and `readable + writable`
    /// always equals capacity.
    #[test]
    fn byte_ring_readable_writable_is_invariant(
        ops in prop::collection::vec((0u8..=1, 1usize..=32), 1..=50),
        capacity in 4usize..=128,
    ) {
        let mut ring = ByteRing::new(capacity);
        for (kind, n) in ops {
            if kind == 0 {
                let data = vec![0xABu8; n];
                ring.write_copy(&data);
            } else {
                let mut buf = vec![0u8; n];
                ring.read_copy(&mut buf);
            }
            prop_assert_eq!(ring.readable() + ring.writable(), ring.capacity());
        }
    }

    /// Writing N > capacity bytes via `write_overwrite` always leaves
    /// exactly the most recent `capacity` bytes behind, never the
    /// oldest (§4.3.6's pre-buffer overflow policy).
    #[test]
    fn write_overwrite_keeps_most_recent_bytes(
        capacity in 4usize..=128,
        extra in 1usize..=200,
    ) {
        let total = capacity + extra;
        let data: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
        let mut ring = ByteRing::new(capacity);
        ring.write_overwrite(&data);

        prop_assert_eq!(ring.readable(), capacity);
        let mut out = vec![0u8; capacity];
        ring.read_copy(&mut out);
        prop_assert_eq!(out, &data[total - capacity..]);
    }
}
