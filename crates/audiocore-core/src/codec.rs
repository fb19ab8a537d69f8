//! Sample encode/decode between external wire formats and the mix
//! buffer's internal signed-32-bit representation.
//!
//! Decoding "blows up" a narrower sample to the full 32-bit range by
//! left-shifting (`32 - bits`), giving volume scaling full precision to
//! work with; encoding shifts back down. For a sample exactly as wide as
//! the internal format (4 bytes, signed, native endian) this round-trips
//! bit-exactly, satisfying the identity round-trip law (§8).

use crate::pcm::PcmProps;

fn bits_of(props: &PcmProps) -> u32 {
    props.sample_size() as u32 * 8
}

/// Decode one sample from `raw` (exactly `props.sample_size()` bytes)
/// into the internal signed-32-bit representation.
pub fn decode_sample(raw: &[u8], props: &PcmProps) -> i32 {
    let bits = bits_of(props);
    let size = props.sample_size() as usize;
    debug_assert_eq!(raw.len(), size);

    let mut buf = [0u8; 8];
    if props.swap_endian() {
        for (i, b) in raw.iter().rev().enumerate() {
            buf[i] = *b;
        }
    } else {
        buf[..size].copy_from_slice(raw);
    }
    let native = u64::from_le_bytes(buf);

    let signed_equiv: i64 = if props.signed() {
        // Sign-extend from `bits` to 64.
        let shift = 64 - bits;
        ((native << shift) as i64) >> shift
    } else {
        let midpoint = 1i64 << (bits - 1);
        native as i64 - midpoint
    };

    let shift = 32i32 - bits as i32;
    let internal = if shift >= 0 {
        signed_equiv << shift
    } else {
        signed_equiv >> (-shift)
    };
    internal.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Encode one internal signed-32-bit sample into `raw` (exactly
/// `props.sample_size()` bytes).
pub fn encode_sample(internal: i32, raw: &mut [u8], props: &PcmProps) {
    let bits = bits_of(props);
    let size = props.sample_size() as usize;
    debug_assert_eq!(raw.len(), size);

    let shift = 32i32 - bits as i32;
    let mut value: i64 = if shift >= 0 {
        (internal as i64) >> shift
    } else {
        (internal as i64) << (-shift)
    };

    if !props.signed() {
        let midpoint = 1i64 << (bits - 1);
        value += midpoint;
    }

    let native = (value as u64) & mask(bits);
    let bytes = native.to_le_bytes();
    if props.swap_endian() {
        for (i, b) in bytes[..size].iter().rev().enumerate() {
            raw[i] = *b;
        }
    } else {
        raw.copy_from_slice(&bytes[..size]);
    }
}

/// Digital zero encoded in `props`'s wire format (all-zero bits for
/// signed formats, the representable midpoint for unsigned ones).
pub fn zero_sample(raw: &mut [u8], props: &PcmProps) {
    encode_sample(0, raw, props);
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_16_round_trips_through_identity_shift() {
        let props = PcmProps::new(2, true, false, 1, 48_000).unwrap();
        for v in [-32768i16, -1, 0, 1, 32767] {
            let mut raw = [0u8; 2];
            let internal = decode_sample(&(v as u16).to_le_bytes(), &props);
            encode_sample(internal, &mut raw, &props);
            assert_eq!(i16::from_le_bytes(raw), v);
        }
    }

    #[test]
    fn unsigned_8_midpoint_is_silence() {
        let props = PcmProps::new(1, false, false, 1, 48_000).unwrap();
        let internal = decode_sample(&[128u8], &props);
        assert_eq!(internal, 0);

        let mut raw = [0u8; 1];
        zero_sample(&mut raw, &props);
        assert_eq!(raw[0], 128);
    }

    #[test]
    fn signed_32_is_bit_exact_identity() {
        let props = PcmProps::new(4, true, false, 1, 48_000).unwrap();
        for v in [i32::MIN, -1, 0, 1, i32::MAX] {
            let internal = decode_sample(&v.to_le_bytes(), &props);
            assert_eq!(internal, v);
            let mut raw = [0u8; 4];
            encode_sample(internal, &mut raw, &props);
            assert_eq!(i32::from_le_bytes(raw), v);
        }
    }

    #[test]
    fn swapped_endian_reads_big_endian_bytes() {
        let props = PcmProps::new(2, true, true, 1, 48_000).unwrap();
        let be_bytes = 1000i16.to_be_bytes();
        let internal = decode_sample(&be_bytes, &props);
        let plain = PcmProps::new(2, true, false, 1, 48_000).unwrap();
        let expected = decode_sample(&1000i16.to_le_bytes(), &plain);
        assert_eq!(internal, expected);
    }
}
