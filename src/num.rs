//! Fixed-width integer encoding and decoding.
//!
//! All arithmetic runs in arbitrary precision so range checks are exact for
//! every width; values narrow to native integers only at the [Value]
//! boundary. Widths up to 6 bytes decode as native integers, wider ones as
//! [Value::Big].

use crate::{layout::Endianness, Error, Value};
use num_bigint::{BigInt, Sign};
use num_traits::One;

/// Widest numeric item that decodes to a native integer.
pub(crate) const NATIVE_WIDTH: usize = 6;

/// Checks that `value` fits in `size` bytes under the given signedness.
///
/// Unsigned range is `0 ≤ v < 2^(8·size)`; signed range is
/// `−2^(8·size−1) ≤ v < 2^(8·size−1)`.
pub(crate) fn check_range(value: &BigInt, size: usize, signed: bool) -> Result<(), Error> {
    let bits = 8 * size;
    let in_range = if signed {
        let bound = BigInt::one() << (bits - 1);
        value >= &-&bound && value < &bound
    } else {
        let bound = BigInt::one() << bits;
        value.sign() != Sign::Minus && value < &bound
    };
    if !in_range {
        let kind = if signed { "int" } else { "uint" };
        return Err(Error::OutOfRange(format!(
            "{value} does not fit a {size}-byte {kind}"
        )));
    }
    Ok(())
}

/// Writes `value` as `size` two's-complement bytes into `out[..size]`.
pub(crate) fn write_int(
    value: &BigInt,
    size: usize,
    endianness: Endianness,
    signed: bool,
    out: &mut [u8],
) -> Result<(), Error> {
    check_range(value, size, signed)?;
    let adjusted = if value.sign() == Sign::Minus {
        value + (BigInt::one() << (8 * size))
    } else {
        value.clone()
    };
    let (_, magnitude) = adjusted.to_bytes_be();
    let out = &mut out[..size];
    out.fill(0);
    out[size - magnitude.len()..].copy_from_slice(&magnitude);
    if endianness == Endianness::Little {
        out.reverse();
    }
    Ok(())
}

/// Reads `bytes.len()` two's-complement bytes into a numeric [Value].
pub(crate) fn read_int(bytes: &[u8], endianness: Endianness, signed: bool) -> Value {
    let size = bytes.len();
    if size <= NATIVE_WIDTH {
        let mut value: u64 = 0;
        match endianness {
            Endianness::Big => {
                for &byte in bytes {
                    value = value << 8 | u64::from(byte);
                }
            }
            Endianness::Little => {
                for &byte in bytes.iter().rev() {
                    value = value << 8 | u64::from(byte);
                }
            }
        }
        if signed {
            let bits = 8 * size as u32;
            let sign_bit = 1u64 << (bits - 1);
            if value & sign_bit != 0 {
                Value::I64(value as i64 - (1i64 << bits))
            } else {
                Value::I64(value as i64)
            }
        } else {
            Value::U64(value)
        }
    } else {
        let big_endian: Vec<u8> = match endianness {
            Endianness::Big => bytes.to_vec(),
            Endianness::Little => bytes.iter().rev().copied().collect(),
        };
        let mut value = BigInt::from_bytes_be(Sign::Plus, &big_endian);
        if signed && big_endian[0] & 0x80 != 0 {
            value -= BigInt::one() << (8 * size);
        }
        Value::Big(value)
    }
}

/// Reads an unsigned prefix or id of up to [NATIVE_WIDTH] bytes.
pub(crate) fn read_uint(bytes: &[u8], endianness: Endianness) -> u64 {
    match read_int(bytes, endianness, false) {
        Value::U64(value) => value,
        _ => unreachable!("prefix widths never exceed NATIVE_WIDTH"),
    }
}

/// Encodes an unsigned prefix or id into `size` bytes.
pub(crate) fn write_uint(
    value: u64,
    size: usize,
    endianness: Endianness,
    out: &mut [u8],
) -> Result<(), Error> {
    write_int(&BigInt::from(value), size, endianness, false, out)
}

/// Encodes an unsigned value into a fresh `size`-byte vector.
pub(crate) fn uint_bytes(value: u64, size: usize, endianness: Endianness) -> Vec<u8> {
    let mut out = vec![0u8; size];
    // Infallible: callers pass validated ids that fit the width.
    write_uint(value, size, endianness, &mut out).unwrap_or_default();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn write(value: i64, size: usize, endianness: Endianness, signed: bool) -> Vec<u8> {
        let mut out = vec![0u8; size];
        write_int(&BigInt::from(value), size, endianness, signed, &mut out).unwrap();
        out
    }

    #[test]
    fn test_conformity() {
        assert_eq!(write(80, 2, Endianness::Big, false), vec![0, 80]);
        assert_eq!(write(258, 8, Endianness::Little, false), vec![2, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(write(-2, 2, Endianness::Little, true), vec![254, 255]);
        assert_eq!(write(-1, 3, Endianness::Big, true), vec![255, 255, 255]);
        assert_eq!(
            uint_bytes(0x1234, 2, Endianness::Big),
            vec![0x12, 0x34]
        );
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(read_int(&[254, 255], Endianness::Little, true), Value::I64(-2));
        assert_eq!(read_int(&[255, 254], Endianness::Big, true), Value::I64(-2));
        assert_eq!(read_int(&[0x7f, 0xff], Endianness::Big, true), Value::I64(0x7fff));
        assert_eq!(read_int(&[0x80, 0x00], Endianness::Big, true), Value::I64(-0x8000));
        assert_eq!(read_int(&[0xff], Endianness::Big, false), Value::U64(255));
    }

    #[test]
    fn test_wide_values() {
        let bytes = [0, 0, 0, 0, 0, 0, 0, 0x10, 0x01];
        assert_eq!(
            read_int(&bytes, Endianness::Big, false),
            Value::Big(BigInt::from(0x1001))
        );

        let mut all_ones = [0xffu8; 9];
        assert_eq!(
            read_int(&all_ones, Endianness::Big, true),
            Value::Big(BigInt::from(-1))
        );
        all_ones[0] = 0x7f;
        assert_eq!(
            read_int(&all_ones, Endianness::Big, true),
            Value::Big((BigInt::one() << 71) - 1)
        );
    }

    #[test]
    fn test_range_enforcement() {
        assert!(check_range(&BigInt::from(255), 1, false).is_ok());
        assert!(check_range(&BigInt::from(256), 1, false).is_err());
        assert!(check_range(&BigInt::from(-1), 1, false).is_err());
        assert!(check_range(&BigInt::from(127), 1, true).is_ok());
        assert!(check_range(&BigInt::from(128), 1, true).is_err());
        assert!(check_range(&BigInt::from(-128), 1, true).is_ok());
        assert!(check_range(&BigInt::from(-129), 1, true).is_err());
    }

    proptest! {
        #[test]
        fn test_unsigned_round_trip(value: u64, size in 1usize..=6, little: bool) {
            let bits = 8 * size as u32;
            let value = if bits < 64 { value & ((1u64 << bits) - 1) } else { value };
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let mut out = vec![0u8; size];
            write_int(&BigInt::from(value), size, endianness, false, &mut out).unwrap();
            prop_assert_eq!(read_int(&out, endianness, false), Value::U64(value));
        }

        #[test]
        fn test_signed_round_trip(value: i64, size in 1usize..=6, little: bool) {
            let bits = 8 * size as u32;
            let bound = 1i64 << (bits - 1);
            let value = value.rem_euclid(bound * 2) - bound;
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let mut out = vec![0u8; size];
            write_int(&BigInt::from(value), size, endianness, true, &mut out).unwrap();
            prop_assert_eq!(read_int(&out, endianness, true), Value::I64(value));
        }

        #[test]
        fn test_wide_round_trip(raw in proptest::collection::vec(any::<u8>(), 7..=16), little: bool) {
            let size = raw.len();
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let decoded = read_int(&raw, endianness, false);
            let Value::Big(value) = decoded else { panic!("expected Big") };
            let mut out = vec![0u8; size];
            write_int(&value, size, endianness, false, &mut out).unwrap();
            prop_assert_eq!(out, raw);
        }
    }
}
