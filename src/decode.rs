//! Binary decode helpers for hook bodies and the frame codec.
//!
//! All helpers are pure and stateless. Offsets are **0-based** byte offsets
//! into the given slice. A read that would run past the end of the slice
//! returns `None`; nothing here panics on short input.
//!
//! The same set is registered in the Rhai engine as `read_u16_be(blob, offset)`,
//! `read_f32_le(blob, offset)` and so on (see [`crate::scripting`]).

use serde::{Deserialize, Serialize};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

impl std::fmt::Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endian::Big => write!(f, "be"),
            Endian::Little => write!(f, "le"),
        }
    }
}

#[inline]
fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    bytes.get(offset..end)?.try_into().ok()
}

pub fn read_u8(bytes: &[u8], offset: usize) -> Option<u8> {
    bytes.get(offset).copied()
}

pub fn read_i8(bytes: &[u8], offset: usize) -> Option<i8> {
    read_u8(bytes, offset).map(|b| b as i8)
}

pub fn read_u16(bytes: &[u8], offset: usize, endian: Endian) -> Option<u16> {
    let raw = array_at::<2>(bytes, offset)?;
    Some(match endian {
        Endian::Big => u16::from_be_bytes(raw),
        Endian::Little => u16::from_le_bytes(raw),
    })
}

pub fn read_i16(bytes: &[u8], offset: usize, endian: Endian) -> Option<i16> {
    read_u16(bytes, offset, endian).map(|v| v as i16)
}

pub fn read_u32(bytes: &[u8], offset: usize, endian: Endian) -> Option<u32> {
    let raw = array_at::<4>(bytes, offset)?;
    Some(match endian {
        Endian::Big => u32::from_be_bytes(raw),
        Endian::Little => u32::from_le_bytes(raw),
    })
}

pub fn read_i32(bytes: &[u8], offset: usize, endian: Endian) -> Option<i32> {
    read_u32(bytes, offset, endian).map(|v| v as i32)
}

pub fn read_f32(bytes: &[u8], offset: usize, endian: Endian) -> Option<f32> {
    read_u32(bytes, offset, endian).map(f32::from_bits)
}

pub fn read_f64(bytes: &[u8], offset: usize, endian: Endian) -> Option<f64> {
    let raw = array_at::<8>(bytes, offset)?;
    Some(match endian {
        Endian::Big => f64::from_be_bytes(raw),
        Endian::Little => f64::from_le_bytes(raw),
    })
}

/// Read an unsigned integer of `width` bytes (1, 2 or 4).
///
/// Used by the codec for length fields and checksums.
pub fn read_uint(bytes: &[u8], offset: usize, width: usize, endian: Endian) -> Option<u32> {
    match width {
        1 => read_u8(bytes, offset).map(u32::from),
        2 => read_u16(bytes, offset, endian).map(u32::from),
        4 => read_u32(bytes, offset, endian),
        _ => None,
    }
}

/// Append `value` as an unsigned integer of `width` bytes (1, 2 or 4).
///
/// Higher bits that do not fit into `width` are truncated.
pub fn write_uint(out: &mut Vec<u8>, value: u32, width: usize, endian: Endian) {
    let be = value.to_be_bytes();
    let start = 4usize.saturating_sub(width);
    let bytes = &be[start..];
    match endian {
        Endian::Big => out.extend_from_slice(bytes),
        Endian::Little => out.extend(bytes.iter().rev()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u16_both_orders() {
        let bytes = [0x12, 0x34, 0x56];
        assert_eq!(read_u16(&bytes, 0, Endian::Big), Some(0x1234));
        assert_eq!(read_u16(&bytes, 0, Endian::Little), Some(0x3412));
        assert_eq!(read_u16(&bytes, 1, Endian::Big), Some(0x3456));
        assert_eq!(read_u16(&bytes, 2, Endian::Big), None);
    }

    #[test]
    fn test_signed_reads() {
        let bytes = [0xFF, 0xFE, 0xFF, 0xFF, 0xFF];
        assert_eq!(read_i8(&bytes, 0), Some(-1));
        assert_eq!(read_i16(&bytes, 0, Endian::Big), Some(-2));
        assert_eq!(read_i32(&bytes, 1, Endian::Little), Some(-2));
    }

    #[test]
    fn test_float_reads() {
        let mut bytes = 1.5f32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-2.25f64).to_be_bytes());
        assert_eq!(read_f32(&bytes, 0, Endian::Little), Some(1.5));
        assert_eq!(read_f64(&bytes, 4, Endian::Big), Some(-2.25));
        assert_eq!(read_f64(&bytes, 5, Endian::Big), None);
    }

    #[test]
    fn test_offset_overflow_is_none() {
        let bytes = [0u8; 4];
        assert_eq!(read_u32(&bytes, usize::MAX, Endian::Big), None);
        assert_eq!(read_u8(&bytes, 4), None);
    }

    #[test]
    fn test_write_uint_widths() {
        let mut out = Vec::new();
        write_uint(&mut out, 0x001C, 2, Endian::Big);
        write_uint(&mut out, 0x0102_0304, 4, Endian::Little);
        write_uint(&mut out, 0x1FF, 1, Endian::Big);
        assert_eq!(out, vec![0x00, 0x1C, 0x04, 0x03, 0x02, 0x01, 0xFF]);
        assert_eq!(read_uint(&out, 2, 4, Endian::Little), Some(0x0102_0304));
        assert_eq!(read_uint(&out, 0, 3, Endian::Big), None);
    }
}
