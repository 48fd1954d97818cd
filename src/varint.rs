//! Zig-zag mapping and LEB128 variable-length integers.

use crate::error::{GicsError, Result};
use crate::format::MAX_BLOCK_ITEMS;

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Map a signed value onto an unsigned one so small magnitudes stay small.
#[inline]
pub fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
pub fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read one unsigned varint starting at `*pos`, advancing it.
pub fn read_uvarint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| GicsError::Integrity("varint runs past end of payload".into()))?;
        *pos += 1;
        let low = (byte & 0x7F) as u64;
        if i == MAX_VARINT_LEN - 1 && low > 1 {
            return Err(GicsError::Integrity("varint overflows 64 bits".into()));
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(GicsError::Integrity("varint longer than 10 bytes".into()))
}

/// Zig-zag then varint-encode every value.
pub fn encode_varint(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        write_uvarint(&mut out, zigzag(v));
    }
    out
}

/// Decode every varint in `data`. Fails on malformed input or when the
/// payload holds more values than a block may carry.
pub fn decode_varint(data: &[u8]) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if out.len() == MAX_BLOCK_ITEMS {
            return Err(GicsError::LimitExceeded(format!(
                "varint payload holds more than {MAX_BLOCK_ITEMS} values"
            )));
        }
        out.push(unzigzag(read_uvarint(data, &mut pos)?));
    }
    Ok(out)
}
