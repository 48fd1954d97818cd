//! Integer sequence codecs used inside block payloads.
//!
//! Varint lives in [`crate::varint`]; this module adds bit packing,
//! zig-zag run-length encoding and the dictionary codec.

use crate::error::{GicsError, Result};
use crate::format::{MAX_BLOCK_ITEMS, MAX_RLE_RUN};
use crate::varint::{read_uvarint, unzigzag, write_uvarint, zigzag};

/// Widest field a bit-packed payload may declare.
pub const MAX_BITPACK_WIDTH: u8 = 64;

/// Shared dictionary state consulted by the dictionary codec.
pub trait DictionaryContext {
    fn lookup(&self, value: i64) -> Option<usize>;
    fn get(&self, index: usize) -> Option<i64>;
    fn insert(&mut self, value: i64);
}

// ---------------------------------------------------------------------------
// Bitpack

/// Zig-zag every value and pack it into the narrowest common bit width.
///
/// Layout: one width byte followed by the fields, LSB-first across bytes.
/// Returns an empty payload for an empty input.
pub fn encode_bitpack(values: &[i64]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let max = values.iter().map(|&v| zigzag(v)).max().unwrap_or(0);
    let width = (64 - max.leading_zeros()).max(1);

    let mut out = Vec::with_capacity(1 + (values.len() * width as usize + 7) / 8);
    out.push(width as u8);
    let mut acc: u128 = 0;
    let mut filled = 0u32;
    for &v in values {
        acc |= (zigzag(v) as u128) << filled;
        filled += width;
        while filled >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
    if filled > 0 {
        out.push(acc as u8);
    }
    out
}

pub fn decode_bitpack(data: &[u8], count: usize) -> Result<Vec<i64>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let (&width, body) = data
        .split_first()
        .ok_or_else(|| GicsError::Integrity("empty bitpack payload".into()))?;
    if width == 0 || width > MAX_BITPACK_WIDTH {
        return Err(GicsError::Integrity(format!("invalid bitpack width {width}")));
    }
    let width = width as u32;
    let needed = (count * width as usize + 7) / 8;
    if body.len() < needed {
        return Err(GicsError::Integrity(format!(
            "bitpack payload holds {} bytes, {count} fields of {width} bits need {needed}",
            body.len()
        )));
    }

    let mask: u128 = (1u128 << width) - 1;
    let mut out = Vec::with_capacity(count);
    let mut acc: u128 = 0;
    let mut filled = 0u32;
    let mut bytes = body.iter();
    for _ in 0..count {
        while filled < width {
            // length was checked above
            let byte = bytes.next().copied().unwrap_or(0);
            acc |= (byte as u128) << filled;
            filled += 8;
        }
        out.push(unzigzag((acc & mask) as u64));
        acc >>= width;
        filled -= width;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// RLE

/// Encode runs of equal values as `(run length, zig-zag value)` varint pairs.
/// Runs longer than [`MAX_RLE_RUN`] are split.
pub fn encode_rle(values: &[i64]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < values.len() {
        let v = values[i];
        let mut run = 1u64;
        while i + (run as usize) < values.len() && values[i + run as usize] == v && run < MAX_RLE_RUN {
            run += 1;
        }
        write_uvarint(&mut out, run);
        write_uvarint(&mut out, zigzag(v));
        i += run as usize;
    }
    out
}

pub fn decode_rle(data: &[u8]) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let run = read_uvarint(data, &mut pos)?;
        if run == 0 {
            return Err(GicsError::Integrity("zero-length RLE run".into()));
        }
        if run > MAX_RLE_RUN {
            return Err(GicsError::LimitExceeded(format!(
                "RLE run of {run} exceeds {MAX_RLE_RUN}"
            )));
        }
        let value = unzigzag(read_uvarint(data, &mut pos)?);
        if out.len() + run as usize > MAX_BLOCK_ITEMS {
            return Err(GicsError::LimitExceeded(format!(
                "RLE payload expands past {MAX_BLOCK_ITEMS} values"
            )));
        }
        out.extend(std::iter::repeat(value).take(run as usize));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Dictionary + varint

/// Whether `value` can be written as a dictionary literal word.
pub fn dict_literal_fits(value: i64) -> bool {
    zigzag(value) >> 63 == 0
}

/// Each output word's low bit marks a dictionary hit (`index << 1 | 1`) or a
/// literal (`zigzag(value) << 1`). Literals are inserted into `dict` as they
/// are written. Every value must satisfy [`dict_literal_fits`].
pub fn encode_dict<D: DictionaryContext + ?Sized>(values: &[i64], dict: &mut D) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len());
    for &v in values {
        match dict.lookup(v) {
            Some(idx) => write_uvarint(&mut out, ((idx as u64) << 1) | 1),
            None => {
                write_uvarint(&mut out, zigzag(v) << 1);
                dict.insert(v);
            }
        }
    }
    out
}

pub fn decode_dict<D: DictionaryContext + ?Sized>(data: &[u8], dict: &mut D) -> Result<Vec<i64>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if out.len() == MAX_BLOCK_ITEMS {
            return Err(GicsError::LimitExceeded(format!(
                "dictionary payload holds more than {MAX_BLOCK_ITEMS} values"
            )));
        }
        let word = read_uvarint(data, &mut pos)?;
        if word & 1 == 1 {
            let idx = (word >> 1) as usize;
            let value = dict.get(idx).ok_or_else(|| {
                GicsError::Integrity(format!("dictionary index {idx} out of range"))
            })?;
            out.push(value);
        } else {
            let value = unzigzag(word >> 1);
            out.push(value);
            dict.insert(value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecencyDictionary;

    #[test]
    fn bitpack_small_values() {
        let values = vec![0, 1, -1, 2, -2, 3];
        let enc = encode_bitpack(&values);
        assert_eq!(enc[0], 3);
        assert_eq!(enc.len(), 1 + (6 * 3 + 7) / 8);
        assert_eq!(decode_bitpack(&enc, values.len()).unwrap(), values);
    }

    #[test]
    fn bitpack_all_zero_uses_one_bit() {
        let values = vec![0; 17];
        let enc = encode_bitpack(&values);
        assert_eq!(enc, vec![1, 0, 0, 0]);
        assert_eq!(decode_bitpack(&enc, 17).unwrap(), values);
    }

    #[test]
    fn bitpack_full_range() {
        let values = vec![i64::MIN, i64::MAX, 0, -1];
        let enc = encode_bitpack(&values);
        assert_eq!(enc[0], 64);
        assert_eq!(decode_bitpack(&enc, values.len()).unwrap(), values);
    }

    #[test]
    fn bitpack_empty() {
        assert!(encode_bitpack(&[]).is_empty());
        assert!(decode_bitpack(&[], 0).unwrap().is_empty());
        assert!(decode_bitpack(&[], 3).is_err());
    }

    #[test]
    fn bitpack_rejects_bad_width_and_short_body() {
        assert!(decode_bitpack(&[0, 0xFF], 1).is_err());
        assert!(decode_bitpack(&[65, 0xFF], 1).is_err());
        assert!(decode_bitpack(&[8, 1, 2], 3).is_err());
    }

    #[test]
    fn rle_splits_long_runs() {
        let values = vec![7i64; MAX_RLE_RUN as usize * 2 + 5];
        let enc = encode_rle(&values);
        assert_eq!(decode_rle(&enc).unwrap(), values);
        let mut pos = 0;
        assert_eq!(read_uvarint(&enc, &mut pos).unwrap(), MAX_RLE_RUN);
    }

    #[test]
    fn rle_mixed_runs() {
        let values = vec![0, 0, 0, -5, -5, 9, 0, 0];
        assert_eq!(decode_rle(&encode_rle(&values)).unwrap(), values);
        assert!(encode_rle(&[]).is_empty());
    }

    #[test]
    fn rle_limits() {
        let mut zero_run = Vec::new();
        write_uvarint(&mut zero_run, 0);
        write_uvarint(&mut zero_run, 0);
        assert!(matches!(decode_rle(&zero_run), Err(GicsError::Integrity(_))));

        let mut long_run = Vec::new();
        write_uvarint(&mut long_run, MAX_RLE_RUN + 1);
        write_uvarint(&mut long_run, 0);
        assert!(matches!(decode_rle(&long_run), Err(GicsError::LimitExceeded(_))));

        let mut too_many = Vec::new();
        for _ in 0..6 {
            write_uvarint(&mut too_many, MAX_RLE_RUN);
            write_uvarint(&mut too_many, 2);
        }
        assert!(matches!(decode_rle(&too_many), Err(GicsError::LimitExceeded(_))));
    }

    #[test]
    fn dict_hits_and_literals() {
        let values = vec![5, 5, -3, 5, -3, 8];
        let mut enc_dict = RecencyDictionary::default();
        let enc = encode_dict(&values, &mut enc_dict);
        // 5 literal, 5 hit idx 0, -3 literal, 5 hit, -3 hit idx 1, 8 literal
        assert_eq!(enc, vec![20, 1, 10, 1, 3, 32]);

        let mut dec_dict = RecencyDictionary::default();
        assert_eq!(decode_dict(&enc, &mut dec_dict).unwrap(), values);
        assert_eq!(dec_dict.len(), enc_dict.len());
    }

    #[test]
    fn dict_state_carries_across_blocks() {
        let mut enc_dict = RecencyDictionary::default();
        let mut dec_dict = RecencyDictionary::default();
        let first = encode_dict(&[1, 2, 3], &mut enc_dict);
        let second = encode_dict(&[3, 2, 1], &mut enc_dict);
        assert!(second.iter().all(|w| w & 1 == 1));
        assert_eq!(decode_dict(&first, &mut dec_dict).unwrap(), vec![1, 2, 3]);
        assert_eq!(decode_dict(&second, &mut dec_dict).unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn dict_bad_index_fails() {
        let mut dict = RecencyDictionary::default();
        assert!(matches!(decode_dict(&[0x03], &mut dict), Err(GicsError::Integrity(_))));
    }

    #[test]
    fn dict_literal_width() {
        assert!(dict_literal_fits(0));
        assert!(dict_literal_fits(1 << 61));
        assert!(dict_literal_fits(-(1 << 62)));
        assert!(!dict_literal_fits(1 << 62));
        assert!(!dict_literal_fits(i64::MIN));
    }
}
