//! Stream decoder.
//!
//! Parsing is fail-closed: magic, end-of-stream marker and every header and
//! payload bound are checked before any value is produced, and the first
//! violation aborts the whole decode.

use std::collections::hash_map::Entry;

use tracing::debug;

use crate::codecs::{decode_bitpack, decode_dict, decode_rle};
use crate::context::DeltaContext;
use crate::error::{GicsError, Result};
use crate::format::{BlockHeader, CodecId, FileHeader, StreamId, BLOCK_HEADER_SIZE, EOS_MARKER, FILE_HEADER_SIZE};
use crate::types::{Item, Snapshot};
use crate::varint::decode_varint;

/// A parsed block header and the payload it frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBlock<'a> {
    pub header: BlockHeader,
    pub payload: &'a [u8],
    /// Offset of the block header from the start of the stream.
    pub offset: usize,
}

pub struct Decoder<'a> {
    data: &'a [u8],
    context: DeltaContext,
}

/// Decoded per-stream sequences, before reassembly.
#[derive(Debug, Default)]
struct Columns {
    time: Vec<i64>,
    snapshot_len: Option<Vec<i64>>,
    item_id: Vec<i64>,
    value: Vec<i64>,
    quantity: Vec<i64>,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            context: DeltaContext::with_dictionary(),
        }
    }

    /// No-op. Each decoder owns its delta context.
    pub fn reset_shared_context() {}

    /// Check magic and end-of-stream marker, then parse the file header.
    /// Returns the header and the block region between header and marker.
    fn frame(&self) -> Result<(FileHeader, &'a [u8])> {
        let data = self.data;
        FileHeader::check_magic(data)?;
        if data.last() != Some(&EOS_MARKER) {
            return Err(GicsError::IncompleteData("missing end-of-stream marker".into()));
        }
        let data_end = data.len() - 1;
        let header = FileHeader::from_bytes(&data[..data_end])?;
        Ok((header, &data[FILE_HEADER_SIZE..data_end]))
    }

    pub fn file_header(&self) -> Result<FileHeader> {
        self.frame().map(|(header, _)| header)
    }

    /// Every block of the stream, validated against the buffer bounds but
    /// with payloads left undecoded.
    pub fn blocks(&self) -> Result<Vec<RawBlock<'a>>> {
        let (_, region) = self.frame()?;
        let mut blocks = Vec::new();
        let mut pos = 0usize;
        while pos < region.len() {
            let rest = &region[pos..];
            let header_bytes: &[u8; BLOCK_HEADER_SIZE] = rest
                .get(..BLOCK_HEADER_SIZE)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| {
                    GicsError::IncompleteData(format!(
                        "truncated block header at offset {}",
                        FILE_HEADER_SIZE + pos
                    ))
                })?;
            let header = BlockHeader::from_bytes(header_bytes)?;
            let payload_len = header.payload_len as usize;
            let payload = rest
                .get(BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + payload_len)
                .ok_or_else(|| {
                    GicsError::IncompleteData(format!(
                        "block at offset {} declares {payload_len} payload bytes, {} available",
                        FILE_HEADER_SIZE + pos,
                        rest.len() - BLOCK_HEADER_SIZE
                    ))
                })?;
            blocks.push(RawBlock {
                header,
                payload,
                offset: FILE_HEADER_SIZE + pos,
            });
            pos += BLOCK_HEADER_SIZE + payload_len;
        }
        Ok(blocks)
    }

    /// Decode the stream back into snapshots.
    pub fn snapshots(&mut self) -> Result<Vec<Snapshot>> {
        let blocks = self.blocks()?;
        self.context = DeltaContext::with_dictionary();

        let mut cols = Columns::default();
        for block in &blocks {
            let header = block.header;
            if header.stream_id == StreamId::SnapshotLen && cols.snapshot_len.is_none() {
                cols.snapshot_len = Some(Vec::new());
            }
            let Some(codec) = header.codec() else {
                debug!(
                    codec_id = header.codec_id,
                    stream = header.stream_id.as_str(),
                    offset = block.offset,
                    "skipping block with unknown codec"
                );
                continue;
            };

            let commit = header.is_committable();
            let checkpoint = self.context.begin();
            let values = self.decode_payload(codec, block.payload, header.n_items as usize)?;
            if values.len() != header.n_items as usize {
                return Err(GicsError::Integrity(format!(
                    "{} block at offset {} decoded {} values, header says {}",
                    header.stream_id.as_str(),
                    block.offset,
                    values.len(),
                    header.n_items
                )));
            }

            match header.stream_id {
                StreamId::Time => {
                    let ts = self.context.apply_time_deltas(&values, commit);
                    cols.time.extend(ts);
                }
                StreamId::Value => {
                    let prices = self
                        .context
                        .apply_value_deltas(&values, codec.is_delta_of_delta(), commit);
                    cols.value.extend(prices);
                }
                StreamId::SnapshotLen => {
                    if let Some(lens) = cols.snapshot_len.as_mut() {
                        lens.extend(values);
                    }
                }
                StreamId::ItemId => cols.item_id.extend(values),
                StreamId::Quantity => cols.quantity.extend(values),
            }

            if commit {
                self.context.commit(checkpoint);
            } else {
                self.context.abort(checkpoint);
            }
        }

        cols.assemble()
    }

    fn decode_payload(&mut self, codec: CodecId, payload: &[u8], n_items: usize) -> Result<Vec<i64>> {
        match codec {
            CodecId::VarintDelta | CodecId::DodVarint => decode_varint(payload),
            CodecId::BitpackDelta => decode_bitpack(payload, n_items),
            CodecId::RleZigzag | CodecId::RleDod => decode_rle(payload),
            CodecId::DictVarint => {
                let dict = self
                    .context
                    .dictionary_mut()
                    .ok_or_else(|| GicsError::Integrity("dictionary block without dictionary context".into()))?;
                decode_dict(payload, dict)
            }
        }
    }
}

impl Columns {
    fn assemble(self) -> Result<Vec<Snapshot>> {
        let Some(lens) = self.snapshot_len else {
            // legacy layout: one item per snapshot
            let n = self.time.len().min(self.value.len());
            return Ok(self.time[..n]
                .iter()
                .zip(&self.value[..n])
                .map(|(&ts, &price)| Snapshot::new(ts).with_item(1, price, 1))
                .collect());
        };

        if lens.len() != self.time.len() {
            return Err(GicsError::Integrity(format!(
                "{} timestamps but {} snapshot lengths",
                self.time.len(),
                lens.len()
            )));
        }
        let mut total = 0usize;
        for &len in &lens {
            let len = usize::try_from(len)
                .map_err(|_| GicsError::Integrity(format!("negative snapshot length {len}")))?;
            total = total
                .checked_add(len)
                .ok_or_else(|| GicsError::Integrity("snapshot lengths overflow".into()))?;
        }
        for (name, got) in [
            ("item id", self.item_id.len()),
            ("value", self.value.len()),
            ("quantity", self.quantity.len()),
        ] {
            if got != total {
                return Err(GicsError::Integrity(format!(
                    "snapshot lengths sum to {total} but {got} {name} entries decoded"
                )));
            }
        }

        let mut snapshots = Vec::with_capacity(lens.len());
        let mut cursor = 0usize;
        for (&ts, &len) in self.time.iter().zip(&lens) {
            let end = cursor + len as usize;
            let mut snap = Snapshot::new(ts);
            snap.items.reserve(len as usize);
            for i in cursor..end {
                match snap.items.entry(self.item_id[i]) {
                    Entry::Occupied(_) => {
                        return Err(GicsError::Integrity(format!(
                            "duplicate item id {} in snapshot at {ts}",
                            self.item_id[i]
                        )))
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(Item::new(self.value[i], self.quantity[i]));
                    }
                }
            }
            snapshots.push(snap);
            cursor = end;
        }
        Ok(snapshots)
    }
}
