//! Structural integrity check without decoding values.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::decoder::Decoder;
use crate::error::Result;
use crate::format::{BLOCK_ANOMALY_END, BLOCK_ANOMALY_START, BLOCK_HEALTH_QUAR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StreamCounts {
    pub blocks: usize,
    pub items: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub version: u8,
    pub flags: u32,
    pub block_count: usize,
    /// Keyed by stream name (`TIME`, `VALUE`, ...).
    pub streams: BTreeMap<&'static str, StreamCounts>,
    pub anomaly_start_blocks: usize,
    pub anomaly_end_blocks: usize,
    pub quarantined_blocks: usize,
    pub unknown_codec_blocks: usize,
    /// Hex SHA-256 of the whole byte sequence.
    pub sha256: String,
}

/// Walk every header of `data` with the same checks the decoder applies and
/// summarise what was found.
pub fn verify(data: &[u8]) -> Result<StreamSummary> {
    let decoder = Decoder::new(data);
    let header = decoder.file_header()?;
    let blocks = decoder.blocks()?;

    let mut summary = StreamSummary {
        version: header.version,
        flags: header.flags,
        block_count: blocks.len(),
        streams: BTreeMap::new(),
        anomaly_start_blocks: 0,
        anomaly_end_blocks: 0,
        quarantined_blocks: 0,
        unknown_codec_blocks: 0,
        sha256: hex::encode(Sha256::digest(data)),
    };
    for block in &blocks {
        let h = block.header;
        let counts = summary.streams.entry(h.stream_id.as_str()).or_default();
        counts.blocks += 1;
        counts.items += h.n_items as u64;
        if h.has_flag(BLOCK_ANOMALY_START) {
            summary.anomaly_start_blocks += 1;
        }
        if h.has_flag(BLOCK_ANOMALY_END) {
            summary.anomaly_end_blocks += 1;
        }
        if h.has_flag(BLOCK_HEALTH_QUAR) {
            summary.quarantined_blocks += 1;
        }
        if h.codec().is_none() {
            summary.unknown_codec_blocks += 1;
        }
    }
    Ok(summary)
}
