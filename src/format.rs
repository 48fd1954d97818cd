//! On-wire layout of a GICS v1.2 core stream.
//!
//! ```text
//! [magic "GICS"][version:u8 = 2][flags:u32 LE]          written once
//! [streamId:u8][codecId:u8][nItems:u32 LE][payloadLen:u32 LE][flags:u8][payload]   repeated
//! [0xFF]                                                 end of stream
//! ```

use crate::error::{GicsError, Result};

pub const MAGIC: &[u8; 4] = b"GICS";
pub const VERSION: u8 = 2;
/// magic + version + flags word
pub const FILE_HEADER_SIZE: usize = MAGIC.len() + 1 + 4;
pub const BLOCK_HEADER_SIZE: usize = 11;
pub const EOS_MARKER: u8 = 0xFF;

/// Raw values per block.
pub const BLOCK_SIZE: usize = 1000;
/// Largest `nItems` a decoder accepts for one block.
pub const MAX_BLOCK_ITEMS: usize = 10_000;
/// Longest run a single RLE pair may describe.
pub const MAX_RLE_RUN: u64 = 2_000;

/// Header flag: timestamps are stored field-wise (delta-of-delta stream).
pub const FLAG_FIELDWISE_TS: u32 = 1 << 0;

// ── Block flags ────────────────────────────────────────────────────────────

pub const BLOCK_ANOMALY_START: u8 = 0x01;
pub const BLOCK_ANOMALY_MID: u8 = 0x02;
pub const BLOCK_ANOMALY_END: u8 = 0x04;
/// Values of this block must not be committed into the running delta state.
pub const BLOCK_HEALTH_QUAR: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StreamId {
    Time = 10,
    SnapshotLen = 11,
    ItemId = 20,
    Value = 30,
    Quantity = 40,
}

impl StreamId {
    pub const ALL: [StreamId; 5] = [
        StreamId::Time,
        StreamId::SnapshotLen,
        StreamId::ItemId,
        StreamId::Value,
        StreamId::Quantity,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            10 => Some(Self::Time),
            11 => Some(Self::SnapshotLen),
            20 => Some(Self::ItemId),
            30 => Some(Self::Value),
            40 => Some(Self::Quantity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "TIME",
            Self::SnapshotLen => "SNAPSHOT_LEN",
            Self::ItemId => "ITEM_ID",
            Self::Value => "VALUE",
            Self::Quantity => "QUANTITY",
        }
    }

    /// Streams that carry delta state and are routed through a health monitor.
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Time | Self::Value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodecId {
    VarintDelta = 1,
    BitpackDelta = 2,
    RleZigzag = 3,
    RleDod = 4,
    DodVarint = 5,
    DictVarint = 6,
}

impl CodecId {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::VarintDelta),
            2 => Some(Self::BitpackDelta),
            3 => Some(Self::RleZigzag),
            4 => Some(Self::RleDod),
            5 => Some(Self::DodVarint),
            6 => Some(Self::DictVarint),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VarintDelta => "VARINT_DELTA",
            Self::BitpackDelta => "BITPACK_DELTA",
            Self::RleZigzag => "RLE_ZIGZAG",
            Self::RleDod => "RLE_DOD",
            Self::DodVarint => "DOD_VARINT",
            Self::DictVarint => "DICT_VARINT",
        }
    }

    /// Whether a VALUE block with this codec holds second differences.
    pub fn is_delta_of_delta(&self) -> bool {
        matches!(self, Self::RleDod | Self::DodVarint)
    }
}

// ── File header ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u8,
    pub flags: u32,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            version: VERSION,
            flags: FLAG_FIELDWISE_TS,
        }
    }
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[..MAGIC.len()].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[5..9].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    /// Check the magic prefix only.
    ///
    /// A buffer that is a strict prefix of the magic is reported as incomplete,
    /// anything else that does not start with the magic is not our format.
    pub fn check_magic(data: &[u8]) -> Result<()> {
        if data.len() < MAGIC.len() {
            if MAGIC.starts_with(data) {
                return Err(GicsError::IncompleteData(format!(
                    "{} bytes is shorter than the magic",
                    data.len()
                )));
            }
            return Err(GicsError::Integrity("invalid GICS magic bytes".into()));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(GicsError::Integrity("invalid GICS magic bytes".into()));
        }
        Ok(())
    }

    /// Parse the header from the front of `data`, which must not include the
    /// trailing end-of-stream byte.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::check_magic(data)?;
        if data.len() < FILE_HEADER_SIZE {
            return Err(GicsError::IncompleteData("truncated file header".into()));
        }
        let version = data[4];
        if version != VERSION {
            return Err(GicsError::Integrity(format!(
                "unsupported version: {version}"
            )));
        }
        let flags = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
        Ok(Self { version, flags })
    }
}

// ── Block header ───────────────────────────────────────────────────────────

/// Fixed 11-byte header in front of every block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub stream_id: StreamId,
    /// Kept raw: unknown codecs are skipped, not rejected.
    pub codec_id: u8,
    pub n_items: u32,
    pub payload_len: u32,
    pub flags: u8,
}

impl BlockHeader {
    pub fn new(stream_id: StreamId, codec: CodecId, n_items: usize, payload_len: usize, flags: u8) -> Self {
        Self {
            stream_id,
            codec_id: codec as u8,
            n_items: n_items as u32,
            payload_len: payload_len as u32,
            flags,
        }
    }

    pub fn codec(&self) -> Option<CodecId> {
        CodecId::from_u8(self.codec_id)
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Whether the receiver may fold this block into its running delta state.
    pub fn is_committable(&self) -> bool {
        !self.has_flag(BLOCK_HEALTH_QUAR)
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0] = self.stream_id as u8;
        buf[1] = self.codec_id;
        buf[2..6].copy_from_slice(&self.n_items.to_le_bytes());
        buf[6..10].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[10] = self.flags;
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_HEADER_SIZE]) -> Result<Self> {
        let stream_id = StreamId::from_u8(buf[0])
            .ok_or_else(|| GicsError::Integrity(format!("unknown stream id {}", buf[0])))?;
        let n_items = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        if n_items as usize > MAX_BLOCK_ITEMS {
            return Err(GicsError::LimitExceeded(format!(
                "block declares {n_items} items, limit is {MAX_BLOCK_ITEMS}"
            )));
        }
        Ok(Self {
            stream_id,
            codec_id: buf[1],
            n_items,
            payload_len: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            flags: buf[10],
        })
    }
}
