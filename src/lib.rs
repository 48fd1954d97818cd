//! GICS: a columnar delta codec for timestamped snapshots of keyed
//! price/quantity records.
//!
//! Snapshots are split into TIME, SNAPSHOT_LEN, ITEM_ID, VALUE and QUANTITY
//! streams, each cut into blocks of up to [`BLOCK_SIZE`] values. TIME and
//! VALUE blocks pick their codec adaptively and are watched by a
//! [`HealthMonitor`] that diverts anomalous data to a plain varint fallback.
//!
//! ```
//! use gics::{decode, encode, Snapshot};
//!
//! let snaps = vec![
//!     Snapshot::new(1_000).with_item(7, 10_050, 3),
//!     Snapshot::new(1_060).with_item(7, 10_055, 2).with_item(9, 990, 1),
//! ];
//! let bytes = encode(&snaps).unwrap();
//! assert_eq!(decode(&bytes).unwrap(), snaps);
//! ```

pub mod chm;
pub mod codecs;
pub mod config;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod metrics;
pub mod report;
pub mod telemetry;
pub mod types;
pub mod varint;
pub mod verify;

pub use chm::{HealthMonitor, RouteDecision, RouteReason, RoutingDecision};
pub use config::{ContextMode, EncoderConfig};
pub use decoder::{Decoder, RawBlock};
pub use encoder::Encoder;
pub use error::{GicsError, Result};
pub use format::{BlockHeader, CodecId, StreamId, BLOCK_SIZE};
pub use report::{AnomalyReport, AnomalySidecar, JsonFileSidecar, MemorySidecar, SidecarWriter};
pub use telemetry::{BlockStats, Telemetry};
pub use types::{Item, Snapshot};
pub use verify::{verify, StreamSummary};

/// Encode snapshots with the default configuration.
pub fn encode(snapshots: &[Snapshot]) -> Result<Vec<u8>> {
    encode_with(snapshots, EncoderConfig::default(), None)
}

/// Encode snapshots with an explicit configuration and optional sink for the
/// anomaly report.
pub fn encode_with(
    snapshots: &[Snapshot],
    config: EncoderConfig,
    sidecar: Option<Box<dyn SidecarWriter>>,
) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(config)?;
    if let Some(writer) = sidecar {
        encoder = encoder.with_sidecar(writer);
    }
    for snap in snapshots {
        encoder.add_snapshot(snap.clone())?;
    }
    encoder.finish()
}

pub fn decode(data: &[u8]) -> Result<Vec<Snapshot>> {
    Decoder::new(data).snapshots()
}
