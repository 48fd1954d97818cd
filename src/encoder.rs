//! Snapshot encoder.
//!
//! Snapshots are buffered by [`Encoder::add_snapshot`] and turned into blocks
//! on [`Encoder::flush`]. TIME and VALUE blocks run through a health monitor
//! each; the remaining streams are plain varint.

use std::mem;

use tracing::{debug, info_span, warn};

use crate::chm::{BlockOutcome, HealthMonitor, HealthTag, RouteDecision};
use crate::codecs::{dict_literal_fits, encode_bitpack, encode_dict, encode_rle};
use crate::config::{ContextMode, EncoderConfig};
use crate::context::{delta_of_delta, DeltaContext, DeltaState};
use crate::error::{GicsError, Result};
use crate::format::{BlockHeader, CodecId, FileHeader, StreamId, BLOCK_HEADER_SIZE, BLOCK_SIZE, EOS_MARKER};
use crate::metrics::{classify_regime, BlockMetrics};
use crate::report::{AnomalySidecar, SidecarWriter, StreamReports};
use crate::telemetry::{BlockStats, Telemetry};
use crate::types::Snapshot;
use crate::varint::encode_varint;

const UNIQUE_RATIO_DICT_MAX: f64 = 0.5;
const DOD_ZERO_RATIO_RLE_MIN: f64 = 0.9;
const P90_BITPACK_MAX: u64 = 127;

/// Per-stream raw sequences extracted from a batch of snapshots.
#[derive(Debug, Default)]
struct StreamColumns {
    time: Vec<i64>,
    snapshot_len: Vec<i64>,
    item_id: Vec<i64>,
    value: Vec<i64>,
    quantity: Vec<i64>,
}

impl StreamColumns {
    fn from_snapshots(snapshots: &[Snapshot]) -> Self {
        let mut cols = Self::default();
        for snap in snapshots {
            cols.time.push(snap.timestamp);
            cols.snapshot_len.push(snap.items.len() as i64);
            for (id, item) in snap.sorted_items() {
                cols.item_id.push(id);
                cols.value.push(item.price);
                cols.quantity.push(item.quantity);
            }
        }
        cols
    }

    fn column(&self, stream: StreamId) -> &[i64] {
        match stream {
            StreamId::Time => &self.time,
            StreamId::SnapshotLen => &self.snapshot_len,
            StreamId::ItemId => &self.item_id,
            StreamId::Value => &self.value,
            StreamId::Quantity => &self.quantity,
        }
    }
}

/// Pick a codec for a monitored block and encode `input` with it.
///
/// `input` holds second differences for TIME and first differences for
/// VALUE. `base` is the delta state before the block.
fn select_and_encode(
    stream: StreamId,
    input: &[i64],
    metrics: &BlockMetrics,
    base: DeltaState,
    ctx: &mut DeltaContext,
) -> (CodecId, Vec<u8>) {
    if stream == StreamId::Value
        && metrics.unique_ratio < UNIQUE_RATIO_DICT_MAX
        && input.iter().all(|&v| dict_literal_fits(v))
    {
        if let Some(dict) = ctx.dictionary_mut() {
            return (CodecId::DictVarint, encode_dict(input, dict));
        }
    }
    if metrics.dod_zero_ratio > DOD_ZERO_RATIO_RLE_MIN {
        let payload = match stream {
            StreamId::Time => encode_rle(input),
            _ => encode_rle(&delta_of_delta(input, base.last_value_delta)),
        };
        return (CodecId::RleDod, payload);
    }
    if metrics.p90_abs_delta < P90_BITPACK_MAX {
        return (CodecId::BitpackDelta, encode_bitpack(input));
    }
    (fallback_codec(stream), encode_varint(input))
}

fn fallback_codec(stream: StreamId) -> CodecId {
    match stream {
        StreamId::Time => CodecId::DodVarint,
        _ => CodecId::VarintDelta,
    }
}

/// Encode one TIME or VALUE chunk as a speculative transaction against `ctx`.
fn encode_monitored_block(
    stream: StreamId,
    chunk: &[i64],
    ctx: &mut DeltaContext,
    chm: &mut HealthMonitor,
    out: &mut Vec<u8>,
) -> BlockStats {
    let metrics = BlockMetrics::compute(chunk);
    let block_index = chm.next_block_index();
    let raw_bytes = chunk.len() * 8;

    let checkpoint = ctx.begin();
    let base = checkpoint.state();
    let input = match stream {
        StreamId::Time => ctx.time_deltas(chunk),
        _ => ctx.value_deltas(chunk),
    };
    let (spec_codec, spec_payload) = select_and_encode(stream, &input, &metrics, base, ctx);
    let probe_ratio = raw_bytes as f64 / (spec_payload.len() + BLOCK_HEADER_SIZE) as f64;

    let route: RouteDecision = chm.decide_route(&metrics, probe_ratio, block_index);
    let (codec, payload) = if route.is_quarantine() {
        ctx.abort(checkpoint);
        (fallback_codec(stream), encode_varint(&input))
    } else {
        ctx.commit(checkpoint);
        (spec_codec, spec_payload)
    };

    let result = chm.update(
        &metrics,
        &BlockOutcome {
            decision: route,
            block_index,
            payload_in: raw_bytes,
            payload_out: payload.len(),
            header_bytes: BLOCK_HEADER_SIZE,
            codec_id: codec as u8,
            probe_ratio,
        },
    );

    let header = BlockHeader::new(stream, codec, chunk.len(), payload.len(), result.flags);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);

    BlockStats {
        stream_id: stream as u8,
        stream: stream.as_str(),
        codec: codec.as_str(),
        n_items: chunk.len(),
        bytes: BLOCK_HEADER_SIZE + payload.len(),
        raw_bytes,
        header_bytes: BLOCK_HEADER_SIZE,
        payload_bytes: payload.len(),
        flags: result.flags,
        decision: Some(route.decision),
        reason: result.reason,
        health: result.health,
        ratio: result.ratio,
        trained: result.trained,
        metrics: Some(metrics),
        regime: Some(classify_regime(&metrics)),
    }
}

fn encode_plain_block(stream: StreamId, chunk: &[i64], out: &mut Vec<u8>) -> BlockStats {
    let payload = encode_varint(chunk);
    let header = BlockHeader::new(stream, CodecId::VarintDelta, chunk.len(), payload.len(), 0);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);

    let raw_bytes = chunk.len() * 8;
    BlockStats {
        stream_id: stream as u8,
        stream: stream.as_str(),
        codec: CodecId::VarintDelta.as_str(),
        n_items: chunk.len(),
        bytes: BLOCK_HEADER_SIZE + payload.len(),
        raw_bytes,
        header_bytes: BLOCK_HEADER_SIZE,
        payload_bytes: payload.len(),
        flags: 0,
        decision: None,
        reason: None,
        health: HealthTag::Ok,
        ratio: raw_bytes as f64 / payload.len().max(1) as f64,
        trained: false,
        metrics: None,
        regime: None,
    }
}

pub struct Encoder {
    config: EncoderConfig,
    pending: Vec<Snapshot>,
    /// Released by `finalize`.
    context: Option<DeltaContext>,
    time_chm: HealthMonitor,
    value_chm: HealthMonitor,
    header_written: bool,
    finalized: bool,
    sidecar_writer: Option<Box<dyn SidecarWriter>>,
    sidecar: Option<AnomalySidecar>,
    telemetry: Telemetry,
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        let context = match config.context_mode {
            ContextMode::On => DeltaContext::with_dictionary(),
            ContextMode::Off => DeltaContext::without_dictionary(),
        };
        let time_chm = HealthMonitor::new(format!("{}:{}", config.run_id, StreamId::Time.as_str()), config.probe_interval);
        let value_chm = HealthMonitor::new(format!("{}:{}", config.run_id, StreamId::Value.as_str()), config.probe_interval);
        Ok(Self {
            config,
            pending: Vec::new(),
            context: Some(context),
            time_chm,
            value_chm,
            header_written: false,
            finalized: false,
            sidecar_writer: None,
            sidecar: None,
            telemetry: Telemetry::default(),
        })
    }

    /// Attach the sink that receives the anomaly report at finalize time.
    pub fn with_sidecar(mut self, writer: Box<dyn SidecarWriter>) -> Self {
        self.sidecar_writer = Some(writer);
        self
    }

    pub fn add_snapshot(&mut self, snapshot: Snapshot) -> Result<()> {
        if self.finalized {
            return Err(GicsError::State("cannot add snapshot after finalize".into()));
        }
        self.pending.push(snapshot);
        Ok(())
    }

    /// Encode every buffered snapshot. The first call also emits the file
    /// header. The end-of-stream byte is only written by [`finish`](Self::finish).
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        if self.finalized {
            return Err(GicsError::State("cannot flush after finalize".into()));
        }
        let span = info_span!("gics.encode", run_id = %self.config.run_id);
        let _enter = span.enter();

        let ctx = self
            .context
            .as_mut()
            .ok_or_else(|| GicsError::State("delta context already released".into()))?;

        let mut out = Vec::new();
        if !self.header_written {
            out.extend_from_slice(&FileHeader::default().to_bytes());
            self.header_written = true;
        }

        let snapshots = mem::take(&mut self.pending);
        let columns = StreamColumns::from_snapshots(&snapshots);
        let mut blocks = Vec::new();
        for stream in StreamId::ALL {
            for chunk in columns.column(stream).chunks(BLOCK_SIZE) {
                let stats = if stream.is_monitored() {
                    let chm = match stream {
                        StreamId::Time => &mut self.time_chm,
                        _ => &mut self.value_chm,
                    };
                    encode_monitored_block(stream, chunk, ctx, chm, &mut out)
                } else {
                    encode_plain_block(stream, chunk, &mut out)
                };
                blocks.push(stats);
            }
        }

        debug!(snapshots = snapshots.len(), blocks = blocks.len(), bytes = out.len(), "flushed");
        self.telemetry.blocks = blocks;
        let (time_stats, value_stats) = (self.time_chm.stats(), self.value_chm.stats());
        self.telemetry.set_totals([&time_stats, &value_stats]);
        Ok(out)
    }

    /// Close the run: build the anomaly report, hand it to the sidecar writer
    /// and release the delta context. Errors if called twice, or while
    /// snapshots are still buffered; `flush` them first or use
    /// [`finish`](Self::finish).
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(GicsError::State("finalize called twice".into()));
        }
        if !self.pending.is_empty() {
            warn!(run_id = %self.config.run_id, pending = self.pending.len(), "finalize with unflushed snapshots");
            return Err(GicsError::State(format!(
                "{} snapshots added but not flushed",
                self.pending.len()
            )));
        }
        self.finalized = true;

        let sidecar = AnomalySidecar {
            filename: AnomalySidecar::filename_for(&self.config.run_id),
            encoder_run_id: self.config.run_id.clone(),
            report: StreamReports {
                time: self.time_chm.get_report(),
                value: self.value_chm.get_report(),
            },
        };
        self.context = None;
        if let Some(writer) = self.sidecar_writer.as_mut() {
            writer.write_sidecar(&sidecar)?;
            self.telemetry.sidecar = Some(sidecar.filename.clone());
        }
        self.sidecar = Some(sidecar);
        Ok(())
    }

    /// Flush, finalize and terminate the stream.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let mut out = self.flush()?;
        self.finalize()?;
        out.push(EOS_MARKER);
        Ok(out)
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// The report built by `finalize`, if it has run.
    pub fn anomaly_report(&self) -> Option<&AnomalySidecar> {
        self.sidecar.as_ref()
    }

    /// No-op. Encoders share no state.
    pub fn reset() {}

    /// No-op. Each encoder owns its delta context.
    pub fn reset_shared_context() {}
}
