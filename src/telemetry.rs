use serde::Serialize;

use crate::chm::{HealthTag, RouteReason, RouteStats, RoutingDecision};
use crate::metrics::{BlockMetrics, Regime};

/// What happened to one block during a flush.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockStats {
    pub stream_id: u8,
    pub stream: &'static str,
    pub codec: &'static str,
    pub n_items: usize,
    /// Header plus payload.
    pub bytes: usize,
    pub raw_bytes: usize,
    pub header_bytes: usize,
    pub payload_bytes: usize,
    pub flags: u8,
    /// `None` for streams that bypass the health monitor.
    pub decision: Option<RoutingDecision>,
    pub reason: Option<RouteReason>,
    pub health: HealthTag,
    pub ratio: f64,
    pub trained: bool,
    pub metrics: Option<BlockMetrics>,
    pub regime: Option<Regime>,
}

/// Encoder telemetry. `blocks` describes the most recent flush, the totals
/// span the whole run.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Telemetry {
    pub blocks: Vec<BlockStats>,
    pub core_input_bytes: u64,
    pub core_output_bytes: u64,
    pub core_ratio: f64,
    pub quarantine_input_bytes: u64,
    pub quarantine_output_bytes: u64,
    pub quarantine_blocks: u64,
    pub quarantine_rate: f64,
    pub total_blocks: u64,
    /// Set once the anomaly report has been handed off.
    pub sidecar: Option<String>,
}

impl Telemetry {
    /// Rebuild the aggregate totals from the per-stream monitor stats.
    pub fn set_totals<'a>(&mut self, stats: impl IntoIterator<Item = &'a RouteStats>) {
        let mut total = RouteStats::default();
        for s in stats {
            total.core_blocks += s.core_blocks;
            total.core_input_bytes += s.core_input_bytes;
            total.core_output_bytes += s.core_output_bytes;
            total.quar_blocks += s.quar_blocks;
            total.quar_input_bytes += s.quar_input_bytes;
            total.quar_output_bytes += s.quar_output_bytes;
        }
        self.core_input_bytes = total.core_input_bytes;
        self.core_output_bytes = total.core_output_bytes;
        self.core_ratio = total.core_ratio();
        self.quarantine_input_bytes = total.quar_input_bytes;
        self.quarantine_output_bytes = total.quar_output_bytes;
        self.quarantine_blocks = total.quar_blocks;
        self.quarantine_rate = total.quarantine_rate();
        self.total_blocks = total.core_blocks + total.quar_blocks;
    }
}
