//! Compression health monitor.
//!
//! One [`HealthMonitor`] watches one numeric stream. For every block the
//! encoder asks [`HealthMonitor::decide_route`] whether the block belongs on
//! the adaptive (CORE) path or the fallback (QUARANTINE) path, encodes it
//! accordingly, and then reports the outcome back through
//! [`HealthMonitor::update`], which is the only place state changes.

use serde::Serialize;
use tracing::{debug, info};

use crate::format::{BLOCK_ANOMALY_END, BLOCK_ANOMALY_MID, BLOCK_ANOMALY_START, BLOCK_HEALTH_QUAR};
use crate::metrics::BlockMetrics;
use crate::report::{AnomalyReport, AnomalySegment, WorstBlock, FORMAT_VERSION_LABEL, REPORT_SCHEMA_VERSION};

/// Deviations below the reference ratio that trigger quarantine.
pub const K_RATIO_DEV_TRIGGER: f64 = 3.0;
/// Deviations below the reference ratio a probe may still sit and count as healthy.
pub const K_RATIO_DEV_RECOVERY: f64 = 10.0;
/// Consecutive successful probes needed to leave quarantine.
pub const M_RECOVERY_BLOCKS: u32 = 3;
pub const DEFAULT_PROBE_INTERVAL: u32 = 4;

const EMA_ALPHA: f64 = 0.1;
const MIN_RECOVERY_DEV: f64 = 0.1;
/// The trigger distance never exceeds this fraction of the reference ratio.
const MAX_TRIGGER_FRACTION: f64 = 0.9;
const ENTROPY_BURST_FACTOR: f64 = 1.5;
const ENTROPY_BURST_FLOOR: f64 = 0.5;
const TRAIN_MAX_UNIQUE_RATIO: f64 = 0.8;
const WORST_BLOCKS_KEPT: usize = 10;

const INITIAL_BASELINE_RATIO: f64 = 2.0;
const INITIAL_BASELINE_DEV: f64 = 0.5;
const INITIAL_UNIQUE_PROXY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChmState {
    Normal,
    QuarantineActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingDecision {
    Core,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteReason {
    EntropyGate,
    RatioDrop,
    EntropyBurst,
    QuarantineActive,
    RecoveryMatch,
    RecoveryPending,
    RecoveryProbeFail,
}

impl RouteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntropyGate => "ENTROPY_GATE",
            Self::RatioDrop => "RATIO_DROP",
            Self::EntropyBurst => "ENTROPY_BURST",
            Self::QuarantineActive => "QUARANTINE_ACTIVE",
            Self::RecoveryMatch => "RECOVERY_MATCH",
            Self::RecoveryPending => "RECOVERY_PENDING",
            Self::RecoveryProbeFail => "RECOVERY_PROBE_FAIL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub decision: RoutingDecision,
    pub reason: Option<RouteReason>,
}

impl RouteDecision {
    fn core(reason: Option<RouteReason>) -> Self {
        Self { decision: RoutingDecision::Core, reason }
    }

    fn quarantine(reason: RouteReason) -> Self {
        Self {
            decision: RoutingDecision::Quarantine,
            reason: Some(reason),
        }
    }

    pub fn is_quarantine(&self) -> bool {
        self.decision == RoutingDecision::Quarantine
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthTag {
    Ok,
    Quar,
}

/// What the encoder actually did with a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockOutcome {
    pub decision: RouteDecision,
    pub block_index: u64,
    pub payload_in: usize,
    pub payload_out: usize,
    pub header_bytes: usize,
    pub codec_id: u8,
    /// Ratio of the speculative encode that `decide_route` was given.
    pub probe_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UpdateResult {
    pub flags: u8,
    pub health: HealthTag,
    pub is_anomaly: bool,
    pub in_quarantine: bool,
    pub reason: Option<RouteReason>,
    pub ratio: f64,
    pub trained: bool,
}

/// Per-route totals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RouteStats {
    pub core_blocks: u64,
    pub core_input_bytes: u64,
    pub core_output_bytes: u64,
    pub quar_blocks: u64,
    pub quar_input_bytes: u64,
    pub quar_output_bytes: u64,
}

impl RouteStats {
    pub fn core_ratio(&self) -> f64 {
        self.core_input_bytes as f64 / self.core_output_bytes.max(1) as f64
    }

    pub fn quarantine_rate(&self) -> f64 {
        let total = self.core_blocks + self.quar_blocks;
        if total == 0 {
            0.0
        } else {
            self.quar_blocks as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    ratio: f64,
    ratio_dev: f64,
    unique_proxy: f64,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            ratio: INITIAL_BASELINE_RATIO,
            ratio_dev: INITIAL_BASELINE_DEV,
            unique_proxy: INITIAL_UNIQUE_PROXY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    run_id: String,
    probe_interval: u32,
    state: ChmState,
    baseline: Baseline,
    trained_blocks: u64,
    frozen_ratio: Option<f64>,
    recovery_counter: u32,
    total_blocks: u64,
    last_block_index: u64,
    stats: RouteStats,
    segments: Vec<AnomalySegment>,
    open_segment: Option<usize>,
    worst_blocks: Vec<WorstBlock>,
}

impl HealthMonitor {
    /// `probe_interval` of zero is treated as one.
    pub fn new(run_id: impl Into<String>, probe_interval: u32) -> Self {
        Self {
            run_id: run_id.into(),
            probe_interval: probe_interval.max(1),
            state: ChmState::Normal,
            baseline: Baseline::default(),
            trained_blocks: 0,
            frozen_ratio: None,
            recovery_counter: 0,
            total_blocks: 0,
            last_block_index: 0,
            stats: RouteStats::default(),
            segments: Vec::new(),
            open_segment: None,
            worst_blocks: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> ChmState {
        self.state
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Index the next block of this stream will carry.
    pub fn next_block_index(&self) -> u64 {
        self.total_blocks + 1
    }

    pub fn stats(&self) -> RouteStats {
        self.stats
    }

    pub fn baseline_ratio(&self) -> f64 {
        self.baseline.ratio
    }

    pub fn is_probe_block(&self, block_index: u64) -> bool {
        block_index % self.probe_interval as u64 == 0
    }

    fn reference_ratio(&self) -> f64 {
        match self.state {
            ChmState::Normal => self.baseline.ratio,
            ChmState::QuarantineActive => self.frozen_ratio.unwrap_or(self.baseline.ratio),
        }
    }

    fn detect_anomaly(&self, ratio: f64, metrics: &BlockMetrics) -> Option<RouteReason> {
        let reference = self.reference_ratio();
        let mut dev = self.baseline.ratio_dev;
        if dev * K_RATIO_DEV_TRIGGER > reference * MAX_TRIGGER_FRACTION {
            dev = reference * MAX_TRIGGER_FRACTION / K_RATIO_DEV_TRIGGER;
        }
        if ratio < reference - K_RATIO_DEV_TRIGGER * dev {
            return Some(RouteReason::RatioDrop);
        }
        let unique = metrics.unique_ratio;
        if unique > self.baseline.unique_proxy * ENTROPY_BURST_FACTOR
            && unique > ENTROPY_BURST_FLOOR
            && ratio < reference
        {
            return Some(RouteReason::EntropyBurst);
        }
        None
    }

    fn recovery_holds(&self, probe_ratio: f64) -> bool {
        let reference = self.reference_ratio();
        probe_ratio >= reference - K_RATIO_DEV_RECOVERY * self.baseline.ratio_dev.max(MIN_RECOVERY_DEV)
    }

    /// Stateless preview: would a block with these sizes be an anomaly
    /// against the current reference?
    pub fn check_anomaly(&self, payload_in: usize, payload_out: usize, metrics: &BlockMetrics) -> bool {
        let ratio = payload_in as f64 / payload_out.max(1) as f64;
        self.detect_anomaly(ratio, metrics).is_some()
    }

    /// Decide the route for a block without touching any state.
    pub fn decide_route(&self, metrics: &BlockMetrics, probe_ratio: f64, block_index: u64) -> RouteDecision {
        if metrics.is_high_entropy() {
            return RouteDecision::quarantine(RouteReason::EntropyGate);
        }

        match self.state {
            ChmState::Normal => match self.detect_anomaly(probe_ratio, metrics) {
                Some(reason) => RouteDecision::quarantine(reason),
                None => RouteDecision::core(None),
            },
            ChmState::QuarantineActive => {
                if !self.is_probe_block(block_index) {
                    return RouteDecision::quarantine(RouteReason::QuarantineActive);
                }
                if self.recovery_holds(probe_ratio) {
                    if self.recovery_counter + 1 >= M_RECOVERY_BLOCKS {
                        RouteDecision::core(Some(RouteReason::RecoveryMatch))
                    } else {
                        RouteDecision::quarantine(RouteReason::RecoveryPending)
                    }
                } else {
                    RouteDecision::quarantine(RouteReason::RecoveryProbeFail)
                }
            }
        }
    }

    /// Fold the outcome of a routed block into the monitor.
    pub fn update(&mut self, metrics: &BlockMetrics, outcome: &BlockOutcome) -> UpdateResult {
        self.total_blocks += 1;
        self.last_block_index = outcome.block_index;

        let bytes_out = (outcome.payload_out + outcome.header_bytes) as u64;
        match outcome.decision.decision {
            RoutingDecision::Core => {
                self.stats.core_blocks += 1;
                self.stats.core_input_bytes += outcome.payload_in as u64;
                self.stats.core_output_bytes += bytes_out;
            }
            RoutingDecision::Quarantine => {
                self.stats.quar_blocks += 1;
                self.stats.quar_input_bytes += outcome.payload_in as u64;
                self.stats.quar_output_bytes += bytes_out;
            }
        }

        let ratio = outcome.payload_in as f64 / outcome.payload_out.max(1) as f64;
        let unique = metrics.unique_ratio;
        let reason = outcome.decision.reason;

        let flags = match (self.state, outcome.decision.decision) {
            (ChmState::Normal, RoutingDecision::Core) => 0,
            (ChmState::Normal, RoutingDecision::Quarantine) => {
                self.enter_quarantine(outcome.block_index, reason, ratio, unique);
                BLOCK_ANOMALY_START | BLOCK_HEALTH_QUAR
            }
            (ChmState::QuarantineActive, RoutingDecision::Core) => {
                self.leave_quarantine(outcome.block_index);
                BLOCK_ANOMALY_END
            }
            (ChmState::QuarantineActive, RoutingDecision::Quarantine) => {
                self.quarantine_step(outcome, ratio, unique);
                BLOCK_ANOMALY_MID | BLOCK_HEALTH_QUAR
            }
        };

        let trained = outcome.decision.decision == RoutingDecision::Core
            && flags & BLOCK_ANOMALY_END == 0
            && unique <= TRAIN_MAX_UNIQUE_RATIO;
        if trained {
            self.train_baseline(ratio, unique);
        }

        self.worst_blocks.push(WorstBlock {
            block_index: outcome.block_index,
            ratio,
            entropy: unique,
            codec_id: outcome.codec_id,
        });
        self.worst_blocks.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
        self.worst_blocks.truncate(WORST_BLOCKS_KEPT);

        let in_quarantine = self.state == ChmState::QuarantineActive;
        UpdateResult {
            flags,
            health: if flags & BLOCK_HEALTH_QUAR != 0 { HealthTag::Quar } else { HealthTag::Ok },
            is_anomaly: flags & BLOCK_ANOMALY_START != 0,
            in_quarantine,
            reason,
            ratio,
            trained,
        }
    }

    fn enter_quarantine(&mut self, block_index: u64, reason: Option<RouteReason>, ratio: f64, unique: f64) {
        self.state = ChmState::QuarantineActive;
        self.frozen_ratio = Some(self.baseline.ratio);
        self.recovery_counter = 0;

        let reason_code = reason.map(|r| r.as_str()).unwrap_or("UNKNOWN");
        info!(
            run_id = %self.run_id,
            block_index,
            reason = reason_code,
            ratio,
            baseline = self.baseline.ratio,
            "entering quarantine"
        );

        self.segments.push(AnomalySegment {
            segment_id: format!("seg_{}", self.segments.len() + 1),
            start_block_index: block_index,
            end_block_index: None,
            reason_code: reason_code.to_string(),
            min_ratio: ratio,
            max_unique_ratio_proxy: unique,
            suggested_action: "INSPECT".to_string(),
            probe_attempts: 0,
            probe_successes: 0,
        });
        self.open_segment = Some(self.segments.len() - 1);
    }

    fn leave_quarantine(&mut self, block_index: u64) {
        info!(run_id = %self.run_id, block_index, "recovered from quarantine");
        self.state = ChmState::Normal;
        self.frozen_ratio = None;
        self.recovery_counter = 0;
        if let Some(seg) = self.open_segment.take().and_then(|i| self.segments.get_mut(i)) {
            seg.end_block_index = Some(block_index);
        }
    }

    fn quarantine_step(&mut self, outcome: &BlockOutcome, ratio: f64, unique: f64) {
        let probe = self.is_probe_block(outcome.block_index);
        // a gated probe never counts, whatever its ratio
        let success = probe
            && outcome.decision.reason != Some(RouteReason::EntropyGate)
            && self.recovery_holds(outcome.probe_ratio);
        if probe {
            if success {
                self.recovery_counter += 1;
            } else {
                self.recovery_counter = 0;
            }
            debug!(
                run_id = %self.run_id,
                block_index = outcome.block_index,
                probe_ratio = outcome.probe_ratio,
                success,
                counter = self.recovery_counter,
                "quarantine probe"
            );
        }
        if let Some(seg) = self.open_segment.and_then(|i| self.segments.get_mut(i)) {
            if probe {
                seg.probe_attempts += 1;
                if success {
                    seg.probe_successes += 1;
                }
            }
            seg.min_ratio = seg.min_ratio.min(ratio);
            seg.max_unique_ratio_proxy = seg.max_unique_ratio_proxy.max(unique);
        }
    }

    fn train_baseline(&mut self, ratio: f64, unique: f64) {
        if self.trained_blocks == 0 {
            self.baseline = Baseline {
                ratio,
                ratio_dev: ratio * 0.1,
                unique_proxy: unique,
            };
        } else {
            let b = self.baseline;
            self.baseline = Baseline {
                ratio: EMA_ALPHA * ratio + (1.0 - EMA_ALPHA) * b.ratio,
                ratio_dev: EMA_ALPHA * (ratio - b.ratio).abs() + (1.0 - EMA_ALPHA) * b.ratio_dev,
                unique_proxy: EMA_ALPHA * unique + (1.0 - EMA_ALPHA) * b.unique_proxy,
            };
        }
        self.trained_blocks += 1;
    }

    /// Close any open segment at the last block seen and produce the report.
    pub fn get_report(&mut self) -> AnomalyReport {
        if let Some(seg) = self.open_segment.take().and_then(|i| self.segments.get_mut(i)) {
            seg.end_block_index = Some(self.last_block_index);
        }
        AnomalyReport {
            schema_version: REPORT_SCHEMA_VERSION,
            run_id: self.run_id.clone(),
            gics_version: FORMAT_VERSION_LABEL.to_string(),
            segments: self.segments.clone(),
            worst_blocks: self.worst_blocks.clone(),
        }
    }
}
