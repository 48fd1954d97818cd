//! Anomaly report emitted once per encoder at finalize time, and the sinks
//! that receive it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const REPORT_SCHEMA_VERSION: u32 = 1;
pub const FORMAT_VERSION_LABEL: &str = "1.2";

/// One contiguous run of quarantined blocks in a single stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySegment {
    pub segment_id: String,
    pub start_block_index: u64,
    /// `None` while the segment is still open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_block_index: Option<u64>,
    pub reason_code: String,
    pub min_ratio: f64,
    pub max_unique_ratio_proxy: f64,
    pub suggested_action: String,
    pub probe_attempts: u32,
    pub probe_successes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorstBlock {
    pub block_index: u64,
    pub ratio: f64,
    pub entropy: f64,
    pub codec_id: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub schema_version: u32,
    pub run_id: String,
    pub gics_version: String,
    pub segments: Vec<AnomalySegment>,
    pub worst_blocks: Vec<WorstBlock>,
}

/// Reports of both monitored streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReports {
    pub time: AnomalyReport,
    pub value: AnomalyReport,
}

/// What the encoder hands to a [`SidecarWriter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySidecar {
    pub filename: String,
    pub encoder_run_id: String,
    pub report: StreamReports,
}

impl AnomalySidecar {
    pub fn filename_for(run_id: &str) -> String {
        format!("gics-anomalies.{run_id}.json")
    }
}

/// Destination for the anomaly report. Called at most once per encoder.
pub trait SidecarWriter: Send {
    fn write_sidecar(&mut self, sidecar: &AnomalySidecar) -> Result<()>;
}

/// Writes the sidecar as pretty-printed JSON into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSidecar {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl JsonFileSidecar {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            written: Vec::new(),
        }
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl SidecarWriter for JsonFileSidecar {
    fn write_sidecar(&mut self, sidecar: &AnomalySidecar) -> Result<()> {
        let path = self.dir.join(&sidecar.filename);
        let json = serde_json::to_string_pretty(sidecar)?;
        fs::write(&path, json)?;
        self.written.push(path);
        Ok(())
    }
}

/// Keeps every sidecar in memory. Useful when the caller forwards the
/// report somewhere other than the filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemorySidecar {
    pub sidecars: Vec<AnomalySidecar>,
}

impl SidecarWriter for MemorySidecar {
    fn write_sidecar(&mut self, sidecar: &AnomalySidecar) -> Result<()> {
        self.sidecars.push(sidecar.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_report(run_id: &str) -> AnomalyReport {
        AnomalyReport {
            schema_version: REPORT_SCHEMA_VERSION,
            run_id: run_id.into(),
            gics_version: FORMAT_VERSION_LABEL.into(),
            segments: vec![AnomalySegment {
                segment_id: "seg_1".into(),
                start_block_index: 3,
                end_block_index: None,
                reason_code: "RATIO_DROP".into(),
                min_ratio: 1.5,
                max_unique_ratio_proxy: 0.9,
                suggested_action: "INSPECT".into(),
                probe_attempts: 0,
                probe_successes: 0,
            }],
            worst_blocks: Vec::new(),
        }
    }

    #[test]
    fn open_segment_omits_end_index() {
        let json = serde_json::to_value(empty_report("r")).unwrap();
        let seg = &json["segments"][0];
        assert!(seg.get("end_block_index").is_none());
        assert_eq!(seg["reason_code"], "RATIO_DROP");
    }

    #[test]
    fn json_file_sidecar_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonFileSidecar::new(dir.path());
        let sidecar = AnomalySidecar {
            filename: AnomalySidecar::filename_for("run_x"),
            encoder_run_id: "run_x".into(),
            report: StreamReports {
                time: empty_report("run_x:TIME"),
                value: empty_report("run_x:VALUE"),
            },
        };
        writer.write_sidecar(&sidecar).unwrap();
        let path = dir.path().join("gics-anomalies.run_x.json");
        assert_eq!(writer.written(), &[path.clone()]);
        let back: AnomalySidecar = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, sidecar);
    }
}
