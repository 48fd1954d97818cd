use std::collections::HashSet;

use serde::Serialize;

/// Cheap statistics of a raw block, computed once and shared by codec
/// selection and anomaly detection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BlockMetrics {
    /// Distinct values / block length.
    pub unique_ratio: f64,
    /// Distinct first differences / block length.
    pub unique_delta_ratio: f64,
    /// Fraction of second differences equal to zero.
    pub dod_zero_ratio: f64,
    /// 90th percentile of the absolute first differences.
    pub p90_abs_delta: u64,
}

impl BlockMetrics {
    pub fn compute(chunk: &[i64]) -> Self {
        let n = chunk.len();
        if n == 0 {
            return Self::default();
        }

        let unique: HashSet<i64> = chunk.iter().copied().collect();
        let deltas: Vec<i64> = chunk.windows(2).map(|w| w[1].wrapping_sub(w[0])).collect();
        let unique_deltas: HashSet<i64> = deltas.iter().copied().collect();

        let dod_zero_ratio = if deltas.len() < 2 {
            0.0
        } else {
            let zeros = deltas.windows(2).filter(|w| w[1] == w[0]).count();
            zeros as f64 / (deltas.len() - 1) as f64
        };

        let mut abs: Vec<u64> = deltas.iter().map(|d| d.unsigned_abs()).collect();
        abs.sort_unstable();
        let p90_abs_delta = if abs.is_empty() {
            0
        } else {
            let rank = ((abs.len() as f64) * 0.9).ceil() as usize;
            abs[rank.clamp(1, abs.len()) - 1]
        };

        Self {
            unique_ratio: unique.len() as f64 / n as f64,
            unique_delta_ratio: unique_deltas.len() as f64 / n as f64,
            dod_zero_ratio,
            p90_abs_delta,
        }
    }

    /// Pure-noise test used by the health monitor's entropy gate.
    pub fn is_high_entropy(&self) -> bool {
        self.unique_ratio > 0.85 && self.unique_delta_ratio > 0.85
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    /// Linearly trending or constant data.
    Ordered,
    Mixed,
    HighEntropy,
}

pub fn classify_regime(metrics: &BlockMetrics) -> Regime {
    if metrics.is_high_entropy() {
        Regime::HighEntropy
    } else if metrics.dod_zero_ratio > 0.9 {
        Regime::Ordered
    } else {
        Regime::Mixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chunk() {
        let chunk: Vec<i64> = (0..100).map(|i| 1000 + i * 100).collect();
        let m = BlockMetrics::compute(&chunk);
        assert_eq!(m.unique_ratio, 1.0);
        assert_eq!(m.unique_delta_ratio, 0.01);
        assert_eq!(m.dod_zero_ratio, 1.0);
        assert_eq!(m.p90_abs_delta, 100);
        assert_eq!(classify_regime(&m), Regime::Ordered);
    }

    #[test]
    fn constant_chunk() {
        let m = BlockMetrics::compute(&[4; 10]);
        assert_eq!(m.unique_ratio, 0.1);
        assert_eq!(m.dod_zero_ratio, 1.0);
        assert_eq!(m.p90_abs_delta, 0);
    }

    #[test]
    fn short_chunks() {
        assert_eq!(BlockMetrics::compute(&[]), BlockMetrics::default());
        let one = BlockMetrics::compute(&[9]);
        assert_eq!(one.unique_ratio, 1.0);
        assert_eq!(one.unique_delta_ratio, 0.0);
        assert_eq!(one.dod_zero_ratio, 0.0);
        let two = BlockMetrics::compute(&[1, -1]);
        assert_eq!(two.p90_abs_delta, 2);
        assert_eq!(two.dod_zero_ratio, 0.0);
    }

    #[test]
    fn p90_nearest_rank() {
        // deltas 1..=10
        let mut chunk = vec![0i64];
        for d in 1..=10 {
            let last = *chunk.last().unwrap();
            chunk.push(last + d);
        }
        assert_eq!(BlockMetrics::compute(&chunk).p90_abs_delta, 9);
    }

    #[test]
    fn extreme_deltas_do_not_overflow() {
        let m = BlockMetrics::compute(&[i64::MIN, i64::MAX, i64::MIN]);
        assert_eq!(m.p90_abs_delta, 1);
    }

    #[test]
    fn noise_is_high_entropy() {
        let chunk: Vec<i64> = (0..200i64).map(|i| (i * 7919) % 10007 * if i % 2 == 0 { 1 } else { -1 }).collect();
        let m = BlockMetrics::compute(&chunk);
        assert!(m.is_high_entropy());
        assert_eq!(classify_regime(&m), Regime::HighEntropy);
    }
}
