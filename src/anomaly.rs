//! Per-station anomaly scoring
//!
//! Every station keeps a running mean and variance of the volumes it has
//! reported (Welford's online algorithm). A new reading is scored as its
//! distance from the mean in standard deviations, classified against a
//! threshold, and only then folded into the station's statistics.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Scores strictly above this many standard deviations are anomalous.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Observations per station that only seed the baseline and are never flagged.
    #[serde(default = "default_warmup")]
    pub warmup: u64,
    /// Floor for the standard deviation so constant histories do not divide by zero.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Whether readings classified anomalous still enter the baseline.
    #[serde(default = "default_update_on_anomaly")]
    pub update_on_anomaly: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            warmup: default_warmup(),
            epsilon: default_epsilon(),
            update_on_anomaly: default_update_on_anomaly(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ChainError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(ChainError::Config(format!(
                "detector.threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(ChainError::Config(format!(
                "detector.epsilon must be a positive number, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

fn default_threshold() -> f64 {
    3.0
}

fn default_warmup() -> u64 {
    5
}

fn default_epsilon() -> f64 {
    1e-6
}

fn default_update_on_anomaly() -> bool {
    true
}

/// Running statistics of one station's reported volumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationStats {
    pub station_id: String,
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the mean (Welford's M2).
    pub m2: f64,
}

impl StationStats {
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// M_k = M_{k-1} + (x_k - M_{k-1})/k
    /// S_k = S_{k-1} + (x_k - M_{k-1})(x_k - M_k)
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance; zero until there are two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// `|value - mean| / max(stddev, epsilon)`, or 0.0 with no history at all.
    pub fn deviation(&self, value: f64, epsilon: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (value - self.mean).abs() / self.std_dev().max(epsilon)
    }
}

/// Classification of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub is_anomalous: bool,
    pub score: f64,
}

/// A scored reading whose statistics update has not been applied yet.
#[derive(Debug, Clone)]
pub struct Assessment {
    station_id: String,
    volume: f64,
    pub verdict: Verdict,
}

pub struct AnomalyDetector {
    config: DetectorConfig,
    stations: HashMap<String, StationStats>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            stations: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score `transaction` against the station's current baseline without
    /// touching any state.
    pub fn assess(&self, transaction: &Transaction) -> Assessment {
        let volume = transaction.volume_f64();
        let (count, score) = match self.stations.get(&transaction.station_id) {
            Some(stats) => (stats.count, stats.deviation(volume, self.config.epsilon)),
            None => (0, 0.0),
        };

        let warmed_up = count >= self.config.warmup;
        Assessment {
            station_id: transaction.station_id.clone(),
            volume,
            verdict: Verdict {
                is_anomalous: warmed_up && score > self.config.threshold,
                score,
            },
        }
    }

    /// Fold an assessed reading into its station's statistics.
    pub fn apply(&mut self, assessment: Assessment) {
        let include = !assessment.verdict.is_anomalous || self.config.update_on_anomaly;
        let stats = self
            .stations
            .entry(assessment.station_id)
            .or_insert_with_key(|id| StationStats::new(id.clone()));
        if include {
            stats.update(assessment.volume);
        }
    }

    /// Assess and apply in one step.
    pub fn score(&mut self, transaction: &Transaction) -> Verdict {
        let assessment = self.assess(transaction);
        let verdict = assessment.verdict;
        self.apply(assessment);
        verdict
    }

    /// Rebuild statistics from an already committed chain. Stored verdicts
    /// are authoritative; a verdict the current configuration would not
    /// reproduce is logged and counted, never rewritten.
    pub fn replay<'a, I>(&mut self, blocks: I) -> usize
    where
        I: IntoIterator<Item = &'a Block>,
    {
        let mut mismatches = 0;
        for block in blocks.into_iter().filter(|b| !b.is_genesis()) {
            let mut assessment = self.assess(&block.transaction);
            if assessment.verdict.is_anomalous != block.is_anomalous
                || assessment.verdict.score.to_bits() != block.anomaly_score.to_bits()
            {
                mismatches += 1;
                tracing::warn!(
                    index = block.index,
                    station_id = %block.transaction.station_id,
                    stored_score = block.anomaly_score,
                    replayed_score = assessment.verdict.score,
                    "replayed verdict differs from stored verdict"
                );
            }
            assessment.verdict = Verdict {
                is_anomalous: block.is_anomalous,
                score: block.anomaly_score,
            };
            self.apply(assessment);
        }
        mismatches
    }

    pub fn stats(&self, station_id: &str) -> Option<&StationStats> {
        self.stations.get(station_id)
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Volume;

    fn reading(station: &str, volume: f64) -> Transaction {
        Transaction::new(station, Volume::from_num(volume)).with_timestamp(1_700_000_000_000)
    }

    #[test]
    fn test_welford_matches_two_pass() {
        let values = [100.0, 102.0, 98.0, 101.0, 99.0];
        let mut stats = StationStats::new("S1");
        for v in values {
            stats.update(v);
        }
        assert_eq!(stats.count, 5);
        assert!((stats.mean - 100.0).abs() < 1e-12);
        assert!((stats.variance() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_cold_start_never_flags() {
        let mut detector = AnomalyDetector::default();
        for v in [1.0, 1000.0, 5.0, 90000.0, 0.0] {
            assert!(!detector.score(&reading("S1", v)).is_anomalous);
        }
        assert_eq!(detector.stats("S1").unwrap().count, 5);
    }

    #[test]
    fn test_spike_after_baseline_is_anomalous() {
        let mut detector = AnomalyDetector::default();
        for v in [100.0, 102.0, 98.0, 101.0, 99.0] {
            assert!(!detector.score(&reading("S1", v)).is_anomalous);
        }
        let verdict = detector.score(&reading("S1", 500.0));
        assert!(verdict.is_anomalous);
        assert!(verdict.score > 100.0);
    }

    #[test]
    fn test_normal_reading_after_baseline() {
        let mut detector = AnomalyDetector::default();
        for v in [100.0, 102.0, 98.0, 101.0, 99.0] {
            detector.score(&reading("S1", v));
        }
        let verdict = detector.score(&reading("S1", 101.0));
        assert!(!verdict.is_anomalous);
        assert!(verdict.score < 1.0);
    }

    #[test]
    fn test_stations_are_independent() {
        let mut detector = AnomalyDetector::default();
        for v in [100.0, 102.0, 98.0, 101.0, 99.0] {
            detector.score(&reading("S1", v));
        }
        // S2 has no history, so 500 only seeds its baseline.
        assert!(!detector.score(&reading("S2", 500.0)).is_anomalous);
        assert_eq!(detector.station_count(), 2);
        assert_eq!(detector.stats("S1").unwrap().count, 5);
    }

    #[test]
    fn test_first_observation_scores_zero() {
        let detector = AnomalyDetector::default();
        assert_eq!(detector.assess(&reading("S1", 42.0)).verdict.score, 0.0);
    }

    #[test]
    fn test_assess_does_not_mutate() {
        let mut detector = AnomalyDetector::default();
        detector.score(&reading("S1", 10.0));
        let before = detector.stats("S1").cloned();
        let _ = detector.assess(&reading("S1", 20.0));
        assert_eq!(detector.stats("S1").cloned(), before);
    }

    #[test]
    fn test_constant_history_uses_epsilon() {
        let mut detector = AnomalyDetector::default();
        for _ in 0..5 {
            detector.score(&reading("S1", 50.0));
        }
        assert_eq!(detector.assess(&reading("S1", 50.0)).verdict.score, 0.0);
        assert!(detector.assess(&reading("S1", 50.5)).verdict.is_anomalous);
    }

    #[test]
    fn test_anomalies_excluded_when_configured() {
        let config = DetectorConfig {
            update_on_anomaly: false,
            ..DetectorConfig::default()
        };
        let mut detector = AnomalyDetector::new(config);
        for v in [100.0, 102.0, 98.0, 101.0, 99.0] {
            detector.score(&reading("S1", v));
        }
        assert!(detector.score(&reading("S1", 500.0)).is_anomalous);
        let stats = detector.stats("S1").unwrap();
        assert_eq!(stats.count, 5);
        assert!((stats.mean - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_anomalies_included_by_default() {
        let mut detector = AnomalyDetector::default();
        for v in [100.0, 102.0, 98.0, 101.0, 99.0, 500.0] {
            detector.score(&reading("S1", v));
        }
        assert_eq!(detector.stats("S1").unwrap().count, 6);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let volumes = [12.5, 13.0, 11.75, 12.25, 12.0, 30.0, 12.5, 12.0];
        let run = || {
            let mut detector = AnomalyDetector::default();
            let verdicts: Vec<(bool, u64)> = volumes
                .iter()
                .map(|v| {
                    let verdict = detector.score(&reading("S1", *v));
                    (verdict.is_anomalous, verdict.score.to_bits())
                })
                .collect();
            (verdicts, detector.stats("S1").cloned())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_config_validation() {
        assert!(DetectorConfig::default().validate().is_ok());
        let bad = DetectorConfig {
            threshold: 0.0,
            ..DetectorConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ChainError::Config(_))));
        let bad = DetectorConfig {
            epsilon: f64::NAN,
            ..DetectorConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
