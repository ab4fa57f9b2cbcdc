//! Quality policy: weight table and gate thresholds

use crate::error::QualityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tf_model::QualityGate;

/// Below this overall score creation is blocked
pub const BLOCK_THRESHOLD: f64 = 50.0;

/// At or above this overall score the artifact is high-confidence
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 80.0;

/// Recent scoring passes retained for telemetry
pub const DEFAULT_METRICS_CAPACITY: usize = 1000;

/// Weight applied to criteria missing from the table
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Quality policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Per-criterion weights; product policy, not engineering law
    pub weights: BTreeMap<String, f64>,
    /// Minimum overall score for `passed`
    pub pass_threshold: f64,
    pub block_threshold: f64,
    pub high_confidence_threshold: f64,
    pub metrics_capacity: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        let weights = [
            ("completeness", 1.0),
            ("acceptance_criteria", 3.0),
            ("clarity", 1.5),
            ("api_changes", 2.0),
            ("test_plan", 1.5),
            ("scope", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            weights,
            pass_threshold: BLOCK_THRESHOLD,
            block_threshold: BLOCK_THRESHOLD,
            high_confidence_threshold: HIGH_CONFIDENCE_THRESHOLD,
            metrics_capacity: DEFAULT_METRICS_CAPACITY,
        }
    }
}

impl QualityConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_weight(mut self, criterion: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(criterion.into(), weight);
        self
    }

    #[must_use]
    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_metrics_capacity(mut self, capacity: usize) -> Self {
        self.metrics_capacity = capacity;
        self
    }

    #[must_use]
    pub fn weight_for(&self, criterion: &str) -> f64 {
        self.weights.get(criterion).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn validate(&self) -> Result<(), QualityError> {
        for (criterion, &weight) in &self.weights {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(QualityError::InvalidWeight {
                    criterion: criterion.clone(),
                    weight,
                });
            }
        }
        let in_range = |t: f64| (0.0..=100.0).contains(&t);
        if !in_range(self.block_threshold)
            || !in_range(self.high_confidence_threshold)
            || !in_range(self.pass_threshold)
        {
            return Err(QualityError::InvalidThresholds(
                "thresholds must lie in [0, 100]".to_string(),
            ));
        }
        if self.block_threshold > self.high_confidence_threshold {
            return Err(QualityError::InvalidThresholds(format!(
                "block threshold {} above high-confidence threshold {}",
                self.block_threshold, self.high_confidence_threshold
            )));
        }
        if self.metrics_capacity == 0 {
            return Err(QualityError::ZeroCapacity);
        }
        Ok(())
    }

    /// Gate for an overall score; any blocker blocks
    #[must_use]
    pub fn gate(&self, overall: f64, has_blockers: bool) -> QualityGate {
        if has_blockers || overall < self.block_threshold {
            QualityGate::Blocked
        } else if overall < self.high_confidence_threshold {
            QualityGate::AllowedWithIssues
        } else {
            QualityGate::HighConfidence
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        QualityConfig::default().validate().unwrap();
    }

    #[test]
    fn gate_bands() {
        let config = QualityConfig::default();
        assert_eq!(config.gate(42.0, false), QualityGate::Blocked);
        assert_eq!(config.gate(50.0, false), QualityGate::AllowedWithIssues);
        assert_eq!(config.gate(79.9, false), QualityGate::AllowedWithIssues);
        assert_eq!(config.gate(80.0, false), QualityGate::HighConfidence);
        assert_eq!(config.gate(95.0, true), QualityGate::Blocked);
    }

    #[test]
    fn rejects_non_positive_weight() {
        let config = QualityConfig::default().with_weight("clarity", 0.0);
        assert!(matches!(
            config.validate(),
            Err(QualityError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let config = QualityConfig {
            block_threshold: 90.0,
            ..QualityConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_criterion_gets_default_weight() {
        assert_eq!(QualityConfig::default().weight_for("security"), DEFAULT_WEIGHT);
        assert_eq!(QualityConfig::default().weight_for("acceptance_criteria"), 3.0);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: QualityConfig =
            serde_json::from_str(r#"{"pass_threshold": 60.0}"#).unwrap();
        assert_eq!(config.pass_threshold, 60.0);
        assert_eq!(config.metrics_capacity, DEFAULT_METRICS_CAPACITY);
    }
}
