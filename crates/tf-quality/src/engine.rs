//! Quality validation engine

use crate::config::QualityConfig;
use crate::error::QualityError;
use crate::metrics::{MetricsBuffer, ScoringMetric};
use crate::validators::{default_validators, Validator};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tf_model::{QualityReport, TicketSpec, ValidationResult};

/// Weight-normalized aggregate in `[0, 1]`.
///
/// Only the given results contribute; a validator that did not apply is
/// absent from both numerator and denominator. No results scores 0.
#[must_use]
pub fn aggregate_score(results: &[ValidationResult]) -> f64 {
    let total_weight: f64 = results.iter().map(|r| r.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    results.iter().map(|r| r.score * r.weight).sum::<f64>() / total_weight
}

/// Scores artifacts against a set of weighted validators
///
/// Advisory only: the artifact is never modified.
#[derive(Debug)]
pub struct QualityEngine {
    validators: Vec<Arc<dyn Validator>>,
    config: QualityConfig,
    metrics: Arc<MetricsBuffer>,
}

impl QualityEngine {
    /// Engine with the built-in validators
    pub fn new(config: QualityConfig) -> Result<Self, QualityError> {
        Self::with_validators(config, default_validators())
    }

    pub fn with_validators(
        config: QualityConfig,
        validators: Vec<Arc<dyn Validator>>,
    ) -> Result<Self, QualityError> {
        config.validate()?;
        let metrics = Arc::new(MetricsBuffer::new(config.metrics_capacity));
        Ok(Self {
            validators,
            config,
            metrics,
        })
    }

    /// Add a validator; replaces any with the same criterion
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.remove(validator.criterion());
        self.validators.push(validator);
    }

    /// Remove by criterion; returns whether one was removed
    pub fn remove(&mut self, criterion: &str) -> bool {
        let before = self.validators.len();
        self.validators.retain(|v| v.criterion() != criterion);
        before != self.validators.len()
    }

    #[must_use]
    pub fn criteria(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.criterion()).collect()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsBuffer> {
        &self.metrics
    }

    /// Run every applicable validator and aggregate
    #[must_use]
    pub fn score(&self, spec: &TicketSpec) -> QualityReport {
        let started = Instant::now();

        let results: Vec<ValidationResult> = self
            .validators
            .iter()
            .filter(|v| v.applies_to(spec))
            .map(|v| v.validate(spec, self.config.weight_for(v.criterion())))
            .collect();

        let overall = aggregate_score(&results) * 100.0;
        let has_blockers = results.iter().any(ValidationResult::is_blocking);
        let passed = !has_blockers && overall >= self.config.pass_threshold;
        let gate = self.config.gate(overall, has_blockers);
        let duration = started.elapsed();

        self.metrics.record(ScoringMetric {
            recorded_at: Utc::now(),
            overall,
            passed,
            duration,
            validators: results
                .iter()
                .map(|r| (r.criterion.clone(), r.passed))
                .collect(),
        });

        tracing::debug!(
            overall,
            passed,
            ?gate,
            validators = results.len(),
            "quality scoring pass"
        );

        QualityReport {
            results,
            overall,
            passed,
            gate,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
