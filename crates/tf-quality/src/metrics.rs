//! Bounded buffer of recent scoring passes
//!
//! Owned by a [`QualityEngine`](crate::QualityEngine) for the lifetime of the
//! service. Oldest entries are evicted first; every query is a pure read
//! over what is currently buffered.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// One recorded scoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringMetric {
    pub recorded_at: DateTime<Utc>,
    pub overall: f64,
    pub passed: bool,
    pub duration: Duration,
    /// (criterion, passed) for every validator that applied
    pub validators: Vec<(String, bool)>,
}

/// Fixed-capacity circular buffer of [`ScoringMetric`]s
#[derive(Debug)]
pub struct MetricsBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<ScoringMetric>>,
}

impl MetricsBuffer {
    /// Capacity is clamped to at least one entry
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, metric: ScoringMetric) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Copy of the buffered entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<ScoringMetric> {
        self.entries.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn average_score(&self) -> Option<f64> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        Some(entries.iter().map(|m| m.overall).sum::<f64>() / entries.len() as f64)
    }

    #[must_use]
    pub fn pass_rate(&self) -> Option<f64> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        let passed = entries.iter().filter(|m| m.passed).count();
        Some(passed as f64 / entries.len() as f64)
    }

    #[must_use]
    pub fn average_duration(&self) -> Option<Duration> {
        let entries = self.entries.lock();
        let count = u32::try_from(entries.len()).ok().filter(|&n| n > 0)?;
        Some(entries.iter().map(|m| m.duration).sum::<Duration>() / count)
    }

    /// Pass rate per criterion, over the passes where it applied
    #[must_use]
    pub fn validator_pass_rates(&self) -> BTreeMap<String, f64> {
        let entries = self.entries.lock();
        let mut tally: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for (criterion, passed) in entries.iter().flat_map(|m| m.validators.iter()) {
            let slot = tally.entry(criterion.clone()).or_default();
            slot.1 += 1;
            if *passed {
                slot.0 += 1;
            }
        }
        tally
            .into_iter()
            .map(|(criterion, (passed, total))| (criterion, passed as f64 / total as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(overall: f64, passed: bool, millis: u64, validators: &[(&str, bool)]) -> ScoringMetric {
        ScoringMetric {
            recorded_at: Utc::now(),
            overall,
            passed,
            duration: Duration::from_millis(millis),
            validators: validators.iter().map(|(c, p)| (c.to_string(), *p)).collect(),
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let buffer = MetricsBuffer::new(3);
        for score in [10.0, 20.0, 30.0, 40.0] {
            buffer.record(metric(score, true, 1, &[]));
        }
        assert_eq!(buffer.len(), 3);
        let scores: Vec<f64> = buffer.snapshot().iter().map(|m| m.overall).collect();
        assert_eq!(scores, vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn aggregates_over_buffer() {
        let buffer = MetricsBuffer::new(10);
        assert_eq!(buffer.average_score(), None);
        assert_eq!(buffer.average_duration(), None);

        buffer.record(metric(90.0, true, 10, &[("clarity", true), ("scope", true)]));
        buffer.record(metric(40.0, false, 30, &[("clarity", false)]));

        assert_eq!(buffer.average_score(), Some(65.0));
        assert_eq!(buffer.pass_rate(), Some(0.5));
        assert_eq!(buffer.average_duration(), Some(Duration::from_millis(20)));

        let rates = buffer.validator_pass_rates();
        assert_eq!(rates["clarity"], 0.5);
        assert_eq!(rates["scope"], 1.0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer = MetricsBuffer::new(0);
        buffer.record(metric(1.0, true, 1, &[]));
        buffer.record(metric(2.0, true, 1, &[]));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn clear_empties_buffer() {
        let buffer = MetricsBuffer::new(2);
        buffer.record(metric(1.0, true, 1, &[]));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
