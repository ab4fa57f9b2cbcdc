//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial files are fine.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tf_quality::QualityConfig;

/// How questions left unanswered are carried into synthesis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAnswerPolicy {
    /// Leave the answer out and tell synthesis to assume a reasonable default
    #[default]
    OmitInfluence,
    /// Insert a neutral value: first option, or "no preference" for text
    NeutralDefault,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Clarification rounds before synthesis proceeds regardless
    pub max_question_rounds: u32,
    pub max_context_files: usize,
    pub max_context_bytes: usize,
    /// Deadline applied to each step action, in milliseconds
    pub action_timeout_ms: u64,
    /// Worker pool size for bulk fan-out
    pub bulk_workers: usize,
    pub default_answer_policy: DefaultAnswerPolicy,
    /// How long observers treat a missing instance as initializing, in
    /// milliseconds
    pub progress_grace_period_ms: u64,
    pub draft_ttl_hours: u64,
    pub quality: QualityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_question_rounds: 3,
            max_context_files: 100,
            max_context_bytes: 256 * 1024,
            action_timeout_ms: 120_000,
            bulk_workers: 4,
            default_answer_policy: DefaultAnswerPolicy::default(),
            progress_grace_period_ms: 30_000,
            draft_ttl_hours: 72,
            quality: QualityConfig::default(),
        }
    }
}

impl EngineConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_question_rounds == 0 {
            return Err(EngineError::Config("max_question_rounds must be positive".into()));
        }
        if self.bulk_workers == 0 {
            return Err(EngineError::Config("bulk_workers must be positive".into()));
        }
        if self.max_context_files == 0 {
            return Err(EngineError::Config("max_context_files must be positive".into()));
        }
        if self.action_timeout_ms == 0 {
            return Err(EngineError::Config("action_timeout_ms must be positive".into()));
        }
        self.quality.validate()?;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn progress_grace_period(&self) -> Duration {
        Duration::from_millis(self.progress_grace_period_ms)
    }

    /// Clamped to ten years
    #[must_use]
    pub fn draft_ttl(&self) -> chrono::Duration {
        const MAX_TTL_HOURS: i64 = 24 * 365 * 10;
        let hours = i64::try_from(self.draft_ttl_hours).map_or(MAX_TTL_HOURS, |h| h.min(MAX_TTL_HOURS));
        chrono::Duration::hours(hours)
    }

    #[inline]
    #[must_use]
    pub fn with_max_question_rounds(mut self, rounds: u32) -> Self {
        self.max_question_rounds = rounds;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_bulk_workers(mut self, workers: usize) -> Self {
        self.bulk_workers = workers;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_context_files(mut self, files: usize) -> Self {
        self.max_context_files = files;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_context_bytes(mut self, bytes: usize) -> Self {
        self.max_context_bytes = bytes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout_ms = duration_ms(timeout).max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_answer_policy(mut self, policy: DefaultAnswerPolicy) -> Self {
        self.default_answer_policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_progress_grace_period(mut self, grace: Duration) -> Self {
        self.progress_grace_period_ms = duration_ms(grace);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
