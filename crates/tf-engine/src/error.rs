//! Error types for the workflow engine
//!
//! Only boundary failures are returned from engine operations. A failure
//! inside a step action is recorded on the step and observed through the
//! instance status instead.

use crate::capability::ProviderError;
use tf_model::ModelError;
use tf_quality::QualityError;
use tf_store::StoreError;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input to a public operation; nothing was mutated
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another writer holds or has changed the instance
    #[error("concurrent modification of {0}")]
    ConcurrentModification(String),

    /// External capability failed; message kept verbatim
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Reasoning output was not usable
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("action timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("instance cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("quality configuration error: {0}")]
    Quality(#[from] QualityError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { key, .. } => Self::ConcurrentModification(key),
            StoreError::NotFound(key) => Self::NotFound(key),
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    /// Whether the same call may succeed later without changes
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification(_)
                | Self::Provider(_)
                | Self::Generation(_)
                | Self::Timeout { .. }
        )
    }

    /// Stable classification for logs and reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::Provider(_) => "provider",
            Self::Generation(_) => "generation",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Model(_) => "model",
            Self::Store(_) => "store",
            Self::Quality(_) => "quality",
        }
    }

    #[inline]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    #[inline]
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_message_is_verbatim() {
        let err = EngineError::from(ProviderError::new("upstream 503: model overloaded"));
        assert_eq!(err.to_string(), "upstream 503: model overloaded");
        assert_eq!(err.kind(), "provider");
        assert!(err.is_retryable());
    }

    #[test]
    fn version_conflict_maps_to_concurrent_modification() {
        let err = EngineError::from(StoreError::VersionConflict {
            key: "instances/x".into(),
            expected: Some(1),
            actual: Some(2),
        });
        assert!(matches!(err, EngineError::ConcurrentModification(ref k) if k == "instances/x"));
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err = EngineError::from(StoreError::NotFound("instances/y".into()));
        assert_eq!(err.kind(), "not_found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn backend_failure_stays_store_error() {
        let err = EngineError::from(StoreError::Backend("store unavailable".into()));
        assert_eq!(err.kind(), "store");
    }
}
