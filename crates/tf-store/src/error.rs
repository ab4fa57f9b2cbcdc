//! Error types for the store layer

/// Store errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// No document under key
    #[error("document not found: {0}")]
    NotFound(String),

    /// Conditional write lost against a concurrent writer
    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// Document body did not (de)serialize
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let err = StoreError::VersionConflict {
            key: "instances/1".into(),
            expected: Some(2),
            actual: Some(3),
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("instances/1"));
    }
}
