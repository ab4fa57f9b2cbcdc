//! Error types for quality configuration

/// Quality configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QualityError {
    /// Weights must be finite and strictly positive
    #[error("invalid weight for '{criterion}': {weight}")]
    InvalidWeight { criterion: String, weight: f64 },

    /// Thresholds must satisfy 0 <= block <= high <= 100
    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    /// Metrics buffer needs room for at least one entry
    #[error("metrics capacity must be positive")]
    ZeroCapacity,
}
