//! Structural error types shared by the feature layer

use std::fmt::Display;
use thiserror::Error;

/// Result alias for operations that can fail structurally
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Caller misuse detected before any numeric work starts.
///
/// Data-quality problems (too few observations, flat windows, sparse event
/// streams) are never reported through this type; they surface as rows with a
/// failed QC flag or a documented fallback estimate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    /// Input table lacks columns the operation needs
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A cell could not be interpreted as the type its column requires
    #[error("invalid value in column `{column}` at row {row}: {reason}")]
    InvalidValue {
        column: String,
        row: usize,
        reason: String,
    },

    /// A parameter is outside its admissible range
    #[error("invalid parameter `{name}`: must be {requirement}, got {actual}")]
    InvalidParameter {
        name: &'static str,
        requirement: String,
        actual: String,
    },

    /// An optional capability could not be initialised at call time
    #[error("{capability} is unavailable: {reason}")]
    DependencyUnavailable {
        capability: &'static str,
        reason: String,
    },
}

impl FeatureError {
    pub fn invalid_parameter(
        name: &'static str,
        requirement: impl Into<String>,
        actual: impl Display,
    ) -> Self {
        Self::InvalidParameter {
            name,
            requirement: requirement.into(),
            actual: actual.to_string(),
        }
    }

    pub fn invalid_value(column: &str, row: usize, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            column: column.to_string(),
            row,
            reason: reason.into(),
        }
    }

    pub fn unavailable(capability: &'static str, reason: impl Display) -> Self {
        Self::DependencyUnavailable {
            capability,
            reason: reason.to_string(),
        }
    }

    /// True when the error names an optional capability rather than bad input
    pub fn is_dependency_unavailable(&self) -> bool {
        matches!(self, Self::DependencyUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_message_names_bound() {
        let err = FeatureError::invalid_parameter("subseq_length", "greater than 1", 1);
        assert_eq!(
            err.to_string(),
            "invalid parameter `subseq_length`: must be greater than 1, got 1"
        );
        assert!(!err.is_dependency_unavailable());
    }

    #[test]
    fn test_missing_columns_lists_all() {
        let err = FeatureError::MissingColumns(vec!["bid_size".into(), "ask_size".into()]);
        assert_eq!(err.to_string(), "missing required columns: bid_size, ask_size");
    }

    #[test]
    fn test_unavailable_is_flagged() {
        let err = FeatureError::unavailable("parallel matrix profile engine", "feature disabled");
        assert!(err.is_dependency_unavailable());
    }
}
