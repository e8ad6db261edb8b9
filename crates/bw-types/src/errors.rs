use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the Bloomwise system
#[derive(Error, Debug)]
pub enum BwError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Dataset loading, splitting and input validation errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required column: {column}")]
    MissingColumn { column: String },

    #[error("Failed to parse row {row}, column {column}: {message}")]
    ParseError {
        row: usize,
        column: String,
        message: String,
    },

    #[error("Dataset is empty: {message}")]
    Empty { message: String },

    #[error("Invalid split: {message}")]
    InvalidSplit { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("CSV error: {message}")]
    Csv { message: String },
}

/// Classifier construction, fitting and prediction errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unknown model family: {reference}")]
    UnknownFamily { reference: String },

    #[error("Unknown parameter for {family}: {parameter}")]
    UnknownParameter { family: String, parameter: String },

    #[error("Invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Shape mismatch: expected {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Training failed: {message}")]
    TrainingFailed { message: String },
}

/// A single optimization trial that could not produce a score
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialError {
    #[error("Trial fit failed: {message}")]
    FitFailed { message: String },

    #[error("Trial timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: f64 },

    #[error("Trial worker terminated without reporting a result")]
    WorkerLost,
}

/// Final-fit and tracking errors that exclude a candidate from selection
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("No successful trial for family {family}")]
    NoSuccessfulTrial { family: String },

    #[error("Final fit failed for {family}: {message}")]
    FitFailed { family: String, message: String },

    #[error("Final fit for {family} timed out after {timeout_seconds} seconds")]
    Timeout { family: String, timeout_seconds: f64 },

    #[error("Tracking run for {family} could not be recorded: {message}")]
    Tracking { family: String, message: String },
}

/// Model registry and tracking store errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No production version registered for {name}")]
    NotFound { name: String },

    #[error("Version {version} not found for {name}")]
    VersionNotFound { name: String, version: u32 },

    #[error("Promotion inconsistency for {name}: {message}")]
    PromotionInconsistency { name: String, message: String },

    #[error("Registry storage failure: {message}")]
    Storage { message: String },

    #[error("Artifact {uri} unavailable: {message}")]
    Artifact { uri: String, message: String },
}

/// Result type alias for Bloomwise operations
pub type BwResult<T> = Result<T, BwError>;

/// Helper trait for converting string errors
pub trait IntoBwError {
    fn into_bw_error(self) -> BwError;
}

impl IntoBwError for String {
    fn into_bw_error(self) -> BwError {
        BwError::Internal(self)
    }
}

impl IntoBwError for &str {
    fn into_bw_error(self) -> BwError {
        BwError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::BwError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::BwError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::BwError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RegistryError::VersionNotFound {
            name: "iris_best_model".to_string(),
            version: 7,
        };

        assert!(error.to_string().contains("iris_best_model"));
        assert!(error.to_string().contains('7'));
    }

    #[test]
    fn test_error_conversion() {
        let registry_error = RegistryError::NotFound {
            name: "iris_best_model".to_string(),
        };
        let bw_error: BwError = registry_error.into();

        match bw_error {
            BwError::Registry(RegistryError::NotFound { .. }) => (),
            _ => panic!("Expected Registry error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, BwError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, BwError::Internal(_)));
        let config_err = config_error!("Missing required field: {}", "model.target_column");
        assert!(config_err.to_string().starts_with("Configuration error"));
    }
}
