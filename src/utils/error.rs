//! Error Handling Module
//!
//! Defines custom error types for the terraseg library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for terraseg operations
#[derive(Error, Debug)]
pub enum TerrasegError {
    /// No checkpoint file at the given path
    #[error("no checkpoint found at '{0}'")]
    CheckpointNotFound(PathBuf),

    /// The configured model name matches no known architecture
    #[error("the model name '{0}' in the configuration is not defined")]
    UnknownModel(String),

    /// A band-constrained architecture was configured with the wrong band count
    #[error("'{model}' requires {expected}-band input, configuration specifies {actual} bands")]
    IncompatibleBands {
        model: String,
        expected: usize,
        actual: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Error reading or interpreting a checkpoint
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Error with model construction or weight transfer
    #[error("model error: {0}")]
    Model(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type for terraseg operations
pub type Result<T> = std::result::Result<T, TerrasegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TerrasegError::UnknownModel("hrnet".to_string());
        assert_eq!(
            format!("{}", err),
            "the model name 'hrnet' in the configuration is not defined"
        );
    }

    #[test]
    fn test_checkpoint_not_found_display() {
        let err = TerrasegError::CheckpointNotFound(PathBuf::from("/tmp/missing.json"));
        assert!(format!("{}", err).contains("missing.json"));
    }

    #[test]
    fn test_incompatible_bands_display() {
        let err = TerrasegError::IncompatibleBands {
            model: "ternausnet".to_string(),
            expected: 3,
            actual: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ternausnet"));
        assert!(msg.contains("3-band"));
        assert!(msg.contains("4 bands"));
    }
}
