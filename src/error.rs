//! Error types for the AFNO filter blocks

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, AfnoError>;

/// Errors raised while building or evaluating a filter block
#[derive(Error, Debug)]
pub enum AfnoError {
    /// Invalid layer configuration, detected at construction time
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Input tensor shape is incompatible with the layer
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Config file could not be parsed
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// IO error while reading a config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ndarray::ShapeError> for AfnoError {
    fn from(err: ndarray::ShapeError) -> Self {
        AfnoError::shape("a compatible array layout", err.to_string())
    }
}

impl AfnoError {
    /// Build a configuration error from anything displayable
    pub fn config(msg: impl Into<String>) -> Self {
        AfnoError::Configuration(msg.into())
    }

    /// Build a shape mismatch error from two shape descriptions
    pub fn shape(expected: impl Into<String>, got: impl Into<String>) -> Self {
        AfnoError::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// True for construction-time configuration errors
    pub fn is_configuration(&self) -> bool {
        matches!(self, AfnoError::Configuration(_))
    }

    /// True for forward-time shape errors
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, AfnoError::ShapeMismatch { .. })
    }
}
