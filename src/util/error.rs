//! Error types for the path tracer.
//!
//! Only construction-time failures are errors. Numerical faults inside the
//! kernel graph are absorbed by the kernels themselves (skip, clamp or
//! terminate the path) and never surface here.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for path tracer setup.
#[derive(Error, Debug)]
pub enum Error {
    /// Render target has a zero dimension or no passes
    #[error("Invalid buffer parameters: {0}")]
    InvalidBufferParams(String),

    /// Orchestrator was created without any device
    #[error("No compute devices configured")]
    NoDevices,

    /// Device cannot hold a single path state
    #[error("Device {name} has no path state capacity")]
    NoPathStates { name: String },

    /// Mesh references a vertex that does not exist
    #[error("Vertex index {index} out of bounds (count: {count})")]
    VertexOutOfBounds { index: usize, count: usize },

    /// Mesh, light or background references an unknown shader
    #[error("Unknown shader id {0}")]
    UnknownShader(u32),

    /// Scene data is inconsistent
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// Settings file does not exist
    #[error("Settings file not found: {0}")]
    SettingsNotFound(PathBuf),

    /// Settings value out of range
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid scene error.
    pub fn invalid_scene(msg: impl Into<String>) -> Self {
        Self::InvalidScene(msg.into())
    }
}

/// Result type alias for path tracer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::NoDevices;
        assert!(e.to_string().contains("device"));

        let e = Error::VertexOutOfBounds { index: 9, count: 4 };
        assert!(e.to_string().contains("9"));
        assert!(e.to_string().contains("4"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
