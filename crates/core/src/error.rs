// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading a monitored log file.
///
/// None of these are fatal to a monitoring loop: `NotFoundYet` is the normal
/// pre-start condition and everything else is retried on the next poll.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Log file not found yet: {path}")]
    NotFoundYet { path: PathBuf },

    #[error("Permission denied reading log file: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Transient IO error reading {path}: {source}")]
    TransientRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFoundYet { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::TransientRead { path, source },
        }
    }

    /// Whether the file simply does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFoundYet { .. })
    }
}

/// Errors that can occur when loading or validating monitor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid {field} marker pattern: {message}")]
    InvalidPattern { field: &'static str, message: String },

    #[error("Marker pattern {field} is missing capture group '{group}'")]
    MissingCaptureGroup {
        field: &'static str,
        group: &'static str,
    },

    #[error("Invalid polling bounds: min {min_ms}ms <= base {base_ms}ms <= max {max_ms}ms must hold")]
    InvalidIntervals { min_ms: u64, base_ms: u64, max_ms: u64 },

    #[error("Backoff factor must be >= 1.0, got {0}")]
    InvalidBackoff(f64),

    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}
