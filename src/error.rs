//! Unified error type hierarchy for the hiccup meter.
//!
//! Provides structured error handling with ClockError, ConfigError,
//! RecorderError, ControlProcessError, and AttachError.

use std::io;
use thiserror::Error;

/// Monotonic clock acquisition errors. Fatal at startup: platforms without a
/// monotonic source are unsupported.
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("monotonic clock unavailable: clock_gettime(CLOCK_MONOTONIC) failed with errno {0}")]
    MonotonicUnavailable(i32),
}

/// Command-line and derived-configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("resolution must not be negative, got {0} ms")]
    NegativeResolution(f64),

    #[error("significant digits must be in 0..=5, got {0}")]
    SignificantDigitsOutOfRange(u8),

    #[error("input file not readable: {path}: {source}")]
    InputFileUnreadable { path: String, source: io::Error },

    #[error("attach mode requires a meter binary path, specify with -j")]
    MissingMeterBinary,
}

/// Histogram recording and interval-rotation errors.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("histogram creation failed: {0}")]
    Creation(String),

    #[error("histogram recording failed: {0}")]
    Record(String),

    #[error("sampling thread is gone; interval swap impossible")]
    SamplerGone,

    #[error("interval log write failed: {0}")]
    LogWrite(String),

    #[error("IO error in the interval pipeline: {0}")]
    Io(#[from] io::Error),
}

impl From<hdrhistogram::CreationError> for RecorderError {
    fn from(e: hdrhistogram::CreationError) -> Self {
        RecorderError::Creation(e.to_string())
    }
}

impl From<hdrhistogram::RecordError> for RecorderError {
    fn from(e: hdrhistogram::RecordError) -> Self {
        RecorderError::Record(e.to_string())
    }
}

/// Control-process launch and supervision errors. Advisory: the parent keeps
/// measuring when the control process fails.
#[derive(Error, Debug)]
pub enum ControlProcessError {
    #[error("failed to locate own executable: {0}")]
    ExecutableUnavailable(String),

    #[error("failed to spawn control process: {0}")]
    SpawnFailed(#[from] io::Error),
}

/// Attacher errors (hiccup-attach binary).
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("no such process: {0}")]
    NoSuchProcess(i32),

    #[error("meter binary not executable: {path}: {reason}")]
    MeterBinaryUnusable { path: String, reason: String },

    #[error("failed to spawn meter process: {0}")]
    SpawnFailed(#[from] io::Error),
}

/// Top-level result type for operations that may fail.
/// Use this as the return type for all fallible orchestration functions.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NegativeResolution(-1.5);
        assert_eq!(err.to_string(), "resolution must not be negative, got -1.5 ms");
    }

    #[test]
    fn test_clock_error_display() {
        let err = ClockError::MonotonicUnavailable(38);
        assert!(err.to_string().contains("errno 38"));
    }

    #[test]
    fn test_recorder_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: RecorderError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }
}
