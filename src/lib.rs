//! Platform hiccup measurement.
//!
//! Measures execution stalls ("hiccups") that the runtime, operating system,
//! hypervisor, or hardware impose on any runnable thread, independently of
//! application code. A sampling thread repeatedly sleeps for a small fixed
//! interval and records how much longer than the empirical minimum each
//! sleep took; the magnitudes accumulate in HdrHistogram interval histograms
//! emitted as an interval log for downstream percentile analysis.
//!
//! The system is organized into functional modules:
//! - **error**: unified error type hierarchy
//! - **clock**: monotonic time source and nanosecond sleep
//! - **config**: flag parsing, derived values, validation
//! - **recorder**: histogram recording and the single-writer interval handoff
//! - **sampler**: the live hot loop and the file-replay source
//! - **reporter**: reporting-interval cadence and interval-log emission
//! - **control**: control-process supervision and stdin-severance
//! - **meter**: orchestration of the above

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod meter;
pub mod recorder;
pub mod reporter;
pub mod sampler;

pub use clock::MonotonicClock;
pub use config::{Config, MeterArgs, AVOID_RECURSION_ENV};
pub use error::{
    AttachError, ClockError, ConfigError, ControlProcessError, RecorderError, Result,
};
pub use meter::HiccupMeter;
pub use sampler::{AdvanceOutcome, FileSampler, LiveSampler, SamplingRecorder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
