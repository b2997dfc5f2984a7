//! Sample sources feeding the interval pipeline.
//!
//! Two variants share one contract: `LiveSampler` measures the platform it is
//! running on, `FileSampler` replays a time-stamped latency stream. The
//! reporter drives either through `advance_to` and rotates interval
//! histograms through `swap_interval`.

pub mod file;
pub mod live;

pub use file::FileSampler;
pub use live::LiveSampler;

use crate::error::RecorderError;
use hdrhistogram::Histogram;

/// Result of driving a sampler toward a reporting deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The deadline was reached. Carries the current position on the run
    /// timeline: wall-clock milliseconds for the live source, input-stream
    /// milliseconds for the file source.
    ReachedDeadline(i64),
    /// The source is exhausted and will produce no further samples.
    Terminated,
}

/// The two sample sources, dispatched by the reporter.
pub enum SamplingRecorder {
    Live(LiveSampler),
    File(FileSampler),
}

impl SamplingRecorder {
    /// Produce samples until the run timeline reaches `deadline_ms`.
    pub fn advance_to(&mut self, deadline_ms: i64) -> AdvanceOutcome {
        match self {
            SamplingRecorder::Live(s) => s.advance_to(deadline_ms),
            SamplingRecorder::File(s) => s.advance_to(deadline_ms),
        }
    }

    /// Exchange the live histogram for `replacement`, returning the previous
    /// interval's contents.
    pub fn swap_interval(
        &mut self,
        replacement: Histogram<u64>,
    ) -> Result<Histogram<u64>, RecorderError> {
        match self {
            SamplingRecorder::Live(s) => s.swap_interval(replacement),
            SamplingRecorder::File(s) => Ok(s.swap_interval(replacement)),
        }
    }

    /// True when interval timestamps must come from the input stream rather
    /// than the wall clock.
    pub fn uses_input_timeline(&self) -> bool {
        matches!(self, SamplingRecorder::File(_))
    }

    /// Request cooperative termination. Idempotent.
    pub fn terminate(&mut self) {
        if let SamplingRecorder::Live(s) = self {
            s.terminate();
        }
    }

    /// Wait for the sampling thread to exit. No-op for the file source.
    pub fn join(&mut self) {
        if let SamplingRecorder::Live(s) = self {
            s.join();
        }
    }
}
