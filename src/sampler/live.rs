//! Live sampling: the hot hiccup-measurement loop.
//!
//! A dedicated thread repeatedly sleeps for the configured resolution and
//! measures how long each sleep actually took. The difference between an
//! observed inter-sample delta and the shortest delta ever observed is the
//! hiccup magnitude. The hot path does not allocate, lock, or perform I/O.

use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::error::RecorderError;
use crate::recorder::{self, RecorderSwapper, RecorderWriter};
use crate::sampler::AdvanceOutcome;
use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Coarse poll granularity while the reporter waits out a deadline.
const DEADLINE_POLL_MS: i64 = 100;

/// Per-checkpoint hiccup extraction. Tracks the rolling minimum inter-sample
/// delta; the minimum is the empirical "no stall" floor, so the reported
/// hiccup is how much worse this delta was than the best ever seen.
struct SampleState {
    last_ts_ns: Option<u64>,
    rolling_min_ns: u64,
}

impl SampleState {
    fn new() -> Self {
        SampleState {
            last_ts_ns: None,
            rolling_min_ns: u64::MAX,
        }
    }

    /// Feed one checkpoint timestamp; returns the hiccup to record, or None
    /// for the first checkpoint of an epoch. A timestamp below the previous
    /// one cannot occur with a monotonic clock; if it ever does, the sample
    /// is discarded and the epoch re-anchors.
    fn observe(&mut self, now_ns: u64) -> Option<u64> {
        let last = match self.last_ts_ns {
            Some(last) => last,
            None => {
                self.last_ts_ns = Some(now_ns);
                return None;
            }
        };
        if now_ns < last {
            self.last_ts_ns = Some(now_ns);
            return None;
        }
        let delta = now_ns - last;
        self.last_ts_ns = Some(now_ns);
        if delta < self.rolling_min_ns {
            self.rolling_min_ns = delta;
        }
        Some(delta - self.rolling_min_ns)
    }
}

/// Owns the sampling thread and the reporter-facing swap handle.
pub struct LiveSampler {
    clock: MonotonicClock,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    swapper: RecorderSwapper,
}

impl LiveSampler {
    /// Spawn the sampling thread. Its histogram state starts fresh, so a
    /// sampler created after the warm-up epoch carries nothing over.
    pub fn start(config: &Config, clock: MonotonicClock) -> Result<LiveSampler, RecorderError> {
        let live = recorder::build_histogram(
            config.lowest_trackable_ns,
            config.highest_trackable_ns,
            config.significant_digits,
        )?;
        let (writer, swapper) = recorder::recorder_pair(live, config.resolution_ns);

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_flag);
        let resolution_ns = config.resolution_ns;
        let allocate = config.allocate_objects;
        let handle = thread::Builder::new()
            .name("hiccup-sampler".to_string())
            .spawn(move || sample_loop(clock, resolution_ns, allocate, stop, writer))?;

        Ok(LiveSampler {
            clock,
            stop_flag,
            handle: Some(handle),
            swapper,
        })
    }

    /// Sleep in coarse chunks until the wall clock reaches `deadline_ms`.
    /// The sampling thread keeps producing into the live histogram meanwhile.
    pub fn advance_to(&mut self, deadline_ms: i64) -> AdvanceOutcome {
        loop {
            let now = self.clock.wall_ms();
            if now >= deadline_ms {
                return AdvanceOutcome::ReachedDeadline(now);
            }
            if self.handle.as_ref().map_or(true, |h| h.is_finished()) {
                return AdvanceOutcome::Terminated;
            }
            let wait_ms = (deadline_ms - now).clamp(1, DEADLINE_POLL_MS) as u64;
            thread::sleep(Duration::from_millis(wait_ms));
        }
    }

    pub fn swap_interval(
        &mut self,
        replacement: Histogram<u64>,
    ) -> Result<Histogram<u64>, RecorderError> {
        self.swapper.swap(replacement)
    }

    /// Request cooperative termination. The thread observes the flag at its
    /// next iteration boundary.
    pub fn terminate(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("sampling thread panicked during shutdown");
            }
        }
    }
}

impl Drop for LiveSampler {
    fn drop(&mut self) {
        self.terminate();
        self.join();
    }
}

fn sample_loop(
    clock: MonotonicClock,
    resolution_ns: u64,
    allocate: bool,
    stop: Arc<AtomicBool>,
    mut writer: RecorderWriter,
) {
    let mut state = SampleState::new();
    // Landing pad for the allocation probe; the relaxed store keeps the
    // compiler from proving the boxed value dead.
    let alloc_probe = AtomicU64::new(0);

    while !stop.load(Ordering::Relaxed) {
        if resolution_ns > 0 {
            clock.sleep_ns(resolution_ns);
        }
        if allocate {
            let obj = Box::new(clock.now_ns());
            alloc_probe.store(*std::hint::black_box(&*obj), Ordering::Relaxed);
        }
        let now_ns = clock.now_ns();
        if let Some(hiccup_ns) = state.observe(now_ns) {
            if let Err(e) = writer.record(hiccup_ns) {
                log::warn!("sample dropped: {}", e);
            }
        }
        writer.poll_swap();
    }
}
