//! Interval histogram recording and rotation.
//!
//! The record path belongs to a single sampling thread; the swap path belongs
//! to a single reporting thread. The two meet through a bounded-channel
//! handshake: the reporter sends a replacement histogram and blocks for the
//! previous one, while the sampler only ever polls with `try_recv`, keeping
//! the record path wait-free.

use crate::error::RecorderError;
use crossbeam_channel::{bounded, Receiver, Sender};
use hdrhistogram::Histogram;

/// Build a value histogram with the configured dynamic range. Values are
/// nanoseconds.
pub fn build_histogram(
    lowest_trackable_ns: u64,
    highest_trackable_ns: u64,
    significant_digits: u8,
) -> Result<Histogram<u64>, RecorderError> {
    let h = Histogram::new_with_bounds(
        lowest_trackable_ns.max(1),
        highest_trackable_ns,
        significant_digits,
    )?;
    Ok(h)
}

/// Record a value with coordinated-omission correction: when `value_ns`
/// exceeds `expected_interval_ns`, synthetic samples are back-filled at
/// linearly decreasing magnitudes down to the expected interval. Values above
/// the trackable ceiling are clamped rather than rejected.
pub fn record_corrected(
    histogram: &mut Histogram<u64>,
    value_ns: u64,
    expected_interval_ns: u64,
) -> Result<(), RecorderError> {
    let value = value_ns.min(histogram.high());
    histogram.record_correct(value, expected_interval_ns)?;
    Ok(())
}

/// Bulk-record synthetic zero samples (gap filling in file-replay mode).
/// No coordinated-omission correction applies to zeros.
pub fn record_zeros(histogram: &mut Histogram<u64>, count: u64) -> Result<(), RecorderError> {
    if count > 0 {
        histogram.record_n(0, count)?;
    }
    Ok(())
}

/// An interval histogram handed from the sampler to the reporter, stamped
/// with the reporting timeline it covers.
pub struct IntervalHistogram {
    pub histogram: Histogram<u64>,
    pub start_ts_ms: i64,
    pub end_ts_ms: i64,
}

/// Writer half of the recorder. Owned by the sampling thread; the sole
/// mutator of the live histogram.
pub struct RecorderWriter {
    live: Histogram<u64>,
    expected_interval_ns: u64,
    fresh_rx: Receiver<Histogram<u64>>,
    retired_tx: Sender<Histogram<u64>>,
}

impl RecorderWriter {
    /// Record one hiccup value with coordinated-omission correction.
    pub fn record(&mut self, value_ns: u64) -> Result<(), RecorderError> {
        record_corrected(&mut self.live, value_ns, self.expected_interval_ns)
    }

    /// Honor a pending swap request, if any. One `try_recv` per call; never
    /// blocks. The retired channel always has a free slot here because the
    /// swapper consumes the previous histogram before requesting another.
    pub fn poll_swap(&mut self) {
        if let Ok(fresh) = self.fresh_rx.try_recv() {
            let retired = std::mem::replace(&mut self.live, fresh);
            let _ = self.retired_tx.send(retired);
        }
    }
}

/// Swapper half of the recorder. Owned by the reporting thread; rotates
/// interval histograms but never writes samples.
pub struct RecorderSwapper {
    fresh_tx: Sender<Histogram<u64>>,
    retired_rx: Receiver<Histogram<u64>>,
}

impl RecorderSwapper {
    /// Exchange the live histogram for `replacement`, returning the previous
    /// contents. Blocks until the sampling thread reaches its next iteration
    /// boundary (bounded by one resolution tick plus sleep granularity).
    pub fn swap(&self, replacement: Histogram<u64>) -> Result<Histogram<u64>, RecorderError> {
        self.fresh_tx
            .send(replacement)
            .map_err(|_| RecorderError::SamplerGone)?;
        self.retired_rx.recv().map_err(|_| RecorderError::SamplerGone)
    }
}

/// Wire up a writer/swapper pair around an initial live histogram.
pub fn recorder_pair(
    live: Histogram<u64>,
    expected_interval_ns: u64,
) -> (RecorderWriter, RecorderSwapper) {
    let (fresh_tx, fresh_rx) = bounded(1);
    let (retired_tx, retired_rx) = bounded(1);
    (
        RecorderWriter {
            live,
            expected_interval_ns,
            fresh_rx,
            retired_tx,
        },
        RecorderSwapper {
            fresh_tx,
            retired_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn small_histogram() -> Histogram<u64> {
        build_histogram(1, 3_600_000_000_000, 2).unwrap()
    }

    #[test]
    fn test_correction_backfills_k_counts() {
        // value = 5 * expected_interval: one real sample plus four synthetic
        // ones at 4e, 3e, 2e, 1e.
        let mut h = small_histogram();
        let e = 1_000_000u64;
        record_corrected(&mut h, 5 * e, e).unwrap();
        assert_eq!(h.len(), 5);
        for k in 1..=5u64 {
            assert!(h.count_at(k * e) >= 1, "missing count at {}e", k);
        }
    }

    #[test]
    fn test_correction_disabled_below_interval() {
        let mut h = small_histogram();
        record_corrected(&mut h, 900_000, 1_000_000).unwrap();
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_correction_disabled_with_zero_interval() {
        // resolution 0 (tight loop) must not back-fill anything
        let mut h = small_histogram();
        record_corrected(&mut h, 5_000_000, 0).unwrap();
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_overflow_clamps_to_ceiling() {
        let mut h = build_histogram(1, 1_000_000, 2).unwrap();
        record_corrected(&mut h, 50_000_000, 0).unwrap();
        assert_eq!(h.len(), 1);
        assert!(h.max() <= h.high());
    }

    #[test]
    fn test_record_zeros_counts() {
        let mut h = small_histogram();
        record_zeros(&mut h, 42).unwrap();
        assert_eq!(h.len(), 42);
        assert_eq!(h.max(), 0);
        record_zeros(&mut h, 0).unwrap();
        assert_eq!(h.len(), 42);
    }

    #[test]
    fn test_swap_returns_previous_contents() {
        let (mut writer, swapper) = recorder_pair(small_histogram(), 1_000_000);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_writer = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            while !stop_writer.load(Ordering::Relaxed) {
                writer.record(2_000_000).unwrap();
                writer.poll_swap();
                thread::sleep(std::time::Duration::from_millis(1));
            }
        });

        thread::sleep(std::time::Duration::from_millis(20));
        let previous = swapper.swap(small_histogram()).unwrap();
        assert!(previous.len() > 0);

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_swap_fails_when_writer_gone() {
        let (writer, swapper) = recorder_pair(small_histogram(), 1_000_000);
        drop(writer);
        assert!(swapper.swap(small_histogram()).is_err());
    }
}
