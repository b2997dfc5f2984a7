//! File-driven sampling: replays a time-stamped latency stream.
//!
//! Each input line carries two whitespace-separated numbers, a timestamp and
//! a latency, both in milliseconds. In the default interpretation a line is a
//! latency sample taken at its timestamp; with fill-zeros it is a pause event
//! ending at its timestamp, and the blank time between events is back-filled
//! with zero samples at resolution granularity. Deadlines here are positions
//! on the input-stream timeline, not the wall clock.

use crate::config::Config;
use crate::error::RecorderError;
use crate::recorder;
use crate::sampler::AdvanceOutcome;
use hdrhistogram::Histogram;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};

struct InputLine {
    ts_ms: i64,
    latency_ms: f64,
}

pub struct FileSampler {
    live: Histogram<u64>,
    resolution_ns: u64,
    fill_zeros: bool,
    lines: Lines<BufReader<File>>,
    buffered: Option<InputLine>,
    prev_ts_ms: i64,
    input_ended: bool,
    final_deadline_emitted: bool,
}

impl FileSampler {
    pub fn open(config: &Config) -> Result<FileSampler, RecorderError> {
        let path = config
            .input_path
            .as_ref()
            .expect("file sampler requires an input path");
        let file = File::open(path)?;
        let live = recorder::build_histogram(
            config.lowest_trackable_ns,
            config.highest_trackable_ns,
            config.significant_digits,
        )?;
        Ok(FileSampler {
            live,
            resolution_ns: config.resolution_ns,
            fill_zeros: config.fill_zeros,
            lines: BufReader::new(file).lines(),
            buffered: None,
            prev_ts_ms: 0,
            input_ended: false,
            final_deadline_emitted: false,
        })
    }

    /// Discard leading events with timestamps below `ts_ms` (warm-up window
    /// of the input stream).
    pub fn skip_until(&mut self, ts_ms: i64) {
        loop {
            self.fill_buffer();
            match &self.buffered {
                Some(line) if line.ts_ms < ts_ms => self.buffered = None,
                _ => return,
            }
        }
    }

    /// Timestamp of the first (remaining) event, which anchors the run
    /// timeline. Returns None on empty or unparseable input.
    pub fn start_time_ms(&mut self) -> Option<i64> {
        self.fill_buffer();
        let ts = self.buffered.as_ref()?.ts_ms;
        self.prev_ts_ms = ts;
        Some(ts)
    }

    /// Consume input up to `deadline_ms` on the input timeline, recording
    /// latencies (and gap zeros when configured) along the way. On
    /// end-of-input one final `ReachedDeadline` is emitted, with trailing
    /// zero-fill up to the deadline; every later call returns `Terminated`.
    pub fn advance_to(&mut self, deadline_ms: i64) -> AdvanceOutcome {
        loop {
            self.fill_buffer();
            let (ts_ms, latency_ms) = match &self.buffered {
                Some(line) => (line.ts_ms, line.latency_ms),
                None => {
                    if self.final_deadline_emitted {
                        return AdvanceOutcome::Terminated;
                    }
                    self.final_deadline_emitted = true;
                    if self.fill_zeros {
                        self.fill_zero_ticks(deadline_ms);
                    }
                    self.prev_ts_ms = self.prev_ts_ms.max(deadline_ms);
                    return AdvanceOutcome::ReachedDeadline(deadline_ms);
                }
            };

            // The window a pause event blanks out starts at ts - latency;
            // a plain latency sample occupies its timestamp only.
            let preceding_ms = if self.fill_zeros {
                ts_ms - latency_ms.ceil() as i64
            } else {
                ts_ms
            };

            if deadline_ms < preceding_ms {
                // Next event lies beyond this deadline.
                if self.fill_zeros {
                    self.fill_zero_ticks(deadline_ms);
                }
                self.prev_ts_ms = self.prev_ts_ms.max(deadline_ms);
                return AdvanceOutcome::ReachedDeadline(deadline_ms);
            }

            if preceding_ms >= self.prev_ts_ms {
                if self.fill_zeros {
                    self.fill_zero_ticks(preceding_ms);
                }
                self.record_latency(latency_ms);
                self.prev_ts_ms = ts_ms;
            } else {
                // The event's window reaches into already-covered time (a
                // pause overlapping the previous one, or reaching before
                // input start). Covered time is not re-filled.
                self.record_latency(latency_ms);
                self.prev_ts_ms = self.prev_ts_ms.max(ts_ms);
            }
            self.buffered = None;
        }
    }

    /// Direct in-place exchange: writer and swapper are the same thread here.
    pub fn swap_interval(&mut self, replacement: Histogram<u64>) -> Histogram<u64> {
        std::mem::replace(&mut self.live, replacement)
    }

    /// Read ahead one event. Blank lines are skipped; a malformed line, a
    /// latency below zero, or a timestamp running backwards ends the input
    /// cleanly (fail-soft, equivalent to end-of-file).
    fn fill_buffer(&mut self) {
        if self.buffered.is_some() || self.input_ended {
            return;
        }
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(_)) | None => {
                    self.input_ended = true;
                    return;
                }
            };
            let mut fields = line.split_whitespace();
            let (first, second) = match (fields.next(), fields.next()) {
                (Some(a), Some(b)) => (a, b),
                (None, _) => continue, // blank line
                _ => {
                    self.input_ended = true;
                    return;
                }
            };
            let (ts, latency_ms) = match (first.parse::<f64>(), second.parse::<f64>()) {
                (Ok(ts), Ok(lat)) if lat >= 0.0 => (ts, lat),
                _ => {
                    self.input_ended = true;
                    return;
                }
            };
            let ts_ms = ts as i64;
            if ts_ms < self.prev_ts_ms {
                log::warn!(
                    "input timestamp ran backwards ({} < {}), ending input",
                    ts_ms,
                    self.prev_ts_ms
                );
                self.input_ended = true;
                return;
            }
            self.buffered = Some(InputLine { ts_ms, latency_ms });
            return;
        }
    }

    /// Record one zero per resolution tick between prev_ts_ms and up_to_ms.
    fn fill_zero_ticks(&mut self, up_to_ms: i64) {
        if up_to_ms <= self.prev_ts_ms || self.resolution_ns == 0 {
            return;
        }
        let gap_ns = (up_to_ms - self.prev_ts_ms) as u64 * 1_000_000;
        let count = gap_ns / self.resolution_ns;
        if let Err(e) = recorder::record_zeros(&mut self.live, count) {
            log::warn!("zero fill dropped: {}", e);
        }
    }

    fn record_latency(&mut self, latency_ms: f64) {
        let value_ns = (latency_ms * 1_000_000.0) as u64;
        if let Err(e) = recorder::record_corrected(&mut self.live, value_ns, self.resolution_ns) {
            log::warn!("sample dropped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MeterArgs};
    use clap::Parser;
    use std::io::Write;

    fn sampler_for(content: &str, extra_args: &[&str]) -> (FileSampler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();

        let mut argv = vec!["hiccup-meter", "-f", path.to_str().unwrap()];
        argv.extend_from_slice(extra_args);
        let args = MeterArgs::try_parse_from(argv).unwrap();
        let config = Config::from_args_at(args, 1, "x", false).unwrap();
        (FileSampler::open(&config).unwrap(), dir)
    }

    fn drain(sampler: &mut FileSampler) -> Histogram<u64> {
        sampler.swap_interval(Histogram::new_with_bounds(1, 3_600_000_000_000, 2).unwrap())
    }

    #[test]
    fn test_latency_interpretation() {
        // S3: one 50 ms sample at t=2, zeros elsewhere, resolution 1 ms
        let (mut s, _dir) = sampler_for("0 0\n1 0\n2 50\n3 0\n", &["-r", "1"]);
        assert_eq!(s.start_time_ms(), Some(0));

        assert_eq!(s.advance_to(10), AdvanceOutcome::ReachedDeadline(10));
        let h = drain(&mut s);
        // 4 real samples; the 50 ms one back-fills 49 synthetic entries
        assert_eq!(h.len(), 4 + 49);
        assert!(h.max() >= 49_000_000 && h.max() <= 51_000_000);

        // the end-of-input deadline was already emitted above
        assert_eq!(s.advance_to(20), AdvanceOutcome::Terminated);
    }

    #[test]
    fn test_pause_interpretation_with_zero_fill() {
        // S4: the 50 ms pause window is clamped at input start; zero fill
        // covers the gaps so interval density equals one entry per tick.
        let (mut s, _dir) = sampler_for("0 0\n1 0\n2 50\n3 0\n", &["-r", "1", "-z"]);
        assert_eq!(s.start_time_ms(), Some(0));

        assert_eq!(s.advance_to(10), AdvanceOutcome::ReachedDeadline(10));
        let h = drain(&mut s);
        // zeros: [0,1) before t=1, [2,3) before t=3, [3,10) trailing-free
        // up to the deadline; events: 4 real + 49 corrected
        assert_eq!(h.len(), 1 + 1 + 7 + 4 + 49);
    }

    #[test]
    fn test_zero_fill_density() {
        // Property: with only instantaneous events, per-interval count is
        // gap_ms / resolution_ms worth of zeros plus the events themselves.
        let (mut s, _dir) = sampler_for("0 0\n100 0\n", &["-r", "1", "-z"]);
        assert_eq!(s.start_time_ms(), Some(0));
        assert_eq!(s.advance_to(100), AdvanceOutcome::ReachedDeadline(100));
        let h = drain(&mut s);
        assert_eq!(h.len(), 100 + 2);
        assert_eq!(h.max(), 0);
    }

    #[test]
    fn test_deadline_before_next_event() {
        let (mut s, _dir) = sampler_for("0 0\n1000 0\n", &["-r", "1"]);
        assert_eq!(s.start_time_ms(), Some(0));
        assert_eq!(s.advance_to(500), AdvanceOutcome::ReachedDeadline(500));
        let h = drain(&mut s);
        assert_eq!(h.len(), 1); // only the t=0 event so far

        // no new events before the same deadline: same outcome kind
        assert_eq!(s.advance_to(500), AdvanceOutcome::ReachedDeadline(500));
    }

    #[test]
    fn test_backwards_timestamp_ends_input() {
        let (mut s, _dir) = sampler_for("0 0\n5 0\n3 0\n9 0\n", &["-r", "1"]);
        assert_eq!(s.start_time_ms(), Some(0));
        assert_eq!(s.advance_to(100), AdvanceOutcome::ReachedDeadline(100));
        let h = drain(&mut s);
        assert_eq!(h.len(), 2); // t=0 and t=5; the rest is dropped
        assert_eq!(s.advance_to(200), AdvanceOutcome::Terminated);
    }

    #[test]
    fn test_malformed_line_ends_input() {
        let (mut s, _dir) = sampler_for("0 0\n1 0\nnot numbers\n2 0\n", &["-r", "1"]);
        assert_eq!(s.start_time_ms(), Some(0));
        assert_eq!(s.advance_to(100), AdvanceOutcome::ReachedDeadline(100));
        let h = drain(&mut s);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn test_skip_until_discards_warmup_events() {
        let (mut s, _dir) = sampler_for("0 10\n500 10\n1000 7\n1500 0\n", &["-r", "1"]);
        s.skip_until(1000);
        assert_eq!(s.start_time_ms(), Some(1000));
        assert_eq!(s.advance_to(2000), AdvanceOutcome::ReachedDeadline(2000));
        let h = drain(&mut s);
        // t=1000 (7 ms → 1 + 6 corrected) and t=1500
        assert_eq!(h.len(), 8);
    }

    #[test]
    fn test_empty_input_terminates_after_final_deadline() {
        let (mut s, _dir) = sampler_for("", &["-r", "1"]);
        assert_eq!(s.start_time_ms(), None);
        assert_eq!(s.advance_to(10), AdvanceOutcome::ReachedDeadline(10));
        assert_eq!(s.advance_to(20), AdvanceOutcome::Terminated);
    }
}
