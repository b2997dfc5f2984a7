//! Interval reporting: deadline cadence, histogram rotation, log emission.
//!
//! The reporter owns the reporting thread's side of the pipeline. It sleeps
//! toward each reporting deadline, swaps the live histogram for a cleared
//! one, and writes one log line per non-empty interval. Emission is either an
//! HdrHistogram interval log (compressed, base64 payloads) or CSV lines.

use crate::clock::{self, MonotonicClock};
use crate::config::{Config, TIME_DELAY_MS_BEFORE_RAISING_LOG_ERRORS};
use crate::error::RecorderError;
use crate::recorder::{self, IntervalHistogram};
use crate::sampler::{AdvanceOutcome, SamplingRecorder};
use hdrhistogram::serialization::interval_log::{IntervalLogWriter, IntervalLogWriterBuilder};
use hdrhistogram::serialization::V2DeflateSerializer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Values are recorded in nanoseconds; logged maxima and percentiles are
/// reported in milliseconds.
const OUTPUT_VALUE_UNIT_RATIO: f64 = 1_000_000.0;

pub struct IntervalReporter<'a> {
    config: &'a Config,
    clock: MonotonicClock,
}

impl<'a> IntervalReporter<'a> {
    pub fn new(config: &'a Config, clock: MonotonicClock) -> Self {
        IntervalReporter { config, clock }
    }

    /// Drive the sampler until the run ends, writing the interval log to the
    /// configured path. `run_start_ms` anchors the run timeline: wall-clock
    /// milliseconds for the live source, the first input timestamp for the
    /// file source.
    pub fn run(
        &self,
        sampler: &mut SamplingRecorder,
        run_start_ms: i64,
    ) -> Result<(), RecorderError> {
        let file = File::create(&self.config.log_path)?;
        let mut out = BufWriter::new(file);
        let reporting_start_ms =
            self.reporting_start_ms(sampler.uses_input_timeline(), run_start_ms);

        if self.config.csv_format {
            let mut sink = CsvSink::begin(&mut out, reporting_start_ms)?;
            self.run_loop(sampler, &mut sink, run_start_ms)?;
        } else {
            let mut serializer = V2DeflateSerializer::new();
            let mut builder = IntervalLogWriterBuilder::new();
            builder
                .add_comment(&format!("[Logged with hiccup-meter {}]", crate::VERSION))
                .with_start_time(system_time_from_ms(reporting_start_ms))
                .with_base_time(system_time_from_ms(reporting_start_ms))
                .with_max_value_divisor(OUTPUT_VALUE_UNIT_RATIO);
            if self.config.verbose {
                let argv: Vec<String> = std::env::args().collect();
                builder.add_comment(&format!("[Executing: {}]", argv.join(" ")));
            }
            let writer = builder.begin_log_with(&mut out, &mut serializer)?;
            let mut sink = HlogSink {
                writer,
                log_start_ms: reporting_start_ms,
            };
            self.run_loop(sampler, &mut sink, run_start_ms)?;
        }

        out.flush()?;
        Ok(())
    }

    /// The zero point of reported timestamps. Process-uptime-relative by
    /// default; the run start with `-0`; always the input timeline when
    /// replaying a file.
    fn reporting_start_ms(&self, uses_input_timeline: bool, run_start_ms: i64) -> i64 {
        if uses_input_timeline || self.config.start_time_at_zero {
            run_start_ms
        } else {
            self.clock.wall_ms() - clock::process_uptime_ms()
        }
    }

    fn run_loop<S: IntervalSink>(
        &self,
        sampler: &mut SamplingRecorder,
        sink: &mut S,
        run_start_ms: i64,
    ) -> Result<(), RecorderError> {
        let interval_ms = self.config.reporting_interval_ms.max(1);
        let run_end_ms = match self.config.run_time_ms {
            0 => None,
            bound => Some(run_start_ms + bound),
        };

        let mut latest = recorder::build_histogram(
            self.config.lowest_trackable_ns,
            self.config.highest_trackable_ns,
            self.config.significant_digits,
        )?;
        let mut next_deadline_ms = run_start_ms + interval_ms;
        let mut interval_start_ms = run_start_ms;

        loop {
            let target_ms = run_end_ms.map_or(next_deadline_ms, |end| next_deadline_ms.min(end));
            let now_ms = match sampler.advance_to(target_ms) {
                AdvanceOutcome::Terminated => break,
                AdvanceOutcome::ReachedDeadline(now) => now,
            };

            if now_ms >= next_deadline_ms {
                latest.clear();
                let interval = IntervalHistogram {
                    histogram: sampler.swap_interval(latest)?,
                    start_ts_ms: interval_start_ms,
                    end_ts_ms: now_ms,
                };
                // Empty intervals are skipped but their deadlines are
                // consumed; the next emission covers the whole gap.
                next_deadline_ms = advance_past(next_deadline_ms, now_ms, interval_ms);

                if interval.histogram.len() > 0 {
                    if let Err(e) = sink.write_interval(&interval) {
                        if now_ms - run_start_ms < TIME_DELAY_MS_BEFORE_RAISING_LOG_ERRORS {
                            log::warn!("interval write failed inside startup grace window: {}", e);
                        } else {
                            return Err(e);
                        }
                    }
                }
                interval_start_ms = now_ms;
                latest = interval.histogram;
            }

            if let Some(end_ms) = run_end_ms {
                if now_ms >= end_ms {
                    break;
                }
            }
        }

        sampler.terminate();
        sampler.join();
        Ok(())
    }
}

/// Step the deadline forward until it lies beyond `now_ms`.
fn advance_past(mut deadline_ms: i64, now_ms: i64, interval_ms: i64) -> i64 {
    while now_ms >= deadline_ms {
        deadline_ms += interval_ms;
    }
    deadline_ms
}

fn system_time_from_ms(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

/// One emission target per interval histogram.
trait IntervalSink {
    fn write_interval(&mut self, interval: &IntervalHistogram) -> Result<(), RecorderError>;
}

struct HlogSink<'a, 'b> {
    writer: IntervalLogWriter<'a, 'b, BufWriter<File>, V2DeflateSerializer>,
    log_start_ms: i64,
}

impl IntervalSink for HlogSink<'_, '_> {
    fn write_interval(&mut self, interval: &IntervalHistogram) -> Result<(), RecorderError> {
        let offset =
            Duration::from_millis((interval.start_ts_ms - self.log_start_ms).max(0) as u64);
        let length =
            Duration::from_millis((interval.end_ts_ms - interval.start_ts_ms).max(0) as u64);
        self.writer
            .write_histogram(&interval.histogram, offset, length, None)
            .map_err(|e| RecorderError::LogWrite(format!("{:?}", e)))
    }
}

struct CsvSink<W: Write> {
    out: W,
    log_start_ms: i64,
}

impl<W: Write> CsvSink<W> {
    fn begin(mut out: W, log_start_ms: i64) -> Result<Self, RecorderError> {
        writeln!(
            out,
            "\"StartTime_s\",\"EndTime_s\",\"Count\",\"Max_ms\",\"P50_ms\",\"P90_ms\",\"P99_ms\",\"P99.9_ms\",\"P99.99_ms\""
        )?;
        Ok(CsvSink { out, log_start_ms })
    }
}

impl<W: Write> IntervalSink for CsvSink<W> {
    fn write_interval(&mut self, interval: &IntervalHistogram) -> Result<(), RecorderError> {
        let h = &interval.histogram;
        let ms = |v: u64| v as f64 / OUTPUT_VALUE_UNIT_RATIO;
        writeln!(
            self.out,
            "{:.3},{:.3},{},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
            (interval.start_ts_ms - self.log_start_ms) as f64 / 1000.0,
            (interval.end_ts_ms - self.log_start_ms) as f64 / 1000.0,
            h.len(),
            ms(h.max()),
            ms(h.value_at_percentile(50.0)),
            ms(h.value_at_percentile(90.0)),
            ms(h.value_at_percentile(99.0)),
            ms(h.value_at_percentile(99.9)),
            ms(h.value_at_percentile(99.99)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_past_consumes_missed_deadlines() {
        // now at 12_500 with interval 1000: deadlines 1000..=12_000 are all
        // consumed, the next one is 13_000
        assert_eq!(advance_past(1_000, 12_500, 1_000), 13_000);
        // exact hit consumes its deadline
        assert_eq!(advance_past(5_000, 5_000, 1_000), 6_000);
        // not reached: unchanged
        assert_eq!(advance_past(5_000, 4_999, 1_000), 5_000);
    }

    #[test]
    fn test_csv_sink_format() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut sink = CsvSink::begin(&mut buf, 1_000).unwrap();
            let mut h = recorder::build_histogram(1, 3_600_000_000_000, 2).unwrap();
            recorder::record_corrected(&mut h, 5_000_000, 0).unwrap();
            let interval = IntervalHistogram {
                histogram: h,
                start_ts_ms: 2_000,
                end_ts_ms: 3_000,
            };
            sink.write_interval(&interval).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("\"StartTime_s\""));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1.000,2.000,1,"));
    }

    #[test]
    fn test_system_time_from_ms() {
        let t = system_time_from_ms(1_500);
        assert_eq!(t.duration_since(UNIX_EPOCH).unwrap().as_millis(), 1_500);
    }
}
