//! Orchestration: wires the clock, sampler, reporter, and auxiliary threads
//! per the frozen configuration; sequences warm-up, run, and shutdown.

use crate::clock::{self, MonotonicClock};
use crate::config::Config;
use crate::control::{self, ControlProcessSupervisor};
use crate::reporter::IntervalReporter;
use crate::sampler::{FileSampler, LiveSampler, SamplingRecorder};
use std::time::Duration;

pub struct HiccupMeter {
    config: Config,
}

impl HiccupMeter {
    pub fn new(config: Config) -> Self {
        HiccupMeter { config }
    }

    /// Run the full measurement lifecycle. Returns when the configured
    /// runtime elapses or the sample source terminates.
    pub fn run(&self) -> crate::Result<()> {
        let clock = MonotonicClock::new()?;

        if self.config.terminate_with_stdin {
            control::spawn_stdin_sever_monitor();
        }

        let mut supervisor = None;
        if self.config.launch_control {
            match ControlProcessSupervisor::launch(&self.config) {
                Ok(s) => supervisor = s,
                // Advisory: a failed control launch never stops measurement.
                Err(e) => log::warn!("control process launch failed: {}", e),
            }
        }

        let (mut sampler, run_start_ms) = self.start_sampler(clock)?;
        let reporter = IntervalReporter::new(&self.config, clock);
        let result = reporter.run(&mut sampler, run_start_ms);

        if let Some(mut supervisor) = supervisor {
            supervisor.shutdown();
        }
        result?;
        Ok(())
    }

    /// Build the configured sample source and anchor the run timeline:
    /// wall-clock time for live sampling, the first surviving input
    /// timestamp for file replay.
    fn start_sampler(&self, clock: MonotonicClock) -> crate::Result<(SamplingRecorder, i64)> {
        if let Some(path) = &self.config.input_path {
            let mut sampler = FileSampler::open(&self.config)?;
            if self.config.start_delay_ms > 0 {
                sampler.skip_until(self.config.start_delay_ms);
            }
            let run_start_ms = sampler.start_time_ms().unwrap_or(0);
            log::info!(
                "replaying {} from input timestamp {} ms",
                path.display(),
                run_start_ms
            );
            Ok((SamplingRecorder::File(sampler), run_start_ms))
        } else {
            if self.config.start_delay_ms > 0 {
                self.warm_up(clock)?;
            }
            let sampler = LiveSampler::start(&self.config, clock)?;
            let run_start_ms = clock.wall_ms();
            log::info!(
                "sampling started, resolution {} ns, process uptime {} ms",
                self.config.resolution_ns,
                clock::process_uptime_ms()
            );
            Ok((SamplingRecorder::Live(sampler), run_start_ms))
        }
    }

    /// Sample normally until the process has been alive for the start delay,
    /// then discard the sampler wholesale: thread, histogram, and rolling
    /// minimum all start fresh for the recorded epoch.
    fn warm_up(&self, clock: MonotonicClock) -> crate::Result<()> {
        log::info!(
            "warming up until process uptime reaches {} ms",
            self.config.start_delay_ms
        );
        let mut warmup = LiveSampler::start(&self.config, clock)?;
        // Fallback when /proc offers no uptime: time the delay from here.
        let wall_deadline_ms = clock.wall_ms() + self.config.start_delay_ms;
        loop {
            let uptime_ms = clock::process_uptime_ms();
            let reached = if uptime_ms > 0 {
                uptime_ms >= self.config.start_delay_ms
            } else {
                clock.wall_ms() >= wall_deadline_ms
            };
            if reached {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        warmup.terminate();
        warmup.join();
        Ok(())
    }
}
