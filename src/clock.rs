//! Monotonic time source for the sampling loop.
//!
//! Wraps CLOCK_MONOTONIC for timestamps and clock_nanosleep for the
//! finest-grained sleep the platform offers. Wall-clock time is exposed
//! separately and is used for log annotation only.

use crate::error::ClockError;
use std::fs;

/// Nanosecond-granular monotonic clock. Construction probes the platform for
/// CLOCK_MONOTONIC; platforms without one are unsupported.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock;

impl MonotonicClock {
    pub fn new() -> Result<Self, ClockError> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(ClockError::MonotonicUnavailable(errno));
        }
        Ok(MonotonicClock)
    }

    /// Current monotonic timestamp in nanoseconds. Unaffected by wall-clock
    /// adjustments.
    pub fn now_ns(&self) -> u64 {
        let ts: libc::timespec = unsafe {
            let mut ts = std::mem::zeroed::<libc::timespec>();
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
            ts
        };
        timespec_to_ns(&ts)
    }

    /// Current wall-clock time in milliseconds since the Unix epoch. For log
    /// annotation only; never used for interval arithmetic.
    pub fn wall_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Sleep for the given number of nanoseconds using clock_nanosleep on the
    /// monotonic clock. A sleep cut short by a signal simply yields a smaller
    /// inter-sample delta, so EINTR is not retried.
    pub fn sleep_ns(&self, ns: u64) {
        let ts = ns_to_timespec(ns);
        unsafe {
            libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &ts, std::ptr::null_mut());
        }
    }
}

/// Helper: convert a timespec to nanoseconds.
fn timespec_to_ns(ts: &libc::timespec) -> u64 {
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

/// Helper: convert nanoseconds to a timespec.
fn ns_to_timespec(ns: u64) -> libc::timespec {
    libc::timespec {
        tv_sec: (ns / 1_000_000_000) as libc::time_t,
        tv_nsec: (ns % 1_000_000_000) as libc::c_long,
    }
}

/// Milliseconds this process has been alive, derived from /proc/self/stat
/// (field 22, start time in clock ticks) and /proc/uptime. Returns 0 when
/// either file is unreadable or malformed.
pub fn process_uptime_ms() -> i64 {
    read_uptime_ms("/proc/self/stat", "/proc/uptime").unwrap_or(0)
}

fn read_uptime_ms(stat_path: &str, uptime_path: &str) -> Option<i64> {
    let stat = fs::read_to_string(stat_path).ok()?;
    // The comm field may contain spaces; fields are positional only after the
    // closing parenthesis.
    let after_comm = &stat[stat.rfind(')')? + 1..];
    // starttime is field 22 overall, i.e. the 20th after pid and comm.
    let start_ticks: u64 = after_comm.split_whitespace().nth(19)?.parse().ok()?;

    let uptime = fs::read_to_string(uptime_path).ok()?;
    let system_uptime_secs: f64 = uptime.split_whitespace().next()?.parse().ok()?;

    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_sec <= 0 {
        return None;
    }
    let start_secs = start_ticks as f64 / ticks_per_sec as f64;
    let uptime_ms = (system_uptime_secs - start_secs) * 1000.0;
    if uptime_ms < 0.0 {
        return None;
    }
    Some(uptime_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_available() {
        assert!(MonotonicClock::new().is_ok());
    }

    #[test]
    fn test_now_ns_non_decreasing() {
        let clock = MonotonicClock::new().unwrap();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_sleep_ns_sleeps_at_least_requested() {
        let clock = MonotonicClock::new().unwrap();
        let before = clock.now_ns();
        clock.sleep_ns(2_000_000); // 2 ms
        let after = clock.now_ns();
        assert!(after - before >= 2_000_000);
    }

    #[test]
    fn test_timespec_round_trip() {
        let ts = ns_to_timespec(1_500_000_123);
        assert_eq!(ts.tv_sec, 1);
        assert_eq!(ts.tv_nsec, 500_000_123);
        assert_eq!(timespec_to_ns(&ts), 1_500_000_123);
    }

    #[test]
    fn test_wall_ms_is_past_2020() {
        let clock = MonotonicClock::new().unwrap();
        // 2020-01-01 in epoch millis
        assert!(clock.wall_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_process_uptime_non_negative() {
        assert!(process_uptime_ms() >= 0);
    }
}
