//! Command-line configuration: flag parsing, derived values, validation.
//!
//! Built once at startup and immutable thereafter. Derivations cover log-path
//! placeholder substitution, histogram dynamic range, and the control-process
//! command line.

use crate::error::ConfigError;
use clap::Parser;
use std::env;
use std::fs::File;
use std::path::PathBuf;

/// Environment sentinel set on spawned control children so they never spawn
/// control processes of their own.
pub const AVOID_RECURSION_ENV: &str = "HICCUP_METER_AVOID_RECURSION";

/// Interval-log write failures inside this window after sampling start are
/// logged and swallowed; afterwards they propagate. Some hosting environments
/// install startup-phase security filters that reject file writes briefly.
pub const TIME_DELAY_MS_BEFORE_RAISING_LOG_ERRORS: i64 = 60_000;

/// Default trackable ceiling: 30 days in nanoseconds.
pub const DEFAULT_HIGHEST_TRACKABLE_NS: u64 = 30 * 24 * 3600 * 1_000_000_000;

/// Default trackable floor when sampling live, in nanoseconds.
pub const DEFAULT_LOWEST_TRACKABLE_NS: u64 = 20_000;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hiccup-meter",
    version,
    about = "Measures platform hiccups (execution stalls) and logs HdrHistogram intervals"
)]
pub struct MeterArgs {
    /// Verbose diagnostics
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Log path; occurrences of %pid and %date are substituted
    #[arg(short = 'l', long = "log-file", default_value = "hiccup.%date.%pid.hlog")]
    pub log_file: String,

    /// Emit CSV interval lines instead of the hlog format
    #[arg(short = 'o', long)]
    pub csv: bool,

    /// Reporting interval in milliseconds
    #[arg(short = 'i', long = "interval", default_value_t = 5000)]
    pub interval_ms: i64,

    /// Sampling resolution in milliseconds; may be fractional, 0 = tight loop
    #[arg(short = 'r', long = "resolution", default_value_t = 1.0, allow_negative_numbers = true)]
    pub resolution_ms: f64,

    /// Startup warm-up delay in milliseconds; warm-up samples are discarded
    #[arg(short = 'd', long = "start-delay", default_value_t = 0)]
    pub start_delay_ms: i64,

    /// Total runtime in milliseconds (0 = unbounded)
    #[arg(short = 't', long = "run-time", default_value_t = 0)]
    pub run_time_ms: i64,

    /// Significant value digits (0-5)
    #[arg(short = 's', long = "sig-digits", default_value_t = 2)]
    pub sig_digits: u8,

    /// Report timestamps starting at zero instead of process-birth-relative
    #[arg(short = '0', long = "start-at-zero")]
    pub start_at_zero: bool,

    /// Allocate a throwaway object per sample to expose allocator stalls
    #[arg(short = 'a', long)]
    pub allocate: bool,

    /// Launch a concurrent idle-workload control process
    #[arg(short = 'c', long)]
    pub control: bool,

    /// Skip the control process when total system memory is below this many MB
    #[arg(long = "control-heap-filter-mb", default_value_t = 0)]
    pub control_heap_filter_mb: u64,

    /// Extra arguments appended to the control-process command line
    #[arg(short = 'x', long = "control-extra-args", allow_hyphen_values = true)]
    pub control_extra_args: Option<String>,

    /// Replay a time-stamped latency stream instead of sampling
    #[arg(short = 'f', long = "input-file")]
    pub input_file: Option<PathBuf>,

    /// With --input-file: interpret lines as pause events and zero-fill gaps
    #[arg(short = 'z', long = "fill-zeros", requires = "input_file")]
    pub fill_zeros: bool,

    /// Exit when standard input is severed
    #[arg(long = "terminate-with-stdin")]
    pub terminate_with_stdin: bool,
}

/// Frozen runtime configuration, derived from [`MeterArgs`].
#[derive(Debug, Clone)]
pub struct Config {
    pub verbose: bool,
    pub resolution_ns: u64,
    pub resolution_ms: f64,
    pub reporting_interval_ms: i64,
    pub start_delay_ms: i64,
    pub run_time_ms: i64,
    pub log_path: String,
    pub csv_format: bool,
    pub input_path: Option<PathBuf>,
    pub fill_zeros: bool,
    pub start_time_at_zero: bool,
    pub allocate_objects: bool,
    pub launch_control: bool,
    pub control_heap_filter_mb: u64,
    pub control_extra_args: Vec<String>,
    pub significant_digits: u8,
    pub lowest_trackable_ns: u64,
    pub highest_trackable_ns: u64,
    pub terminate_with_stdin: bool,
}

impl Config {
    pub fn from_args(args: MeterArgs) -> Result<Config, ConfigError> {
        let stamp = chrono::Local::now().format("%y%m%d.%H%M").to_string();
        let avoid_recursion = env::var_os(AVOID_RECURSION_ENV).is_some();
        Config::from_args_at(args, std::process::id(), &stamp, avoid_recursion)
    }

    /// Derivation with injected pid/date/sentinel, for determinism in tests.
    pub fn from_args_at(
        args: MeterArgs,
        pid: u32,
        date_stamp: &str,
        avoid_recursion: bool,
    ) -> Result<Config, ConfigError> {
        if args.resolution_ms < 0.0 {
            return Err(ConfigError::NegativeResolution(args.resolution_ms));
        }
        if args.sig_digits > 5 {
            return Err(ConfigError::SignificantDigitsOutOfRange(args.sig_digits));
        }
        if let Some(path) = &args.input_file {
            File::open(path).map_err(|source| ConfigError::InputFileUnreadable {
                path: path.display().to_string(),
                source,
            })?;
        }

        let lowest_trackable_ns = if args.input_file.is_some() {
            1
        } else {
            DEFAULT_LOWEST_TRACKABLE_NS
        };

        Ok(Config {
            verbose: args.verbose,
            resolution_ns: (args.resolution_ms * 1_000_000.0) as u64,
            resolution_ms: args.resolution_ms,
            reporting_interval_ms: args.interval_ms,
            start_delay_ms: args.start_delay_ms,
            run_time_ms: args.run_time_ms,
            log_path: fill_placeholders(&args.log_file, pid, date_stamp),
            csv_format: args.csv,
            input_path: args.input_file,
            fill_zeros: args.fill_zeros,
            start_time_at_zero: args.start_at_zero,
            allocate_objects: args.allocate,
            launch_control: args.control && !avoid_recursion,
            control_heap_filter_mb: args.control_heap_filter_mb,
            control_extra_args: args
                .control_extra_args
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            significant_digits: args.sig_digits,
            lowest_trackable_ns,
            highest_trackable_ns: DEFAULT_HIGHEST_TRACKABLE_NS,
            terminate_with_stdin: args.terminate_with_stdin,
        })
    }

    /// Log path for the control process: the parent's with a `.c` suffix.
    pub fn control_log_path(&self) -> String {
        format!("{}.c", self.log_path)
    }

    /// Argument list for the control child, derived deterministically from
    /// the parent flags. The child inherits the measurement parameters, logs
    /// next to the parent, and dies when its stdin pipe is severed. It never
    /// receives `--control` itself.
    pub fn control_args(&self) -> Vec<String> {
        let mut argv = vec![
            "--log-file".to_string(),
            self.control_log_path(),
            "--interval".to_string(),
            self.reporting_interval_ms.to_string(),
            "--start-delay".to_string(),
            self.start_delay_ms.to_string(),
            "--resolution".to_string(),
            self.resolution_ms.to_string(),
            "--sig-digits".to_string(),
            self.significant_digits.to_string(),
        ];
        if self.start_time_at_zero {
            argv.push("--start-at-zero".to_string());
        }
        if self.csv_format {
            argv.push("--csv".to_string());
        }
        if self.verbose {
            argv.push("--verbose".to_string());
        }
        argv.push("--terminate-with-stdin".to_string());
        argv.extend(self.control_extra_args.iter().cloned());
        argv
    }
}

/// Substitute `%pid` and `%date` in a log-path template. Applying it to a
/// string without placeholders is the identity.
pub fn fill_placeholders(template: &str, pid: u32, date_stamp: &str) -> String {
    template
        .replace("%pid", &pid.to_string())
        .replace("%date", date_stamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> MeterArgs {
        MeterArgs::try_parse_from(argv).expect("args should parse")
    }

    #[test]
    fn test_defaults() {
        let cfg =
            Config::from_args_at(parse(&["hiccup-meter"]), 17, "240601.1405", false).unwrap();
        assert_eq!(cfg.resolution_ns, 1_000_000);
        assert_eq!(cfg.reporting_interval_ms, 5000);
        assert_eq!(cfg.start_delay_ms, 0);
        assert_eq!(cfg.run_time_ms, 0);
        assert_eq!(cfg.significant_digits, 2);
        assert_eq!(cfg.lowest_trackable_ns, DEFAULT_LOWEST_TRACKABLE_NS);
        assert_eq!(cfg.highest_trackable_ns, DEFAULT_HIGHEST_TRACKABLE_NS);
        assert!(!cfg.terminate_with_stdin);
    }

    #[test]
    fn test_log_name_substitution() {
        // pid 17 at 2024-06-01 14:05
        let cfg =
            Config::from_args_at(parse(&["hiccup-meter"]), 17, "240601.1405", false).unwrap();
        assert_eq!(cfg.log_path, "hiccup.240601.1405.17.hlog");
    }

    #[test]
    fn test_placeholder_substitution_is_idempotent() {
        let filled = fill_placeholders("hiccup.240601.1405.17.hlog", 99, "999999.9999");
        assert_eq!(filled, "hiccup.240601.1405.17.hlog");
    }

    #[test]
    fn test_fractional_resolution() {
        let args = parse(&["hiccup-meter", "-r", "0.5"]);
        let cfg = Config::from_args_at(args, 1, "x", false).unwrap();
        assert_eq!(cfg.resolution_ns, 500_000);
    }

    #[test]
    fn test_negative_resolution_rejected() {
        let args = parse(&["hiccup-meter", "-r", "-1"]);
        assert!(matches!(
            Config::from_args_at(args, 1, "x", false),
            Err(ConfigError::NegativeResolution(_))
        ));
    }

    #[test]
    fn test_fill_zeros_requires_input_file() {
        assert!(MeterArgs::try_parse_from(["hiccup-meter", "-z"]).is_err());
    }

    #[test]
    fn test_unreadable_input_file_rejected() {
        let args = parse(&["hiccup-meter", "-f", "/definitely/not/here.txt"]);
        assert!(matches!(
            Config::from_args_at(args, 1, "x", false),
            Err(ConfigError::InputFileUnreadable { .. })
        ));
    }

    #[test]
    fn test_file_mode_lowers_trackable_floor() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "0 0\n").unwrap();
        let args = parse(&["hiccup-meter", "-f", input.to_str().unwrap()]);
        let cfg = Config::from_args_at(args, 1, "x", false).unwrap();
        assert_eq!(cfg.lowest_trackable_ns, 1);
    }

    #[test]
    fn test_recursion_sentinel_disables_control() {
        let args = parse(&["hiccup-meter", "-c"]);
        let cfg = Config::from_args_at(args, 1, "x", true).unwrap();
        assert!(!cfg.launch_control);
    }

    #[test]
    fn test_control_args_derivation() {
        let args = parse(&[
            "hiccup-meter",
            "-l",
            "P.hlog",
            "-i",
            "1000",
            "-r",
            "2",
            "-c",
            "-0",
            "-x",
            "--allocate",
        ]);
        let cfg = Config::from_args_at(args, 1, "x", false).unwrap();
        assert!(cfg.launch_control);
        assert_eq!(cfg.control_log_path(), "P.hlog.c");
        let argv = cfg.control_args();
        assert_eq!(
            argv,
            vec![
                "--log-file",
                "P.hlog.c",
                "--interval",
                "1000",
                "--start-delay",
                "0",
                "--resolution",
                "2",
                "--sig-digits",
                "2",
                "--start-at-zero",
                "--terminate-with-stdin",
                "--allocate",
            ]
        );
    }
}
