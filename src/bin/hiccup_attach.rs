//! Measure hiccups alongside a running target process.
//!
//! The original tool of this kind injected an agent into the target's own
//! runtime. There is no dynamic-agent injection API to speak of for a native
//! process, so this attacher supervises instead: it validates the target
//! PID, spawns a meter process with the forwarded measurement flags, and
//! severs the meter's stdin when the target exits so both die together. The
//! measurement is identical — platform hiccups are visible to every process
//! on the host, not just the target.

use clap::Parser;
use hiccup_meter::error::AttachError;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{self, Command, Stdio};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "hiccup-attach",
    version,
    about = "Runs a hiccup meter tied to the lifetime of a target process"
)]
struct AttachArgs {
    /// Target process ID to observe
    #[arg(short = 'p', long = "pid")]
    pid: i32,

    /// Path to the hiccup-meter executable to launch
    #[arg(short = 'j', long = "meter-binary")]
    meter_binary: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log path forwarded to the meter (only when given)
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<String>,

    /// Reporting interval in milliseconds
    #[arg(short = 'i', long = "interval", default_value_t = 5000)]
    interval_ms: i64,

    /// Sampling resolution in milliseconds
    #[arg(short = 'r', long = "resolution", default_value_t = 1.0)]
    resolution_ms: f64,

    /// Startup warm-up delay in milliseconds
    #[arg(short = 'd', long = "start-delay", default_value_t = 0)]
    start_delay_ms: i64,

    /// Total runtime in milliseconds forwarded to the meter (0 = unbounded)
    #[arg(short = 't', long = "run-time", default_value_t = 0)]
    run_time_ms: i64,

    /// Significant value digits (0-5)
    #[arg(short = 's', long = "sig-digits", default_value_t = 2)]
    sig_digits: u8,

    /// Allocate a throwaway object per sample to expose allocator stalls
    #[arg(short = 'a', long)]
    allocate: bool,

    /// Report timestamps starting at zero
    #[arg(short = '0', long = "start-at-zero")]
    start_at_zero: bool,

    /// Launch a control process next to the meter
    #[arg(short = 'c', long)]
    control: bool,

    /// Skip the control process when total system memory is below this many MB
    #[arg(long = "control-heap-filter-mb", default_value_t = 0)]
    control_heap_filter_mb: u64,

    /// Extra arguments appended to the control-process command line
    #[arg(short = 'x', long = "control-extra-args", allow_hyphen_values = true)]
    control_extra_args: Option<String>,

    /// Emit CSV interval lines instead of the hlog format
    #[arg(short = 'o', long)]
    csv: bool,
}

fn main() {
    let args = match AttachArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .init();

    if let Err(e) = supervise(args) {
        eprintln!("hiccup-attach: {}", e);
        process::exit(1);
    }
}

fn supervise(args: AttachArgs) -> Result<(), Box<dyn std::error::Error>> {
    let meter_binary = args
        .meter_binary
        .as_ref()
        .ok_or(hiccup_meter::ConfigError::MissingMeterBinary)?;
    if !meter_binary.is_file() {
        return Err(AttachError::MeterBinaryUnusable {
            path: meter_binary.display().to_string(),
            reason: "not a regular file".to_string(),
        }
        .into());
    }
    if !target_alive(args.pid) {
        return Err(AttachError::NoSuchProcess(args.pid).into());
    }

    let mut meter_args: Vec<String> = vec![
        "--interval".to_string(),
        args.interval_ms.to_string(),
        "--resolution".to_string(),
        args.resolution_ms.to_string(),
        "--start-delay".to_string(),
        args.start_delay_ms.to_string(),
        "--run-time".to_string(),
        args.run_time_ms.to_string(),
        "--sig-digits".to_string(),
        args.sig_digits.to_string(),
        "--terminate-with-stdin".to_string(),
    ];
    if let Some(log_file) = &args.log_file {
        meter_args.push("--log-file".to_string());
        meter_args.push(log_file.clone());
    }
    if args.start_at_zero {
        meter_args.push("--start-at-zero".to_string());
    }
    if args.allocate {
        meter_args.push("--allocate".to_string());
    }
    if args.control {
        meter_args.push("--control".to_string());
    }
    if args.control_heap_filter_mb > 0 {
        meter_args.push("--control-heap-filter-mb".to_string());
        meter_args.push(args.control_heap_filter_mb.to_string());
    }
    if let Some(extra) = &args.control_extra_args {
        meter_args.push("--control-extra-args".to_string());
        meter_args.push(extra.clone());
    }
    if args.csv {
        meter_args.push("--csv".to_string());
    }
    if args.verbose {
        meter_args.push("--verbose".to_string());
    }

    log::info!(
        "observing pid {}, launching {} {}",
        args.pid,
        meter_binary.display(),
        meter_args.join(" ")
    );

    let mut child = Command::new(meter_binary)
        .args(&meter_args)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(AttachError::SpawnFailed)?;
    let mut meter_stdin = child.stdin.take();

    loop {
        if let Some(status) = child.try_wait()? {
            log::info!("meter exited on its own: {}", status);
            return Ok(());
        }
        if !target_alive(args.pid) {
            log::info!("target pid {} exited, severing meter stdin", args.pid);
            drop(meter_stdin.take());
            let status = child.wait()?;
            log::info!("meter exited: {}", status);
            return Ok(());
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Signal-0 liveness probe. EPERM still means the process exists.
fn target_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
