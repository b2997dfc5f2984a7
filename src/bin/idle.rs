//! A workload that does nothing, on purpose.
//!
//! Idles for a configurable amount of time and then exits; also exits when
//! its stdin pipe is severed. Useful as the observed process when exercising
//! the control-process machinery, and in tests of the stdin-severance path.

use clap::Parser;
use hiccup_meter::control::spawn_stdin_sever_monitor;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "idle", version, about = "Idles, then exits")]
struct IdleArgs {
    /// How long to idle in milliseconds (0 = until stdin is severed)
    #[arg(short = 't', long = "run-time", default_value_t = 10_000)]
    run_time_ms: u64,

    /// Verbose diagnostics
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Do not monitor stdin for severance
    #[arg(short = 'n', long = "no-stdin-monitor")]
    no_stdin_monitor: bool,
}

fn main() {
    let args = IdleArgs::parse();

    if !args.no_stdin_monitor {
        spawn_stdin_sever_monitor();
    }
    if args.verbose {
        eprintln!("idling for {} ms...", args.run_time_ms);
    }

    let start = Instant::now();
    while args.run_time_ms == 0 || start.elapsed() < Duration::from_millis(args.run_time_ms) {
        std::thread::sleep(Duration::from_millis(100));
    }

    if args.verbose {
        eprintln!("idle done");
    }
}
