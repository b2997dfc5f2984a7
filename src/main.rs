//! Standalone entry point for the hiccup meter.

use clap::Parser;
use hiccup_meter::{Config, ConfigError, HiccupMeter, MeterArgs};
use std::process;

fn main() {
    let args = match MeterArgs::try_parse() {
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

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e @ ConfigError::InputFileUnreadable { .. }) => {
            eprintln!("hiccup-meter: {}", e);
            process::exit(-1);
        }
        Err(e) => {
            eprintln!("hiccup-meter: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = HiccupMeter::new(config).run() {
        eprintln!("hiccup-meter: {}", e);
        process::exit(1);
    }
}
