//! Control-process supervision and stdin-severance termination.
//!
//! The control process is a peer instance of this binary measuring an idle
//! workload, so a concurrent baseline exists for the same host and time
//! window. Its lifetime is tied to the parent through a stdin pipe: closing
//! the pipe is the termination signal. The control process is advisory; its
//! failures never stop the parent's measurement.

use crate::config::{Config, AVOID_RECURSION_ENV};
use crate::error::ControlProcessError;
use std::fs;
use std::io::Read;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

pub struct ControlProcessSupervisor {
    stdin: Option<ChildStdin>,
    watcher: Option<JoinHandle<()>>,
}

impl ControlProcessSupervisor {
    /// Launch the control child unless the memory filter rules it out.
    /// Returns Ok(None) when filtered.
    pub fn launch(
        config: &Config,
    ) -> Result<Option<ControlProcessSupervisor>, ControlProcessError> {
        if filtered_by_memory(config.control_heap_filter_mb, total_system_memory_mb()) {
            log::info!(
                "control process disabled: system memory below {} MB filter",
                config.control_heap_filter_mb
            );
            return Ok(None);
        }

        let exe = std::env::current_exe()
            .map_err(|e| ControlProcessError::ExecutableUnavailable(e.to_string()))?;
        let args = config.control_args();
        if config.verbose {
            log::info!(
                "executing control process: {} {}",
                exe.display(),
                args.join(" ")
            );
        }

        let mut child = Command::new(&exe)
            .args(&args)
            .env(AVOID_RECURSION_ENV, "true")
            .stdin(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let watcher = thread::Builder::new()
            .name("hiccup-control-watcher".to_string())
            .spawn(move || watch_child(child))?;

        Ok(Some(ControlProcessSupervisor {
            stdin,
            watcher: Some(watcher),
        }))
    }

    /// Sever the child's stdin pipe and reap it. The child exits through its
    /// own stdin monitor.
    pub fn shutdown(&mut self) {
        drop(self.stdin.take());
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

impl Drop for ControlProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch_child(mut child: Child) {
    match child.wait() {
        Ok(status) => log::info!("control process exited: {}", status),
        Err(e) => log::warn!("control process wait failed: {}", e),
    }
}

/// True when a positive filter is configured and the host's total memory
/// falls below it. An unreadable /proc/meminfo (total 0) never filters.
fn filtered_by_memory(filter_mb: u64, total_mb: u64) -> bool {
    filter_mb > 0 && total_mb > 0 && total_mb < filter_mb
}

/// Total system memory in megabytes from /proc/meminfo, or 0 when the file
/// is unreadable or malformed.
fn total_system_memory_mb() -> u64 {
    match fs::read_to_string("/proc/meminfo") {
        Ok(content) => {
            for line in content.lines() {
                if line.starts_with("MemTotal") {
                    if let Some(value) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = value.parse::<u64>() {
                            return kb / 1024;
                        }
                    }
                }
            }
            0
        }
        Err(_) => 0,
    }
}

/// Spawn the daemon thread that exits the process with a nonzero status when
/// standard input is severed. Used by control children so they die with
/// their launching parent, and by the main process on request.
pub fn spawn_stdin_sever_monitor() {
    let result = thread::Builder::new()
        .name("stdin-sever".to_string())
        .spawn(|| {
            let mut stdin = std::io::stdin();
            let mut byte = [0u8; 1];
            loop {
                match stdin.read(&mut byte) {
                    Ok(0) | Err(_) => std::process::exit(1),
                    Ok(_) => {}
                }
            }
        });
    if let Err(e) = result {
        log::warn!("failed to start stdin monitor: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_filter_decision() {
        assert!(!filtered_by_memory(0, 4096)); // no filter configured
        assert!(!filtered_by_memory(1024, 4096)); // plenty of memory
        assert!(filtered_by_memory(8192, 4096)); // below threshold
        assert!(!filtered_by_memory(8192, 0)); // meminfo unreadable
    }

    #[test]
    fn test_total_memory_readable_on_linux() {
        // Never panics; on Linux /proc/meminfo should parse to something > 0
        let mb = total_system_memory_mb();
        assert!(mb == 0 || mb > 16);
    }
}
