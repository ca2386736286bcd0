//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 forced cohort.
//!
//! Flags are registered through `signal-hook` and polled by the daemon loop
//! between ticks; nothing runs inside the signal handler itself.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::Result;

/// Request flags shared between the OS signal hooks and the daemon loop.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    schedule_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are reported on stderr.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// Handler with no OS hooks; only the `request_*` methods set flags.
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            schedule_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check and clear the reload request.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check and clear the forced-cohort request.
    pub fn should_schedule_now(&self) -> bool {
        self.schedule_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_schedule_now(&self) {
        self.schedule_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[CHX-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[CHX-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.schedule_flag)) {
                eprintln!("[CHX-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// A named shutdown step.
pub type ShutdownTask<'a> = (&'a str, &'a dyn Fn() -> Result<()>);

/// Runs shutdown steps in order until they finish or the deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownCoordinator {
    pub timeout: Duration,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns `true` when every step succeeded within the timeout. A failed
    /// step is reported and the remaining steps still run.
    pub fn execute(&self, tasks: &[ShutdownTask<'_>]) -> bool {
        let start = Instant::now();
        let mut all_ok = true;

        for (name, task) in tasks {
            if start.elapsed() > self.timeout {
                eprintln!("[CHX-SHUTDOWN] timeout reached, abandoning {name} and later steps");
                return false;
            }
            match task() {
                Ok(()) => eprintln!("[CHX-SHUTDOWN] {name}: ok"),
                Err(e) => {
                    eprintln!("[CHX-SHUTDOWN] {name}: {e}");
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
