//! `sh -c` execution with cancellation and a wall-clock limit.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::errors::{ChaosError, Result};
use crate::experiment::startup::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Shell used for every inventory command.
pub const SHELL: &str = "sh";

/// Run `command` through `sh -c` and return its exit status.
///
/// The child is killed if `cancel` fires or `timeout` elapses. Termination
/// by signal is an error because no exit status exists.
pub fn run_shell(
    command: &str,
    cancel: Option<&CancellationToken>,
    timeout: Duration,
) -> Result<i32> {
    let mut child = Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ChaosError::Io {
            path: PathBuf::from(SHELL),
            source,
        })?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return status.code().ok_or_else(|| {
                    ChaosError::command(command, "terminated by signal")
                });
            }
            Ok(None) => {}
            Err(source) => {
                return Err(ChaosError::Io {
                    path: PathBuf::from(SHELL),
                    source,
                });
            }
        }

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ChaosError::StartupInterrupted {
                details: format!("`{command}` cancelled"),
            });
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ChaosError::command(
                command,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Like [`run_shell`] but any non-zero exit is an error.
pub fn run_shell_checked(
    command: &str,
    cancel: Option<&CancellationToken>,
    timeout: Duration,
) -> Result<()> {
    match run_shell(command, cancel, timeout)? {
        0 => Ok(()),
        code => Err(ChaosError::command(command, format!("exit status {code}"))),
    }
}
