//! Activity logger thread.
//!
//! One thread owns the `JsonlWriter`. Everything else holds a cloneable
//! `ActivityLoggerHandle` and submits events through a bounded crossbeam
//! channel with `try_send()`, so a slow disk can never stall a status tick.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::core::errors::{ChaosError, Result};
use crate::experiment::context::DiagnosticContext;
use crate::experiment::state::ExperimentState;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;
/// Idle interval after which the writer syncs and retries a degraded path.
const IDLE_MAINTENANCE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    EngineStarted {
        version: String,
        config_hash: String,
    },
    EngineStopped {
        reason: String,
        uptime_secs: u64,
    },
    CohortScheduled {
        platform: String,
        experiments: usize,
        forced: bool,
    },
    Transition {
        context: DiagnosticContext,
        from: ExperimentState,
        to: ExperimentState,
        reason: String,
    },
    SelfHealingAttempt {
        context: DiagnosticContext,
        attempt: u32,
        error: Option<String>,
    },
    ExperimentCompleted {
        context: DiagnosticContext,
        state: ExperimentState,
        self_healing_attempts: u32,
    },
    ConfigReloaded {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Stops the logger thread after flushing.
    Shutdown,
}

/// Cheap, cloneable sender side of the activity log.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Non-blocking send. A full channel drops the event and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// Handle with no logger thread behind it; every event is discarded.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            jsonl: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Start the logger thread.
pub fn spawn_logger(
    config: LoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("chaos-logger".to_string())
        .spawn(move || run_logger(&rx, JsonlWriter::open(config.jsonl), &dropped))
        .map_err(|e| ChaosError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn run_logger(rx: &Receiver<ActivityEvent>, mut jsonl: JsonlWriter, dropped: &AtomicU64) {
    loop {
        let event = match rx.recv_timeout(IDLE_MAINTENANCE) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                jsonl.fsync();
                jsonl.try_recover();
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.count = usize::try_from(lost).ok();
            warn.details = Some(format!("{lost} activity events dropped under back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        if let Some(entry) = to_log_entry(event) {
            jsonl.write_entry(&entry);
        }
    }
    jsonl.flush();
    jsonl.fsync();
}

fn to_log_entry(event: ActivityEvent) -> Option<LogEntry> {
    let entry = match event {
        ActivityEvent::EngineStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::EngineStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::EngineStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::EngineStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e
        }
        ActivityEvent::CohortScheduled {
            platform,
            experiments,
            forced,
        } => {
            let mut e = LogEntry::new(EventType::CohortScheduled, Severity::Info);
            e.platform = Some(platform);
            e.count = Some(experiments);
            e.details = forced.then(|| "forced".to_string());
            e
        }
        ActivityEvent::Transition {
            context,
            from,
            to,
            reason,
        } => {
            let severity = if to == ExperimentState::Failed {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e =
                LogEntry::new(EventType::ExperimentTransition, severity).with_context(&context);
            e.from_state = Some(from.to_string());
            e.to_state = Some(to.to_string());
            e.details = Some(reason);
            e
        }
        ActivityEvent::SelfHealingAttempt {
            context,
            attempt,
            error,
        } => {
            let severity = if error.is_some() {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e =
                LogEntry::new(EventType::SelfHealingAttempt, severity).with_context(&context);
            e.attempt = Some(attempt);
            e.ok = Some(error.is_none());
            e.error_message = error;
            e
        }
        ActivityEvent::ExperimentCompleted {
            context,
            state,
            self_healing_attempts,
        } => {
            let ok = state == ExperimentState::Finished;
            let severity = if ok { Severity::Info } else { Severity::Warning };
            let mut e =
                LogEntry::new(EventType::ExperimentCompleted, severity).with_context(&context);
            e.to_state = Some(state.to_string());
            e.attempt = Some(self_healing_attempts);
            e.ok = Some(ok);
            e
        }
        ActivityEvent::ConfigReloaded { details } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(details);
            e.ok = Some(true);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => return None,
    };
    Some(entry)
}
