//! Line-delimited JSON activity log.
//!
//! Every entry is serialized to a complete line in memory and handed to the
//! file in a single `write_all`, so a tailing reader never sees half a record.
//!
//! When a destination stops accepting writes the writer steps down:
//! primary path, then the fallback path, then stderr with a `[CHX-JSONL]`
//! prefix, then silent discard. Logging never takes the engine down.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{ChaosError, Result};
use crate::experiment::context::DiagnosticContext;

const WRITE_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EngineStart,
    EngineStop,
    CohortScheduled,
    ExperimentTransition,
    SelfHealingAttempt,
    ExperimentCompleted,
    ConfigReload,
    Error,
}

/// One line of the activity log. Only `ts`, `event` and `severity` are
/// always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Bound experiment method, when one has been chosen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,
    /// Self-healing attempt number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            platform: None,
            experiment_id: None,
            container: None,
            action: None,
            from_state: None,
            to_state: None,
            attempt: None,
            count: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Copy the correlation tags of one experiment onto this entry.
    #[must_use]
    pub fn with_context(mut self, context: &DiagnosticContext) -> Self {
        self.platform = Some(context.platform_type.clone());
        self.experiment_id = Some(context.experiment_id.clone());
        self.container = Some(context.container_id.clone());
        self.action = context.action_name.clone();
        self
    }
}

/// Where lines currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl Sink {
    const fn label(self) -> &'static str {
        match self {
            Self::Primary => "normal",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the active file would grow past this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/chaosd/activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/chaosd.jsonl")),
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only writer with size rotation and the fallback chain above.
pub struct JsonlWriter {
    config: JsonlConfig,
    file: Option<BufWriter<File>>,
    sink: Sink,
    active_bytes: u64,
    last_sync: Instant,
}

impl JsonlWriter {
    /// Open the primary path, stepping down the chain if it is unusable.
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            file: None,
            sink: Sink::Discard,
            active_bytes: 0,
            last_sync: Instant::now(),
        };
        let primary = writer.config.path.clone();
        if !writer.attach(&primary, Sink::Primary) {
            writer.step_down_from(Sink::Primary);
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[CHX-JSONL] cannot serialize entry: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    /// "normal", "fallback", "stderr" or "discard".
    #[must_use]
    pub fn state(&self) -> &'static str {
        self.sink.label()
    }

    /// Return to the primary path after a degradation, if it works again.
    pub fn try_recover(&mut self) {
        if self.sink == Sink::Primary {
            return;
        }
        let primary = self.config.path.clone();
        if self.attach(&primary, Sink::Primary) {
            let _ = writeln!(
                io::stderr(),
                "[CHX-JSONL] recovered to primary path: {}",
                primary.display()
            );
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.file.is_some() && self.active_bytes + len > self.config.max_size_bytes {
            self.rotate();
        }

        loop {
            match self.sink {
                Sink::Primary | Sink::Fallback => {
                    let written = self
                        .file
                        .as_mut()
                        .is_some_and(|file| file.write_all(line.as_bytes()).is_ok());
                    if written {
                        self.active_bytes += len;
                        if self.last_sync.elapsed()
                            >= Duration::from_secs(self.config.fsync_interval_secs)
                        {
                            self.fsync();
                        }
                        return;
                    }
                    self.step_down_from(self.sink);
                }
                Sink::Stderr => {
                    let _ = write!(io::stderr(), "[CHX-JSONL] {line}");
                    return;
                }
                Sink::Discard => return,
            }
        }
    }

    /// Point the writer at `path`. Returns false if it cannot be opened.
    fn attach(&mut self, path: &Path, sink: Sink) -> bool {
        match open_append(path) {
            Ok((file, size)) => {
                self.file = Some(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file));
                self.sink = sink;
                self.active_bytes = size;
                true
            }
            Err(_) => false,
        }
    }

    fn step_down_from(&mut self, failed: Sink) {
        self.file = None;
        self.active_bytes = 0;
        match failed {
            Sink::Primary => {
                let fallback = self.config.fallback_path.clone();
                match fallback {
                    Some(path) if self.attach(&path, Sink::Fallback) => {
                        let _ = writeln!(
                            io::stderr(),
                            "[CHX-JSONL] primary log unusable, writing to {}",
                            path.display()
                        );
                    }
                    _ => {
                        self.sink = Sink::Stderr;
                        let _ = writeln!(
                            io::stderr(),
                            "[CHX-JSONL] no usable log file, writing to stderr"
                        );
                    }
                }
            }
            Sink::Fallback => {
                self.sink = Sink::Stderr;
                let _ = writeln!(io::stderr(), "[CHX-JSONL] fallback log failed, using stderr");
            }
            Sink::Stderr | Sink::Discard => self.sink = Sink::Discard,
        }
    }

    fn rotate(&mut self) {
        let base = match self.sink {
            Sink::Primary => self.config.path.clone(),
            Sink::Fallback => match self.config.fallback_path.clone() {
                Some(path) => path,
                None => return,
            },
            Sink::Stderr | Sink::Discard => return,
        };
        self.flush();
        self.file = None;

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for index in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, index), rotated_name(&base, index + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        if !self.attach(&base, self.sink) {
            self.step_down_from(self.sink);
        }
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ChaosError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ChaosError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `activity.jsonl` -> `activity.jsonl.2`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
