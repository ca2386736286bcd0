//! Operator notifications fanned out to journal, file, and webhook channels.
//!
//! Every channel is fire-and-forget: a failing channel is skipped and the
//! experiment that raised the event carries on.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::experiment::context::DiagnosticContext;
use crate::experiment::state::ExperimentState;

// ──────────────────── levels ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Good,
    Warn,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ──────────────────── events ────────────────────

/// Notification about one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosNotification {
    pub title: String,
    pub message: String,
    pub level: NotificationLevel,
    pub context: DiagnosticContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ExperimentState>,
}

impl ChaosNotification {
    #[must_use]
    pub fn new(
        context: &DiagnosticContext,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level,
            context: context.clone(),
            state: None,
        }
    }

    #[must_use]
    pub fn in_state(mut self, state: ExperimentState) -> Self {
        self.state = Some(state);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    EngineStarted {
        version: String,
        platforms: usize,
    },
    EngineStopped {
        reason: String,
        uptime_secs: u64,
    },
    CohortScheduled {
        platform: String,
        experiments: usize,
    },
    Experiment(ChaosNotification),
    AdminStateChanged {
        from: String,
        to: String,
    },
}

impl NotificationEvent {
    #[must_use]
    pub fn level(&self) -> NotificationLevel {
        match self {
            Self::EngineStarted { .. } | Self::CohortScheduled { .. } => NotificationLevel::Good,
            Self::EngineStopped { .. } | Self::AdminStateChanged { .. } => NotificationLevel::Warn,
            Self::Experiment(notification) => notification.level,
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::EngineStarted { version, platforms } => {
                format!("chaosd v{version} started with {platforms} platforms")
            }
            Self::EngineStopped {
                reason,
                uptime_secs,
            } => {
                let hours = uptime_secs / 3600;
                let minutes = (uptime_secs % 3600) / 60;
                format!("chaosd stopped ({reason}) after {hours}h {minutes}m")
            }
            Self::CohortScheduled {
                platform,
                experiments,
            } => format!("Scheduled {experiments} experiments on {platform}"),
            Self::Experiment(n) => format!(
                "{}: {} [{} {} on {}]",
                n.title,
                n.message,
                n.context.platform_type,
                n.context.action_label(),
                n.context.container_id
            ),
            Self::AdminStateChanged { from, to } => format!("Admin state {from} -> {to}"),
        }
    }
}

/// Destination for operator notifications. Implementations must not block
/// for long and must never fail the caller.
pub trait NotificationSink: Send + Sync {
    fn send(&self, event: NotificationEvent);
}

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub channels: Vec<String>,
    pub webhook: WebhookConfig,
    pub file: FileConfig,
    pub journal: JournalConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["journal".to_string(), "file".to_string()],
            webhook: WebhookConfig::default(),
            file: FileConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

/// HTTP POST via curl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub min_level: NotificationLevel,
    /// Body template; `${TITLE}`, `${SUMMARY}`, `${LEVEL}`, `${EXPERIMENT}`,
    /// `${CONTAINER}` and `${PLATFORM}` are substituted JSON-escaped.
    pub template: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            min_level: NotificationLevel::Warn,
            template: r#"{"text": "chaosd: ${SUMMARY}"}"#.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("chaosd")
                .join("notifications.jsonl"),
        }
    }
}

/// Stderr lines picked up by the service journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Good,
        }
    }
}

// ──────────────────── channels ────────────────────

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: &'a NotificationEvent,
}

trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, event: &NotificationEvent);
}

struct FileChannel {
    path: PathBuf,
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, event: &NotificationEvent) {
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event,
        };
        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o600);
        }
        if let Ok(mut file) = opts.open(&self.path) {
            let _ = writeln!(file, "{json}");
        }
    }
}

struct JournalChannel {
    min_level: NotificationLevel,
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn send(&self, event: &NotificationEvent) {
        let level = event.level();
        if level < self.min_level {
            return;
        }
        let priority = match level {
            NotificationLevel::Error => "ERR",
            NotificationLevel::Warn => "WARNING",
            NotificationLevel::Good => "INFO",
        };
        eprintln!("[CHX-NOTIFY] [{priority}] {}", event.summary());
    }
}

struct WebhookChannel {
    url: String,
    min_level: NotificationLevel,
    template: String,
}

impl WebhookChannel {
    fn render_body(&self, event: &NotificationEvent) -> String {
        let (title, experiment, container, platform) = match event {
            NotificationEvent::Experiment(n) => (
                n.title.clone(),
                n.context.experiment_id.clone(),
                n.context.container_id.clone(),
                n.context.platform_type.clone(),
            ),
            NotificationEvent::CohortScheduled { platform, .. } => (
                "Cohort scheduled".to_string(),
                "N/A".to_string(),
                "N/A".to_string(),
                platform.clone(),
            ),
            _ => (
                "chaosd".to_string(),
                "N/A".to_string(),
                "N/A".to_string(),
                "N/A".to_string(),
            ),
        };
        let esc = |s: &str| {
            s.replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
        };
        self.template
            .replace("${TITLE}", &esc(&title))
            .replace("${SUMMARY}", &esc(&event.summary()))
            .replace("${LEVEL}", &esc(&event.level().to_string()))
            .replace("${EXPERIMENT}", &esc(&experiment))
            .replace("${CONTAINER}", &esc(&container))
            .replace("${PLATFORM}", &esc(&platform))
    }
}

impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level || self.url.is_empty() {
            return;
        }
        let body = self.render_body(event);
        // Reaped by the OS; we never wait on curl.
        let _ = Command::new("curl")
            .arg("--silent")
            .arg("--max-time")
            .arg("5")
            .arg("--header")
            .arg("Content-Type: application/json")
            .arg("--data")
            .arg(&body)
            .arg(&self.url)
            .spawn();
    }
}

// ──────────────────── manager ────────────────────

/// Dispatches events to every configured channel.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    enabled: bool,
    sent: AtomicU64,
}

impl NotificationManager {
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for name in &config.channels {
            match name.as_str() {
                "file" => channels.push(Box::new(FileChannel {
                    path: config.file.path.clone(),
                })),
                "journal" => channels.push(Box::new(JournalChannel {
                    min_level: config.journal.min_level,
                })),
                "webhook" if config.webhook.enabled => channels.push(Box::new(WebhookChannel {
                    url: config.webhook.url.clone(),
                    min_level: config.webhook.min_level,
                    template: config.webhook.template.clone(),
                })),
                _ => {}
            }
        }
        Self {
            channels,
            enabled: true,
            sent: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
            enabled: false,
            sent: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Events dispatched since construction.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl NotificationSink for NotificationManager {
    fn send(&self, event: NotificationEvent) {
        if !self.enabled {
            return;
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        for channel in &self.channels {
            channel.send(&event);
        }
    }
}

/// Keeps every event in memory. Used by `once` runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    /// Experiment notifications only, in arrival order.
    #[must_use]
    pub fn experiment_notifications(&self) -> Vec<ChaosNotification> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                NotificationEvent::Experiment(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }
}

impl NotificationSink for MemorySink {
    fn send(&self, event: NotificationEvent) {
        self.events.lock().push(event);
    }
}
