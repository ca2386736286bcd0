//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::admin::calendar::parse_holiday;
use crate::admin::state::AdminState;
use crate::core::clock::seconds;
use crate::core::errors::{ChaosError, Result};
use crate::core::paths::resolve_against;
use crate::daemon::notifications::NotificationConfig;
use crate::experiment::lifecycle::ExperimentPolicy;
use crate::experiment::manager::ManagerSettings;
use crate::experiment::pool::MAX_WORKERS;
use crate::experiment::{
    DEFAULT_EXPERIMENT_DURATION_MINUTES, DEFAULT_EXPERIMENT_MINIMUM_DURATION_SECONDS,
    DEFAULT_MAXIMUM_SELF_HEALING_RETRIES, DEFAULT_SELF_HEALING_INTERVAL_MINUTES,
    DEFAULT_TIME_BEFORE_FINALIZATION_SECONDS,
};
use crate::logger::activity::LoggerConfig;
use crate::logger::jsonl::JsonlConfig;
use crate::platform::inventory::InventoryConfig;

/// Full chaosd configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub experiment: ExperimentConfig,
    pub scheduler: SchedulerConfig,
    pub admin: AdminConfig,
    pub calendar: CalendarConfig,
    pub inventory: InventoryConfig,
    pub scripts: ScriptsConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub notifications: NotificationConfig,
}

/// Per-experiment timing and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExperimentConfig {
    pub duration_minutes: u64,
    pub minimum_duration_seconds: u64,
    pub finalization_seconds: u64,
    /// Fallback for containers that do not declare their own interval.
    pub self_healing_interval_minutes: u64,
    pub max_self_healing_retries: u32,
    /// Action name to force when a container offers it.
    pub preferred_action: Option<String>,
}

/// Cadence of the two manager ticks and cohort limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub schedule_interval_secs: u64,
    pub status_interval_secs: u64,
    pub max_workers: usize,
    pub backoff_period_minutes: u64,
    pub automated_mode: bool,
    pub minimum_survivors: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdminConfig {
    pub initial_state: AdminState,
}

/// Working-hours window and holiday list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CalendarConfig {
    pub enabled: bool,
    pub utc_offset_hours: i32,
    pub start_hour: u32,
    /// Exclusive.
    pub end_hour: u32,
    pub weekends_off: bool,
    /// `YYYY-MM-DD`.
    pub holidays: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Relative paths resolve against the config file's directory.
    pub directory: Option<PathBuf>,
}

/// Activity log rotation and buffering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
    pub channel_capacity: usize,
}

/// Filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub jsonl_fallback: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            duration_minutes: DEFAULT_EXPERIMENT_DURATION_MINUTES,
            minimum_duration_seconds: DEFAULT_EXPERIMENT_MINIMUM_DURATION_SECONDS,
            finalization_seconds: DEFAULT_TIME_BEFORE_FINALIZATION_SECONDS,
            self_healing_interval_minutes: DEFAULT_SELF_HEALING_INTERVAL_MINUTES,
            max_self_healing_retries: DEFAULT_MAXIMUM_SELF_HEALING_RETRIES,
            preferred_action: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval_secs: 15,
            status_interval_secs: 15,
            max_workers: MAX_WORKERS,
            backoff_period_minutes: 15,
            automated_mode: true,
            minimum_survivors: 1,
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_hours: 0,
            start_hour: 9,
            end_hour: 17,
            weekends_off: true,
            holidays: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let jsonl = JsonlConfig::default();
        Self {
            max_size_bytes: jsonl.max_size_bytes,
            max_rotated_files: jsonl.max_rotated_files,
            fsync_interval_secs: jsonl.fsync_interval_secs,
            channel_capacity: LoggerConfig::default().channel_capacity,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[CHX-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("chaosd").join("config.toml");
        let data = home_dir.join(".local").join("share").join("chaosd");
        Self {
            config_file: cfg,
            jsonl_log: data.join("activity.jsonl"),
            jsonl_fallback: Some(PathBuf::from("/dev/shm/chaosd.jsonl")),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ChaosError::io(&path_buf, source))?;
            Self::from_toml(&raw)?
        } else if is_explicit_path {
            return Err(ChaosError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML without env overrides or validation.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Pretty TOML rendering of the effective config.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| ChaosError::Serialization {
            context: "toml",
            details: err.to_string(),
        })
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form so the value is stable across
    /// processes and toolchain versions.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    // ──── derived runtime settings ────

    #[must_use]
    pub fn experiment_policy(&self) -> ExperimentPolicy {
        ExperimentPolicy {
            minimum_duration: seconds(self.experiment.minimum_duration_seconds),
            maximum_duration: seconds(self.experiment.duration_minutes.saturating_mul(60)),
            finalization_duration: seconds(self.experiment.finalization_seconds),
            max_self_healing_retries: self.experiment.max_self_healing_retries,
            preferred_action: self.experiment.preferred_action.clone(),
        }
    }

    #[must_use]
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            policy: self.experiment_policy(),
            max_workers: self.scheduler.max_workers,
            backoff_period: seconds(self.scheduler.backoff_period_minutes.saturating_mul(60)),
            automated_mode: self.scheduler.automated_mode,
            minimum_survivors: self.scheduler.minimum_survivors,
        }
    }

    #[must_use]
    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            jsonl: JsonlConfig {
                path: self.paths.jsonl_log.clone(),
                fallback_path: self.paths.jsonl_fallback.clone(),
                max_size_bytes: self.logging.max_size_bytes,
                max_rotated_files: self.logging.max_rotated_files,
                fsync_interval_secs: self.logging.fsync_interval_secs,
            },
            channel_capacity: self.logging.channel_capacity,
        }
    }

    // ──── env overrides ────

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let e = &mut self.experiment;
        set_env(&mut lookup, "CHAOS_EXPERIMENT_DURATION_MINUTES", &mut e.duration_minutes)?;
        set_env(
            &mut lookup,
            "CHAOS_EXPERIMENT_MINIMUM_DURATION_SECONDS",
            &mut e.minimum_duration_seconds,
        )?;
        set_env(&mut lookup, "CHAOS_EXPERIMENT_FINALIZATION_SECONDS", &mut e.finalization_seconds)?;
        set_env(
            &mut lookup,
            "CHAOS_EXPERIMENT_SELF_HEALING_INTERVAL_MINUTES",
            &mut e.self_healing_interval_minutes,
        )?;
        set_env(
            &mut lookup,
            "CHAOS_EXPERIMENT_MAX_SELF_HEALING_RETRIES",
            &mut e.max_self_healing_retries,
        )?;
        if let Some(raw) = lookup("CHAOS_EXPERIMENT_PREFERRED_ACTION") {
            e.preferred_action = Some(raw.trim().to_string());
        }

        let s = &mut self.scheduler;
        set_env(&mut lookup, "CHAOS_SCHEDULER_SCHEDULE_INTERVAL_SECS", &mut s.schedule_interval_secs)?;
        set_env(&mut lookup, "CHAOS_SCHEDULER_STATUS_INTERVAL_SECS", &mut s.status_interval_secs)?;
        set_env(&mut lookup, "CHAOS_SCHEDULER_MAX_WORKERS", &mut s.max_workers)?;
        set_env(&mut lookup, "CHAOS_SCHEDULER_BACKOFF_PERIOD_MINUTES", &mut s.backoff_period_minutes)?;
        set_env(&mut lookup, "CHAOS_SCHEDULER_AUTOMATED_MODE", &mut s.automated_mode)?;
        set_env(&mut lookup, "CHAOS_SCHEDULER_MINIMUM_SURVIVORS", &mut s.minimum_survivors)?;

        set_env(&mut lookup, "CHAOS_ADMIN_INITIAL_STATE", &mut self.admin.initial_state)?;

        set_env(&mut lookup, "CHAOS_CALENDAR_ENABLED", &mut self.calendar.enabled)?;
        set_env(&mut lookup, "CHAOS_CALENDAR_UTC_OFFSET_HOURS", &mut self.calendar.utc_offset_hours)?;

        if let Some(raw) = lookup("CHAOS_SCRIPTS_DIRECTORY") {
            self.scripts.directory = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("CHAOS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        set_env(&mut lookup, "CHAOS_NOTIFICATIONS_ENABLED", &mut self.notifications.enabled)?;
        Ok(())
    }

    fn normalize_paths(&mut self) {
        let base = self
            .paths
            .config_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        if let Some(dir) = &self.scripts.directory {
            self.scripts.directory = Some(resolve_against(&base, dir));
        }
    }

    /// Check every section for values the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        let e = &self.experiment;
        if e.duration_minutes == 0 {
            return Err(invalid("experiment.duration_minutes must be > 0"));
        }
        if e.minimum_duration_seconds > e.duration_minutes.saturating_mul(60) {
            return Err(invalid(format!(
                "experiment.minimum_duration_seconds ({}) must not exceed duration_minutes ({}m)",
                e.minimum_duration_seconds, e.duration_minutes
            )));
        }
        if e.preferred_action.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(invalid("experiment.preferred_action must not be empty when set"));
        }

        let s = &self.scheduler;
        if s.schedule_interval_secs == 0 || s.status_interval_secs == 0 {
            return Err(invalid("scheduler intervals must be > 0"));
        }
        if !(1..=MAX_WORKERS).contains(&s.max_workers) {
            return Err(invalid(format!(
                "scheduler.max_workers must be in 1..={MAX_WORKERS}, got {}",
                s.max_workers
            )));
        }

        let c = &self.calendar;
        if !(-12..=14).contains(&c.utc_offset_hours) {
            return Err(invalid(format!(
                "calendar.utc_offset_hours must be in -12..=14, got {}",
                c.utc_offset_hours
            )));
        }
        if c.start_hour > 23 || c.end_hour > 24 || c.start_hour >= c.end_hour {
            return Err(invalid(format!(
                "calendar hours must satisfy 0 <= start_hour < end_hour <= 24, got {}..{}",
                c.start_hour, c.end_hour
            )));
        }
        for raw in &c.holidays {
            parse_holiday(raw)?;
        }

        self.inventory.validate()?;

        if self.paths.jsonl_log.as_os_str().is_empty() {
            return Err(invalid("paths.jsonl_log must not be empty"));
        }
        if self.logging.channel_capacity == 0 {
            return Err(invalid("logging.channel_capacity must be > 0"));
        }
        let hook = &self.notifications.webhook;
        if hook.enabled && hook.url.trim().is_empty() {
            return Err(invalid("notifications.webhook.url is required when the webhook is enabled"));
        }
        Ok(())
    }
}

fn invalid(details: impl Into<String>) -> ChaosError {
    ChaosError::InvalidConfig {
        details: details.into(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|error| ChaosError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{ChaosError, Config};
    use crate::admin::state::AdminState;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) -> crate::core::errors::Result<()> {
        let env = vars(pairs);
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.experiment.duration_minutes, 5);
        assert_eq!(cfg.experiment.minimum_duration_seconds, 30);
        assert_eq!(cfg.experiment.max_self_healing_retries, 10);
        assert_eq!(cfg.scheduler.schedule_interval_secs, 15);
        assert_eq!(cfg.scheduler.max_workers, 64);
        assert_eq!(cfg.admin.initial_state, AdminState::Started);

        let policy = cfg.experiment_policy();
        assert_eq!(policy.maximum_duration.num_seconds(), 300);
        assert_eq!(cfg.manager_settings().backoff_period.num_minutes(), 15);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let hash_before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.experiment.duration_minutes += 1;
        let hash_after = modified.stable_hash().expect("hash should compute");
        assert_ne!(hash_before, hash_after);
        assert_eq!(hash_before, Config::default().stable_hash().unwrap());
    }

    #[test]
    fn minimum_duration_cannot_exceed_maximum() {
        let mut cfg = Config::default();
        cfg.experiment.minimum_duration_seconds = 301;
        let err = cfg.validate().expect_err("expected validation error");
        assert!(err.to_string().contains("minimum_duration_seconds"));
    }

    #[test]
    fn worker_cap_enforced() {
        let mut cfg = Config::default();
        cfg.scheduler.max_workers = 0;
        assert!(cfg.validate().is_err());
        cfg.scheduler.max_workers = 65;
        let err = cfg.validate().expect_err("expected worker cap error");
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn calendar_window_must_be_ordered() {
        let mut cfg = Config::default();
        cfg.calendar.start_hour = 17;
        cfg.calendar.end_hour = 9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_holiday_rejected() {
        let mut cfg = Config::default();
        cfg.calendar.holidays = vec!["next tuesday".to_string()];
        let err = cfg.validate().expect_err("expected holiday error");
        assert!(matches!(err, ChaosError::ConfigParse { .. }));
    }

    #[test]
    fn enabled_webhook_requires_url() {
        let mut cfg = Config::default();
        cfg.notifications.webhook.enabled = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("CHAOS_EXPERIMENT_DURATION_MINUTES", "9"),
                ("CHAOS_EXPERIMENT_PREFERRED_ACTION", " kill-process "),
                ("CHAOS_SCHEDULER_AUTOMATED_MODE", "false"),
                ("CHAOS_ADMIN_INITIAL_STATE", "drain"),
                ("CHAOS_CALENDAR_UTC_OFFSET_HOURS", "-5"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.experiment.duration_minutes, 9);
        assert_eq!(cfg.experiment.preferred_action.as_deref(), Some("kill-process"));
        assert!(!cfg.scheduler.automated_mode);
        assert_eq!(cfg.admin.initial_state, AdminState::Drain);
        assert_eq!(cfg.calendar.utc_offset_hours, -5);
    }

    #[test]
    fn env_invalid_value_rejected() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, &[("CHAOS_SCHEDULER_MAX_WORKERS", "lots")])
            .expect_err("expected parse error");
        match err {
            ChaosError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("CHAOS_SCHEDULER_MAX_WORKERS"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/chaosd/config.toml")));
        assert!(matches!(result, Err(ChaosError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_sections_and_resolves_script_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [experiment]
            duration_minutes = 2
            minimum_duration_seconds = 10

            [scripts]
            directory = "scripts"

            [[inventory.platforms]]
            name = "lab"

            [[inventory.platforms.containers]]
            id = "web-1"
            "#,
        )
        .unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.experiment.duration_minutes, 2);
        assert_eq!(cfg.scripts.directory, Some(dir.path().join("scripts")));
        assert_eq!(cfg.inventory.platforms[0].containers[0].id, "web-1");
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn toml_round_trip_preserves_config() {
        let mut cfg = Config::default();
        cfg.calendar.holidays = vec!["2026-12-25".to_string()];
        cfg.scripts.directory = Some(PathBuf::from("/etc/chaosd/scripts"));
        let rendered = cfg.to_toml().unwrap();
        assert_eq!(Config::from_toml(&rendered).unwrap(), cfg);
    }
}
