//! CHX-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ChaosError>;

/// Top-level error type for the chaos engine.
#[derive(Debug, Error)]
pub enum ChaosError {
    #[error("[CHX-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CHX-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CHX-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CHX-1101] script {script} is malformed: {details}")]
    ScriptParse { script: String, details: String },

    #[error("[CHX-2001] experiment startup rejected: {reason}")]
    StartupRejected { reason: String },

    #[error("[CHX-2002] health probe failed: {details}")]
    HealthProbe { details: String },

    #[error("[CHX-2003] self-healing failed: {details}")]
    SelfHealing { details: String },

    #[error("[CHX-2004] finalization failed: {details}")]
    Finalization { details: String },

    #[error("[CHX-2005] self-healing retry budget exhausted after {retries} attempts")]
    RetryBudgetExhausted { retries: u32 },

    #[error("[CHX-2006] container {container} no longer exists")]
    ContainerVanished { container: String },

    #[error("[CHX-2007] experiment startup interrupted: {details}")]
    StartupInterrupted { details: String },

    #[error("[CHX-2008] experiment method {method} does not exist for this container")]
    ExperimentMethodNotFound { method: String },

    #[error("[CHX-2101] another experiment is already in progress")]
    AnotherExperimentInProgress,

    #[error("[CHX-2102] platform {platform} does not exist")]
    PlatformDoesNotExist { platform: String },

    #[error(
        "[CHX-2103] not enough containers on {platform}: {requested} requested, {available} available"
    )]
    NotEnoughContainers {
        platform: String,
        requested: usize,
        available: usize,
    },

    #[error("[CHX-2201] command `{command}` failed: {details}")]
    Command { command: String, details: String },

    #[error("[CHX-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CHX-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CHX-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[CHX-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ChaosError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CHX-1001",
            Self::MissingConfig { .. } => "CHX-1002",
            Self::ConfigParse { .. } => "CHX-1003",
            Self::ScriptParse { .. } => "CHX-1101",
            Self::StartupRejected { .. } => "CHX-2001",
            Self::HealthProbe { .. } => "CHX-2002",
            Self::SelfHealing { .. } => "CHX-2003",
            Self::Finalization { .. } => "CHX-2004",
            Self::RetryBudgetExhausted { .. } => "CHX-2005",
            Self::ContainerVanished { .. } => "CHX-2006",
            Self::StartupInterrupted { .. } => "CHX-2007",
            Self::ExperimentMethodNotFound { .. } => "CHX-2008",
            Self::AnotherExperimentInProgress => "CHX-2101",
            Self::PlatformDoesNotExist { .. } => "CHX-2102",
            Self::NotEnoughContainers { .. } => "CHX-2103",
            Self::Command { .. } => "CHX-2201",
            Self::Serialization { .. } => "CHX-3001",
            Self::Io { .. } => "CHX-3002",
            Self::ChannelClosed { .. } => "CHX-3003",
            Self::Runtime { .. } => "CHX-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Command { .. }
                | Self::HealthProbe { .. }
                | Self::SelfHealing { .. }
                | Self::AnotherExperimentInProgress
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for shell command failures.
    #[must_use]
    pub fn command(command: &str, details: impl Into<String>) -> Self {
        Self::Command {
            command: command.to_string(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for ChaosError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ChaosError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ChaosError> {
        vec![
            ChaosError::InvalidConfig {
                details: String::new(),
            },
            ChaosError::MissingConfig {
                path: PathBuf::new(),
            },
            ChaosError::ConfigParse {
                context: "",
                details: String::new(),
            },
            ChaosError::ScriptParse {
                script: String::new(),
                details: String::new(),
            },
            ChaosError::StartupRejected {
                reason: String::new(),
            },
            ChaosError::HealthProbe {
                details: String::new(),
            },
            ChaosError::SelfHealing {
                details: String::new(),
            },
            ChaosError::Finalization {
                details: String::new(),
            },
            ChaosError::RetryBudgetExhausted { retries: 0 },
            ChaosError::ContainerVanished {
                container: String::new(),
            },
            ChaosError::StartupInterrupted {
                details: String::new(),
            },
            ChaosError::ExperimentMethodNotFound {
                method: String::new(),
            },
            ChaosError::AnotherExperimentInProgress,
            ChaosError::PlatformDoesNotExist {
                platform: String::new(),
            },
            ChaosError::NotEnoughContainers {
                platform: String::new(),
                requested: 0,
                available: 0,
            },
            ChaosError::Command {
                command: String::new(),
                details: String::new(),
            },
            ChaosError::Serialization {
                context: "",
                details: String::new(),
            },
            ChaosError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            ChaosError::ChannelClosed { component: "" },
            ChaosError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(ChaosError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_chx_prefix_and_appear_in_display() {
        for err in all_variants() {
            assert!(
                err.code().starts_with("CHX-"),
                "code {} must start with CHX-",
                err.code()
            );
            assert!(
                err.to_string().contains(err.code()),
                "display should contain error code: {err}"
            );
        }
    }

    #[test]
    fn not_enough_containers_reports_counts() {
        let err = ChaosError::NotEnoughContainers {
            platform: "local".to_string(),
            requested: 3,
            available: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("local"));
        assert!(msg.contains("3 requested"));
        assert!(msg.contains("1 available"));
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(ChaosError::AnotherExperimentInProgress.is_retryable());
        assert!(ChaosError::command("true", "boom").is_retryable());
        assert!(ChaosError::ChannelClosed { component: "test" }.is_retryable());

        assert!(!ChaosError::RetryBudgetExhausted { retries: 10 }.is_retryable());
        assert!(
            !ChaosError::ContainerVanished {
                container: "c".to_string()
            }
            .is_retryable()
        );
        assert!(
            !ChaosError::Finalization {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ChaosError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = ChaosError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "CHX-3002");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ChaosError = json_err.into();
        assert_eq!(err.code(), "CHX-3001");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: ChaosError = toml_err.into();
        assert_eq!(err.code(), "CHX-1003");
    }
}
