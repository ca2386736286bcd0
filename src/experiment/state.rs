//! Experiment lifecycle states, fault categories, and health readings.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::ChaosError;

// ──────────────────── experiment state ────────────────────

/// Lifecycle state of a single experiment.
///
/// ```text
/// CREATED ─► STARTING ─► STARTED ◄─► SELF_HEALING
///               │           │             │
///               ▼           ▼             ▼
///             FAILED    FINALIZING ─►  FAILED
///                           │
///                           ▼
///                       FINISHED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    Created,
    Starting,
    Started,
    SelfHealing,
    Finalizing,
    Finished,
    Failed,
}

impl ExperimentState {
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Starting,
        Self::Started,
        Self::SelfHealing,
        Self::Finalizing,
        Self::Finished,
        Self::Failed,
    ];

    /// True only for FINISHED and FAILED.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Starting)
                | (Self::Starting, Self::Started | Self::Failed)
                | (
                    Self::Started,
                    Self::SelfHealing | Self::Finalizing | Self::Failed
                )
                | (Self::SelfHealing, Self::Started | Self::Failed)
                | (Self::Finalizing, Self::Finished | Self::Failed)
        )
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "CREATED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::SelfHealing => "SELF_HEALING",
            Self::Finalizing => "FINALIZING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

// ──────────────────── experiment type ────────────────────

/// Fault category an experiment injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentType {
    State,
    Network,
    Resource,
}

impl ExperimentType {
    pub const ALL: [Self; 3] = [Self::State, Self::Network, Self::Resource];
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => write!(f, "STATE"),
            Self::Network => write!(f, "NETWORK"),
            Self::Resource => write!(f, "RESOURCE"),
        }
    }
}

impl FromStr for ExperimentType {
    type Err = ChaosError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Self::State),
            "network" => Ok(Self::Network),
            "resource" => Ok(Self::Resource),
            other => Err(ChaosError::ConfigParse {
                context: "experiment type",
                details: format!("unknown experiment type {other:?}"),
            }),
        }
    }
}

// ──────────────────── container health ────────────────────

/// Result of probing a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerHealth {
    Normal,
    RunningExperiment,
    DoesNotExist,
}

impl fmt::Display for ContainerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::RunningExperiment => write!(f, "RUNNING_EXPERIMENT"),
            Self::DoesNotExist => write!(f, "DOES_NOT_EXIST"),
        }
    }
}

// ──────────────────── transition log ────────────────────

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ExperimentState,
    pub to: ExperimentState,
    pub at: DateTime<Utc>,
    pub reason: String,
}
