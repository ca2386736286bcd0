//! The experimentable unit of workload and its contract with the engine.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::core::errors::{ChaosError, Result};
use crate::experiment::action::Capability;
use crate::experiment::startup::CancellationToken;
use crate::experiment::state::{ContainerHealth, ExperimentType};
use crate::scripts::shell::ShellScript;

/// A workload on some platform that experiments can target.
///
/// Implementations own every platform-specific side effect. The engine never
/// locks a container; mutating calls are assumed serialized by the
/// implementation's own `can_experiment()` gate at selection time.
pub trait Container: Send + Sync + fmt::Debug {
    /// Unique identity within the owning platform.
    fn identity(&self) -> &str;

    /// Grouping key shared by interchangeable containers (e.g. an autoscaling group).
    fn aggregation_identifier(&self) -> &str;

    /// Type name of the owning platform.
    fn platform_type(&self) -> &str;

    /// Whether an operator-supplied identifier refers to this container.
    fn matches_identity(&self, identifier: &str) -> bool {
        self.identity() == identifier
    }

    fn container_health(&self, experiment_type: ExperimentType) -> Result<ContainerHealth>;

    fn supports_experiment_type(&self, experiment_type: ExperimentType) -> bool {
        self.capabilities()
            .iter()
            .any(|capability| capability.experiment_type == experiment_type)
    }

    /// Called on the startup thread immediately before the fault runs.
    fn start_experiment(&self, experiment_id: &str) -> Result<()> {
        let _ = experiment_id;
        Ok(())
    }

    /// Whether this container may be selected right now.
    fn can_experiment(&self) -> bool;

    /// Disposable containers are recycled wholesale instead of repaired.
    fn is_cattle(&self) -> bool {
        false
    }

    fn minimum_self_healing_interval(&self) -> TimeDelta;

    /// Static table of faults this container can run.
    fn capabilities(&self) -> Vec<Capability>;

    /// Commands known to be absent; scripts depending on them are skipped.
    fn known_missing_capabilities(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn supports_shell_based_experiments(&self) -> bool {
        false
    }

    fn run_script(&self, script: &ShellScript, cancel: &CancellationToken) -> Result<()> {
        let _ = cancel;
        Err(ChaosError::StartupRejected {
            reason: format!(
                "{} does not support shell script {}",
                self.identity(),
                script.name
            ),
        })
    }

    /// Run a shell command on the container and return its exit status.
    fn run_command(&self, command: &str) -> Result<i32> {
        Err(ChaosError::command(
            command,
            format!("{} does not support shell commands", self.identity()),
        ))
    }

    /// Replace the container with a fresh instance.
    fn recycle(&self) -> Result<()> {
        Err(ChaosError::SelfHealing {
            details: format!("{} cannot be recycled", self.identity()),
        })
    }

    /// Whether the container has been replaced since `since`.
    fn recycled_since(&self, since: DateTime<Utc>) -> Result<bool> {
        let _ = since;
        Err(ChaosError::HealthProbe {
            details: format!("{} does not track recycling", self.identity()),
        })
    }
}
