//! Config-declared platform whose containers are driven by shell commands.
//!
//! Every side effect (fault, probe, remediation, recycle, cleanup) is a
//! `sh -c` command from the inventory section of the config file, which makes
//! the daemon usable against local services or anything reachable through
//! `ssh`/`kubectl` wrappers without a dedicated adapter.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::clock::{Clock, seconds};
use crate::core::errors::{ChaosError, Result};
use crate::experiment::action::{ActionHooks, Capability};
use crate::experiment::startup::CancellationToken;
use crate::experiment::state::{ContainerHealth, ExperimentType};
use crate::platform::container::Container;
use crate::platform::registry::{DEFAULT_DESTRUCTION_PROBABILITY, Platform};
use crate::platform::scheduler::ChaosScheduler;
use crate::platform::shell::{run_shell, run_shell_checked};
use crate::scripts::shell::ShellScript;

// ──────────────────── config ────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Wall-clock limit for any single inventory command.
    pub command_timeout_secs: u64,
    pub platforms: Vec<PlatformConfig>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 300,
            platforms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub name: String,
    /// Mean time between two cohorts on this platform.
    pub average_minutes_between_experiments: u64,
    pub destruction_probability: f64,
    /// Make the first slot due at start-up instead of drawing one.
    pub first_experiment_due: bool,
    pub containers: Vec<ContainerConfig>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "inventory".to_string(),
            average_minutes_between_experiments: 240,
            destruction_probability: DEFAULT_DESTRUCTION_PROBABILITY,
            first_experiment_due: false,
            containers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub id: String,
    /// Defaults to `id`.
    pub aggregation_id: Option<String>,
    pub cattle: bool,
    pub shell_experiments: bool,
    /// Zero exit means healthy.
    pub health_command: Option<String>,
    /// Non-zero exit means the container is gone.
    pub exists_command: Option<String>,
    pub recycle_command: Option<String>,
    /// Wrapper for script bodies; `{script}` is replaced by a quoted copy.
    pub script_runner: Option<String>,
    pub missing_capabilities: BTreeSet<String>,
    pub self_healing_interval_minutes: Option<u64>,
    pub capabilities: Vec<CapabilityConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub name: String,
    pub experiment_type: Option<ExperimentType>,
    pub command: String,
    pub cattle_only: bool,
    pub self_healing_command: Option<String>,
    pub health_check_command: Option<String>,
    pub finalize_command: Option<String>,
}

impl InventoryConfig {
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for platform in &self.platforms {
            if platform.name.trim().is_empty() {
                return Err(invalid("inventory platform name must not be empty"));
            }
            if !names.insert(platform.name.as_str()) {
                return Err(invalid(format!("duplicate inventory platform {}", platform.name)));
            }
            if !(0.0..=1.0).contains(&platform.destruction_probability) {
                return Err(invalid(format!(
                    "platform {}: destruction_probability must be within [0, 1]",
                    platform.name
                )));
            }
            if platform.average_minutes_between_experiments == 0 {
                return Err(invalid(format!(
                    "platform {}: average_minutes_between_experiments must be > 0",
                    platform.name
                )));
            }
            let mut ids = HashSet::new();
            for container in &platform.containers {
                if container.id.trim().is_empty() {
                    return Err(invalid(format!("platform {}: container id must not be empty", platform.name)));
                }
                if !ids.insert(container.id.as_str()) {
                    return Err(invalid(format!(
                        "platform {}: duplicate container {}",
                        platform.name, container.id
                    )));
                }
                for capability in &container.capabilities {
                    if capability.name.trim().is_empty() || capability.command.trim().is_empty() {
                        return Err(invalid(format!(
                            "container {}: capabilities need a name and a command",
                            container.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid(details: impl Into<String>) -> ChaosError {
    ChaosError::InvalidConfig {
        details: details.into(),
    }
}

/// Build every configured platform.
pub fn build_platforms(
    config: &InventoryConfig,
    default_self_healing_interval: TimeDelta,
    clock: &Arc<dyn Clock>,
) -> Result<Vec<Arc<dyn Platform>>> {
    config.validate()?;
    let timeout = Duration::from_secs(config.command_timeout_secs.max(1));
    Ok(config
        .platforms
        .iter()
        .map(|platform| {
            Arc::new(InventoryPlatform::from_config(
                platform,
                default_self_healing_interval,
                timeout,
                clock,
            )) as Arc<dyn Platform>
        })
        .collect())
}

// ──────────────────── platform ────────────────────

#[derive(Debug)]
pub struct InventoryPlatform {
    platform_type: String,
    containers: Vec<Arc<dyn Container>>,
    scheduler: ChaosScheduler,
    destruction_probability: f64,
}

impl InventoryPlatform {
    #[must_use]
    pub fn from_config(
        config: &PlatformConfig,
        default_self_healing_interval: TimeDelta,
        command_timeout: Duration,
        clock: &Arc<dyn Clock>,
    ) -> Self {
        let average = seconds(config.average_minutes_between_experiments.saturating_mul(60));
        let scheduler = if config.first_experiment_due {
            ChaosScheduler::due_now(average, Arc::clone(clock))
        } else {
            ChaosScheduler::new(average, Arc::clone(clock))
        };
        let containers = config
            .containers
            .iter()
            .map(|c| {
                Arc::new(InventoryContainer {
                    platform_type: config.name.clone(),
                    aggregation_id: c.aggregation_id.clone().unwrap_or_else(|| c.id.clone()),
                    self_healing_interval: c
                        .self_healing_interval_minutes
                        .map_or(default_self_healing_interval, |m| seconds(m.saturating_mul(60))),
                    destruction_probability: config.destruction_probability,
                    command_timeout,
                    clock: Arc::clone(clock),
                    recycled_at: Mutex::new(None),
                    config: c.clone(),
                }) as Arc<dyn Container>
            })
            .collect();
        Self {
            platform_type: config.name.clone(),
            containers,
            scheduler,
            destruction_probability: config.destruction_probability,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &ChaosScheduler {
        &self.scheduler
    }
}

impl Platform for InventoryPlatform {
    fn platform_type(&self) -> &str {
        &self.platform_type
    }

    fn roster(&self) -> Vec<Arc<dyn Container>> {
        self.containers.clone()
    }

    fn next_chaos_time(&self) -> DateTime<Utc> {
        self.scheduler.next_chaos_time()
    }

    fn can_experiment(&self) -> bool {
        self.scheduler.is_due()
    }

    fn schedule_experiment(&self) {
        eprintln!("[CHX-PLATFORM] scheduling an experiment on {}", self.platform_type);
        self.scheduler.start_experiment();
    }

    fn destruction_probability(&self) -> f64 {
        self.destruction_probability
    }
}

// ──────────────────── container ────────────────────

#[derive(Debug)]
pub struct InventoryContainer {
    platform_type: String,
    aggregation_id: String,
    self_healing_interval: TimeDelta,
    destruction_probability: f64,
    command_timeout: Duration,
    clock: Arc<dyn Clock>,
    recycled_at: Mutex<Option<DateTime<Utc>>>,
    config: ContainerConfig,
}

impl InventoryContainer {
    fn probe(&self, command: &str) -> Result<i32> {
        run_shell(command, None, self.command_timeout).map_err(|e| ChaosError::HealthProbe {
            details: e.to_string(),
        })
    }
}

impl Container for InventoryContainer {
    fn identity(&self) -> &str {
        &self.config.id
    }

    fn aggregation_identifier(&self) -> &str {
        &self.aggregation_id
    }

    fn platform_type(&self) -> &str {
        &self.platform_type
    }

    fn container_health(&self, _experiment_type: ExperimentType) -> Result<ContainerHealth> {
        if let Some(exists) = &self.config.exists_command
            && self.probe(exists)? != 0
        {
            return Ok(ContainerHealth::DoesNotExist);
        }
        match &self.config.health_command {
            None => Ok(ContainerHealth::Normal),
            Some(command) => Ok(if self.probe(command)? == 0 {
                ContainerHealth::Normal
            } else {
                ContainerHealth::RunningExperiment
            }),
        }
    }

    fn can_experiment(&self) -> bool {
        rand::random::<f64>() < self.destruction_probability
    }

    fn is_cattle(&self) -> bool {
        self.config.cattle
    }

    fn minimum_self_healing_interval(&self) -> TimeDelta {
        self.self_healing_interval
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.config
            .capabilities
            .iter()
            .map(|entry| capability_from_config(entry, self.command_timeout))
            .collect()
    }

    fn known_missing_capabilities(&self) -> BTreeSet<String> {
        self.config.missing_capabilities.clone()
    }

    fn supports_shell_based_experiments(&self) -> bool {
        self.config.shell_experiments
    }

    fn run_script(&self, script: &ShellScript, cancel: &CancellationToken) -> Result<()> {
        let command = match &self.config.script_runner {
            Some(runner) => runner.replace("{script}", &shell_quote(&script.contents)),
            None => script.contents.clone(),
        };
        run_shell_checked(&command, Some(cancel), self.command_timeout).map_err(|e| match e {
            interrupted @ ChaosError::StartupInterrupted { .. } => interrupted,
            other => ChaosError::command(&script.name, other.to_string()),
        })
    }

    fn run_command(&self, command: &str) -> Result<i32> {
        run_shell(command, None, self.command_timeout)
    }

    fn recycle(&self) -> Result<()> {
        let command = self.config.recycle_command.as_deref().ok_or_else(|| {
            ChaosError::SelfHealing {
                details: format!("{} has no recycle_command", self.config.id),
            }
        })?;
        run_shell_checked(command, None, self.command_timeout).map_err(|e| {
            ChaosError::SelfHealing {
                details: e.to_string(),
            }
        })?;
        *self.recycled_at.lock() = Some(self.clock.now());
        Ok(())
    }

    fn recycled_since(&self, since: DateTime<Utc>) -> Result<bool> {
        Ok(self.recycled_at.lock().is_some_and(|at| at > since))
    }
}

fn capability_from_config(entry: &CapabilityConfig, timeout: Duration) -> Capability {
    let command = entry.command.clone();
    let heal = entry.self_healing_command.clone();
    let health = entry.health_check_command.clone();
    let finalize = entry.finalize_command.clone();
    let capability = Capability::new(
        entry.name.clone(),
        entry.experiment_type.unwrap_or(ExperimentType::State),
        move |request| {
            run_shell_checked(&command, Some(request.cancel), timeout)?;
            let mut hooks = ActionHooks::none();
            if let Some(heal) = heal.clone() {
                hooks = hooks.with_self_healing(move || {
                    run_shell_checked(&heal, None, timeout).map_err(|e| ChaosError::SelfHealing {
                        details: e.to_string(),
                    })
                });
            }
            if let Some(health) = health.clone() {
                hooks = hooks.with_health_check(move |_| {
                    Ok(match run_shell(&health, None, timeout)? {
                        0 => ContainerHealth::Normal,
                        _ => ContainerHealth::RunningExperiment,
                    })
                });
            }
            if let Some(finalize) = finalize.clone() {
                hooks = hooks.with_finalizer(move || {
                    run_shell_checked(&finalize, None, timeout).map_err(|e| {
                        ChaosError::Finalization {
                            details: e.to_string(),
                        }
                    })
                });
            }
            Ok(hooks)
        },
    );
    if entry.cattle_only {
        capability.cattle_only()
    } else {
        capability
    }
}

/// Single-quote `raw` for a POSIX shell.
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}
