//! Experiment actions and how one is chosen for a container.
//!
//! An action is either a `Capability` entry from the container's static
//! capability table or a `Scripted` action derived from a shell script. Both
//! produce the same thing when performed: an `ActionHooks` bundle with the
//! remediation, health probe, and finalizer bound for that experiment.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;

use crate::core::errors::{ChaosError, Result};
use crate::experiment::startup::CancellationToken;
use crate::experiment::state::{ContainerHealth, ExperimentType};
use crate::platform::container::Container;
use crate::scripts::manager::ScriptRegistry;
use crate::scripts::shell::ShellScript;

// ──────────────────── hooks ────────────────────

/// Remediation or cleanup closure.
pub type ActionHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;
/// Health probe; receives the experiment's start time.
pub type HealthHook = Arc<dyn Fn(DateTime<Utc>) -> Result<ContainerHealth> + Send + Sync>;
/// Fault injection entry of a capability table.
pub type FaultFn = Arc<dyn Fn(&FaultRequest<'_>) -> Result<ActionHooks> + Send + Sync>;

/// Closures bound to an experiment once its fault is running.
#[derive(Clone, Default)]
pub struct ActionHooks {
    pub self_healing: Option<ActionHook>,
    pub health_check: Option<HealthHook>,
    pub finalizer: Option<ActionHook>,
}

impl ActionHooks {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_self_healing<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.self_healing = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_health_check<F>(mut self, hook: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> Result<ContainerHealth> + Send + Sync + 'static,
    {
        self.health_check = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_finalizer<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.finalizer = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ActionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHooks")
            .field("self_healing", &self.self_healing.is_some())
            .field("health_check", &self.health_check.is_some())
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}

/// Arguments handed to a fault when it runs.
#[derive(Debug)]
pub struct FaultRequest<'a> {
    pub experiment_id: &'a str,
    pub experiment_type: ExperimentType,
    pub cancel: &'a CancellationToken,
}

// ──────────────────── reflective capability ────────────────────

/// One entry of a container's static capability table.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub experiment_type: ExperimentType,
    pub cattle_only: bool,
    perform: FaultFn,
}

impl Capability {
    pub fn new<F>(name: impl Into<String>, experiment_type: ExperimentType, perform: F) -> Self
    where
        F: Fn(&FaultRequest<'_>) -> Result<ActionHooks> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            experiment_type,
            cattle_only: false,
            perform: Arc::new(perform),
        }
    }

    /// Restrict this capability to disposable containers.
    #[must_use]
    pub fn cattle_only(mut self) -> Self {
        self.cattle_only = true;
        self
    }

    pub fn perform(&self, request: &FaultRequest<'_>) -> Result<ActionHooks> {
        (self.perform)(request)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("experiment_type", &self.experiment_type)
            .field("cattle_only", &self.cattle_only)
            .finish_non_exhaustive()
    }
}

// ──────────────────── scripted action ────────────────────

/// A shell script bound to one container, with its derived hooks.
#[derive(Clone)]
pub struct ScriptedAction {
    script: Arc<ShellScript>,
    container: Arc<dyn Container>,
    hooks: ActionHooks,
}

impl ScriptedAction {
    /// Derive remediation, health, and cleanup closures for `script` on `container`.
    ///
    /// Disposable containers self-heal by recycling and are healthy once
    /// recycled after the experiment started. Other containers run the
    /// script's own self-healing and health-check commands; a zero exit
    /// status is NORMAL and anything else, including a failure to run the
    /// probe at all, reads as RUNNING_EXPERIMENT.
    #[must_use]
    pub fn from_script(container: Arc<dyn Container>, script: Arc<ShellScript>) -> Self {
        let mut hooks = ActionHooks::none();

        if container.is_cattle() {
            let recycler = Arc::clone(&container);
            let prober = Arc::clone(&container);
            hooks = hooks
                .with_self_healing(move || recycler.recycle())
                .with_health_check(move |started_at| {
                    Ok(match prober.recycled_since(started_at) {
                        Ok(true) => ContainerHealth::Normal,
                        Ok(false) | Err(_) => ContainerHealth::RunningExperiment,
                    })
                });
        } else {
            if let Some(command) = script.self_healing_command.clone() {
                let target = Arc::clone(&container);
                hooks = hooks.with_self_healing(move || match target.run_command(&command)? {
                    0 => Ok(()),
                    status => Err(ChaosError::SelfHealing {
                        details: format!("`{command}` exited with status {status}"),
                    }),
                });
            }
            if let Some(command) = script.health_check_command.clone() {
                let target = Arc::clone(&container);
                hooks = hooks.with_health_check(move |_| {
                    Ok(match target.run_command(&command) {
                        Ok(0) => ContainerHealth::Normal,
                        Ok(_) | Err(_) => ContainerHealth::RunningExperiment,
                    })
                });
            }
        }

        if let Some(command) = script.finalize_command.clone() {
            let target = Arc::clone(&container);
            hooks = hooks.with_finalizer(move || match target.run_command(&command)? {
                0 => Ok(()),
                status => Err(ChaosError::Finalization {
                    details: format!("`{command}` exited with status {status}"),
                }),
            });
        }

        Self {
            script,
            container,
            hooks,
        }
    }

    #[must_use]
    pub fn script(&self) -> &ShellScript {
        &self.script
    }

    #[must_use]
    pub fn hooks(&self) -> &ActionHooks {
        &self.hooks
    }
}

impl fmt::Debug for ScriptedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedAction")
            .field("script", &self.script.name)
            .field("container", &self.container.identity())
            .field("hooks", &self.hooks)
            .finish()
    }
}

// ──────────────────── experiment action ────────────────────

/// The fault chosen for one experiment.
#[derive(Debug, Clone)]
pub enum ExperimentAction {
    Reflective(Capability),
    Scripted(ScriptedAction),
}

impl ExperimentAction {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Reflective(capability) => &capability.name,
            Self::Scripted(action) => &action.script.name,
        }
    }

    #[must_use]
    pub fn experiment_type(&self) -> ExperimentType {
        match self {
            Self::Reflective(capability) => capability.experiment_type,
            Self::Scripted(action) => action.script.experiment_type,
        }
    }

    #[must_use]
    pub fn is_cattle_only(&self) -> bool {
        match self {
            Self::Reflective(capability) => capability.cattle_only,
            Self::Scripted(action) => action.script.requires_cattle,
        }
    }

    /// Inject the fault. Blocks until the injection finishes or fails.
    pub fn perform(&self, request: &FaultRequest<'_>) -> Result<ActionHooks> {
        match self {
            Self::Reflective(capability) => capability.perform(request),
            Self::Scripted(action) => {
                action.container.run_script(&action.script, request.cancel)?;
                Ok(action.hooks.clone())
            }
        }
    }
}

// ──────────────────── selection ────────────────────

/// Every action applicable to `container`, ignoring experiment type.
///
/// Scripts are offered only to containers that run shell experiments and
/// only when none of their dependencies is known to be missing. Cattle-only
/// actions are dropped unless the container is disposable.
#[must_use]
pub fn candidate_actions(
    container: &Arc<dyn Container>,
    scripts: &dyn ScriptRegistry,
) -> Vec<ExperimentAction> {
    let mut candidates: Vec<ExperimentAction> = container
        .capabilities()
        .into_iter()
        .map(ExperimentAction::Reflective)
        .collect();

    if container.supports_shell_based_experiments() {
        let missing = container.known_missing_capabilities();
        candidates.extend(
            scripts
                .scripts()
                .into_iter()
                .filter(|script| script.does_not_use_missing_dependencies(&missing))
                .map(|script| {
                    ExperimentAction::Scripted(ScriptedAction::from_script(
                        Arc::clone(container),
                        script,
                    ))
                }),
        );
    }

    let cattle = container.is_cattle();
    candidates.retain(|action| cattle || !action.is_cattle_only());
    candidates
}

/// What the caller asked selection to honor.
#[derive(Debug, Clone, Copy)]
pub struct SelectionCriteria<'a> {
    pub experiment_type: ExperimentType,
    /// Operator preference; used when present among candidates.
    pub preferred: Option<&'a str>,
    /// Mandatory method name; absence is an error.
    pub specific: Option<&'a str>,
}

/// Choose the action for an experiment.
///
/// A `specific` name must exist or selection errors. Otherwise a `preferred`
/// name wins when present. Either way the caller should adopt the returned
/// action's type. Failing both, one action of `experiment_type` is drawn
/// uniformly at random; `None` means nothing matched.
pub fn select_action(
    container: &Arc<dyn Container>,
    scripts: &dyn ScriptRegistry,
    criteria: SelectionCriteria<'_>,
) -> Result<Option<ExperimentAction>> {
    let candidates = candidate_actions(container, scripts);

    if let Some(specific) = criteria.specific {
        return candidates
            .into_iter()
            .find(|action| action.name() == specific)
            .map(Some)
            .ok_or_else(|| ChaosError::ExperimentMethodNotFound {
                method: specific.to_string(),
            });
    }

    if let Some(preferred) = criteria.preferred
        && let Some(action) = candidates.iter().find(|action| action.name() == preferred)
    {
        return Ok(Some(action.clone()));
    }

    let matching: Vec<&ExperimentAction> = candidates
        .iter()
        .filter(|action| action.experiment_type() == criteria.experiment_type)
        .collect();
    Ok(matching.choose(&mut rand::rng()).map(|action| (*action).clone()))
}
