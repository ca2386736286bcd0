//! One fault-injection lifecycle bound to one container.
//!
//! Each transition function is invoked by the manager only while the
//! experiment is in the matching state, and each moves the experiment at
//! most one edge along the graph in [`ExperimentState`]. All per-experiment
//! failures are contained here: they become a state change plus a
//! notification and never propagate to the caller, except for startup
//! rejections which leave the state untouched and return `Err`.

#![allow(missing_docs)]

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use serde::Serialize;

use crate::admin::calendar::HolidayManager;
use crate::admin::state::AdminManager;
use crate::core::clock::{Clock, after, seconds};
use crate::core::errors::{ChaosError, Result};
use crate::daemon::notifications::{
    ChaosNotification, NotificationEvent, NotificationLevel, NotificationSink,
};
use crate::experiment::action::{
    ActionHooks, ExperimentAction, FaultRequest, SelectionCriteria, select_action,
};
use crate::experiment::context::DiagnosticContext;
use crate::experiment::startup::{PendingStartup, StartupPoll};
use crate::experiment::state::{ContainerHealth, ExperimentState, ExperimentType, TransitionRecord};
use crate::experiment::{
    DEFAULT_EXPERIMENT_DURATION_MINUTES, DEFAULT_EXPERIMENT_MINIMUM_DURATION_SECONDS,
    DEFAULT_MAXIMUM_SELF_HEALING_RETRIES, DEFAULT_TIME_BEFORE_FINALIZATION_SECONDS,
    FAILED_TO_START_EXPERIMENT, MAXIMUM_SELF_HEALING_RETRIES_REACHED, SELF_HEALING_ERROR,
    STARTING_NEW_EXPERIMENT,
};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::container::Container;
use crate::scripts::manager::ScriptRegistry;

// ──────────────────── policy ────────────────────

/// Timing and retry knobs applied to every experiment of a cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentPolicy {
    /// Health always reads RUNNING_EXPERIMENT until this much time has passed.
    pub minimum_duration: TimeDelta,
    /// Past this, self-healing becomes mandatory.
    pub maximum_duration: TimeDelta,
    /// Grace period between the first healthy reading and finalization.
    pub finalization_duration: TimeDelta,
    pub max_self_healing_retries: u32,
    pub preferred_action: Option<String>,
}

impl Default for ExperimentPolicy {
    fn default() -> Self {
        Self {
            minimum_duration: seconds(DEFAULT_EXPERIMENT_MINIMUM_DURATION_SECONDS),
            maximum_duration: seconds(DEFAULT_EXPERIMENT_DURATION_MINUTES * 60),
            finalization_duration: seconds(DEFAULT_TIME_BEFORE_FINALIZATION_SECONDS),
            max_self_healing_retries: DEFAULT_MAXIMUM_SELF_HEALING_RETRIES,
            preferred_action: None,
        }
    }
}

// ──────────────────── collaborators ────────────────────

/// Services every experiment consults, wired once at process start.
#[derive(Clone)]
pub struct Collaborators {
    pub notifications: Arc<dyn NotificationSink>,
    pub admin: Arc<dyn AdminManager>,
    pub holidays: Arc<dyn HolidayManager>,
    pub scripts: Arc<dyn ScriptRegistry>,
    pub clock: Arc<dyn Clock>,
    pub activity: ActivityLoggerHandle,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("clock", &self.clock)
            .field("admin_state", &self.admin.admin_state())
            .finish_non_exhaustive()
    }
}

// ──────────────────── startup rejection ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Holiday, working hours, or admin state. Retried on later ticks.
    Gated,
    /// The container or selection turned the experiment down.
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupRejection {
    pub kind: RejectionKind,
    pub reason: String,
}

// ──────────────────── snapshot ────────────────────

/// Serializable view of an experiment for listings and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSnapshot {
    pub id: String,
    pub platform: String,
    pub container: String,
    pub aggregation_id: String,
    pub experiment_type: ExperimentType,
    pub state: ExperimentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_method: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalization_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_self_healing_time: Option<DateTime<Utc>>,
    pub self_healing_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rejection: Option<StartupRejection>,
    pub transitions: Vec<TransitionRecord>,
}

// ──────────────────── experiment ────────────────────

/// Hooks bound by a finished injection and the instant it finished.
struct InjectedFault {
    hooks: ActionHooks,
    completed_at: DateTime<Utc>,
}

struct ExperimentInner {
    state: ExperimentState,
    experiment_type: ExperimentType,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    finalization_start_time: Option<DateTime<Utc>>,
    last_self_healing_time: Option<DateTime<Utc>>,
    action: Option<ExperimentAction>,
    hooks: ActionHooks,
    pending: Option<PendingStartup<InjectedFault>>,
    last_rejection: Option<StartupRejection>,
    transitions: Vec<TransitionRecord>,
    closed: bool,
}

pub struct Experiment {
    id: String,
    container: Arc<dyn Container>,
    policy: ExperimentPolicy,
    collaborators: Collaborators,
    specific_method: Option<String>,
    self_healing_counter: AtomicU32,
    inner: Mutex<ExperimentInner>,
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Experiment")
            .field("id", &self.id)
            .field("container", &self.container.identity())
            .field("state", &inner.state)
            .field("experiment_type", &inner.experiment_type)
            .finish_non_exhaustive()
    }
}

impl Experiment {
    /// New CREATED experiment. The fault category is drawn at random from
    /// those the container supports, defaulting to STATE.
    #[must_use]
    pub fn new(
        container: Arc<dyn Container>,
        policy: ExperimentPolicy,
        collaborators: Collaborators,
    ) -> Self {
        let supported: Vec<ExperimentType> = ExperimentType::ALL
            .into_iter()
            .filter(|t| container.supports_experiment_type(*t))
            .collect();
        let experiment_type = supported
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(ExperimentType::State);
        let created_at = collaborators.clock.now();

        Self {
            id: new_experiment_id(),
            container,
            policy,
            collaborators,
            specific_method: None,
            self_healing_counter: AtomicU32::new(0),
            inner: Mutex::new(ExperimentInner {
                state: ExperimentState::Created,
                experiment_type,
                created_at,
                start_time: None,
                end_time: None,
                finalization_start_time: None,
                last_self_healing_time: None,
                action: None,
                hooks: ActionHooks::none(),
                pending: None,
                last_rejection: None,
                transitions: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Require a named method; startup fails if the container lacks it.
    #[must_use]
    pub fn with_specific_method(mut self, method: impl Into<String>) -> Self {
        self.specific_method = Some(method.into());
        self
    }

    /// Override the randomly drawn fault category.
    #[must_use]
    pub fn with_experiment_type(self, experiment_type: ExperimentType) -> Self {
        self.inner.lock().experiment_type = experiment_type;
        self
    }

    // ──── accessors ────

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    #[must_use]
    pub fn state(&self) -> ExperimentState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn experiment_type(&self) -> ExperimentType {
        self.inner.lock().experiment_type
    }

    #[must_use]
    pub fn specific_method(&self) -> Option<&str> {
        self.specific_method.as_deref()
    }

    #[must_use]
    pub fn action_name(&self) -> Option<String> {
        self.inner.lock().action.as_ref().map(|a| a.name().to_string())
    }

    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().start_time
    }

    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().end_time
    }

    #[must_use]
    pub fn finalization_start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().finalization_start_time
    }

    #[must_use]
    pub fn last_self_healing_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_self_healing_time
    }

    #[must_use]
    pub fn self_healing_counter(&self) -> u32 {
        self.self_healing_counter.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state().is_complete()
    }

    #[must_use]
    pub fn was_self_healing_required(&self) -> bool {
        self.self_healing_counter() > 0
    }

    #[must_use]
    pub fn last_rejection(&self) -> Option<StartupRejection> {
        self.inner.lock().last_rejection.clone()
    }

    /// True once startup was turned down for a reason other than gating.
    #[must_use]
    pub fn was_rejected_by_container(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ExperimentState::Created
            && inner
                .last_rejection
                .as_ref()
                .is_some_and(|r| r.kind == RejectionKind::Container)
    }

    #[must_use]
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.inner.lock().transitions.clone()
    }

    /// Correlation tags for the current step.
    #[must_use]
    pub fn diagnostic_context(&self) -> DiagnosticContext {
        let ctx = DiagnosticContext::new(
            self.container.platform_type(),
            &self.id,
            self.container.identity(),
        );
        match self.action_name() {
            Some(name) => ctx.with_action(&name),
            None => ctx,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ExperimentSnapshot {
        let inner = self.inner.lock();
        ExperimentSnapshot {
            id: self.id.clone(),
            platform: self.container.platform_type().to_string(),
            container: self.container.identity().to_string(),
            aggregation_id: self.container.aggregation_identifier().to_string(),
            experiment_type: inner.experiment_type,
            state: inner.state,
            action: inner.action.as_ref().map(|a| a.name().to_string()),
            specific_method: self.specific_method.clone(),
            created_at: inner.created_at,
            start_time: inner.start_time,
            end_time: inner.end_time,
            finalization_start_time: inner.finalization_start_time,
            last_self_healing_time: inner.last_self_healing_time,
            self_healing_attempts: self.self_healing_counter(),
            last_rejection: inner.last_rejection.clone(),
            transitions: inner.transitions.clone(),
        }
    }

    // ──── gating & timing queries ────

    /// Holiday, then working hours, then admin state. Returns the first
    /// reason that applies.
    #[must_use]
    pub fn cannot_run_experiments_now(&self) -> Option<String> {
        let c = &self.collaborators;
        if c.holidays.is_holiday() {
            Some("Cannot start an experiment right now. Enjoy the holiday".to_string())
        } else if c.holidays.is_outside_working_hours() {
            Some("Cannot start an experiment right now. Come back during working hours".to_string())
        } else if !c.admin.can_run_experiments() {
            Some(format!(
                "Cannot start an experiment right now. Current admin state is {}",
                c.admin.admin_state()
            ))
        } else {
            None
        }
    }

    fn start_or_created(&self) -> DateTime<Utc> {
        let inner = self.inner.lock();
        inner.start_time.unwrap_or(inner.created_at)
    }

    #[must_use]
    pub fn is_below_minimum_duration(&self) -> bool {
        let start = self.start_or_created();
        self.now() < after(start, self.policy.minimum_duration)
    }

    #[must_use]
    pub fn is_over_duration(&self) -> bool {
        if self.collaborators.admin.must_run_self_healing() {
            return true;
        }
        let start = self.start_or_created();
        self.now() > after(start, self.policy.maximum_duration)
    }

    /// Admin allows remediation and the container's minimum interval has
    /// elapsed since the previous attempt.
    #[must_use]
    pub fn can_run_self_healing(&self) -> bool {
        if !self.collaborators.admin.can_run_self_healing() {
            return false;
        }
        let interval = self.container.minimum_self_healing_interval();
        self.last_self_healing_time()
            .is_none_or(|last| self.now() >= after(last, interval))
    }

    /// Prefer the action's own probe, then the container's; anything
    /// ambiguous reads as RUNNING_EXPERIMENT.
    #[must_use]
    pub fn check_container_health(&self, ctx: &DiagnosticContext) -> ContainerHealth {
        if self.is_below_minimum_duration() {
            return ContainerHealth::RunningExperiment;
        }
        let (hook, experiment_type, start) = {
            let inner = self.inner.lock();
            (
                inner.hooks.health_check.clone(),
                inner.experiment_type,
                inner.start_time.unwrap_or(inner.created_at),
            )
        };
        if let Some(hook) = hook {
            let probed = contain_panic(
                || hook(start),
                |details| ChaosError::HealthProbe { details },
            );
            match probed {
                Ok(health) => return health,
                Err(e) => eprintln!("[CHX-EXPERIMENT] {ctx} custom health check failed: {e}"),
            }
        }
        self.container
            .container_health(experiment_type)
            .unwrap_or_else(|e| {
                eprintln!("[CHX-EXPERIMENT] {ctx} container health check failed: {e}");
                ContainerHealth::RunningExperiment
            })
    }

    // ──── transitions ────

    /// CREATED -> STARTING. Rejections leave the state unchanged.
    pub fn start_experiment(&self, ctx: &DiagnosticContext) -> Result<()> {
        if let Some(reason) = self.cannot_run_experiments_now() {
            return Err(self.reject(RejectionKind::Gated, reason));
        }

        let experiment_type = self.experiment_type();
        let selected = select_action(
            &self.container,
            self.collaborators.scripts.as_ref(),
            SelectionCriteria {
                experiment_type,
                preferred: self.policy.preferred_action.as_deref(),
                specific: self.specific_method.as_deref(),
            },
        );
        let action = match selected {
            Ok(Some(action)) => action,
            Ok(None) => {
                return Err(self.reject(
                    RejectionKind::Container,
                    format!("no experiment method available for {experiment_type}"),
                ));
            }
            Err(e) => {
                self.reject(RejectionKind::Container, e.to_string());
                return Err(e);
            }
        };
        let experiment_type = action.experiment_type();

        match self.container.container_health(experiment_type) {
            Ok(ContainerHealth::Normal) => {}
            Ok(health) => {
                return Err(self.reject(
                    RejectionKind::Container,
                    format!("container is already in an abnormal state ({health})"),
                ));
            }
            Err(e) => {
                return Err(self.reject(
                    RejectionKind::Container,
                    format!("container health could not be read: {e}"),
                ));
            }
        }
        if !self.container.supports_experiment_type(experiment_type) {
            return Err(self.reject(
                RejectionKind::Container,
                format!("container does not support {experiment_type} experiments"),
            ));
        }

        let ctx = ctx.with_action(action.name());
        let submitted_at = self.now();
        let pending = self.submit_startup(&action, experiment_type, submitted_at);
        {
            let mut inner = self.inner.lock();
            inner.experiment_type = experiment_type;
            inner.action = Some(action);
            inner.pending = Some(pending);
            inner.start_time = Some(submitted_at);
            inner.last_rejection = None;
        }
        self.set_state(&ctx, ExperimentState::Starting, "fault injection submitted");
        self.notify(&ctx, NotificationLevel::Warn, STARTING_NEW_EXPERIMENT, String::new());
        Ok(())
    }

    fn submit_startup(
        &self,
        action: &ExperimentAction,
        experiment_type: ExperimentType,
        submitted_at: DateTime<Utc>,
    ) -> PendingStartup<InjectedFault> {
        let action = action.clone();
        let container = Arc::clone(&self.container);
        let clock = Arc::clone(&self.collaborators.clock);
        let id = self.id.clone();
        let short_id: String = self.id.chars().take(8).collect();
        PendingStartup::spawn(
            format!("chaos-start-{short_id}"),
            submitted_at,
            move |cancel| {
                container.start_experiment(&id)?;
                let hooks = action.perform(&FaultRequest {
                    experiment_id: &id,
                    experiment_type,
                    cancel,
                })?;
                Ok(InjectedFault {
                    hooks,
                    completed_at: clock.now(),
                })
            },
        )
        .unwrap_or_else(|e| PendingStartup::ready(submitted_at, Err(e)))
    }

    /// STARTING -> STARTED or FAILED once the injection has finished.
    pub fn confirm_startup_complete(&self, ctx: &DiagnosticContext) {
        let Some(pending) = self.inner.lock().pending.take() else {
            self.fail(ctx, "no pending startup to confirm");
            return;
        };

        match pending.poll() {
            StartupPoll::Ready(Ok(injected)) => {
                {
                    let mut inner = self.inner.lock();
                    inner.hooks = injected.hooks;
                    inner.start_time = Some(injected.completed_at);
                }
                self.set_state(ctx, ExperimentState::Started, "fault injection completed");
            }
            StartupPoll::Ready(Err(e)) => {
                self.notify(ctx, NotificationLevel::Error, FAILED_TO_START_EXPERIMENT, e.to_string());
                self.fail(ctx, &e.to_string());
            }
            StartupPoll::Pending => {
                let deadline = after(pending.submitted_at(), self.policy.maximum_duration);
                if self.now() >= deadline {
                    pending.interrupt();
                    let e = ChaosError::StartupInterrupted {
                        details: "startup did not complete within the maximum duration"
                            .to_string(),
                    };
                    self.notify(ctx, NotificationLevel::Error, FAILED_TO_START_EXPERIMENT, e.to_string());
                    self.fail(ctx, &e.to_string());
                } else {
                    self.inner.lock().pending = Some(pending);
                }
            }
        }
    }

    /// STARTED -> STARTED, FINALIZING, SELF_HEALING or FAILED.
    pub fn evaluate_running_experiment(&self, ctx: &DiagnosticContext) {
        match self.check_container_health(ctx) {
            ContainerHealth::Normal => {
                let now = self.now();
                let first_normal = *self
                    .inner
                    .lock()
                    .finalization_start_time
                    .get_or_insert(now);
                if now >= after(first_normal, self.policy.finalization_duration) {
                    self.set_state(ctx, ExperimentState::Finalizing, "container healthy");
                }
            }
            ContainerHealth::DoesNotExist => {
                let e = ChaosError::ContainerVanished {
                    container: self.container.identity().to_string(),
                };
                self.notify(ctx, NotificationLevel::Error, "Experiment failed", e.to_string());
                self.fail(ctx, &e.to_string());
            }
            ContainerHealth::RunningExperiment => {
                if self.is_over_duration() {
                    self.set_state(
                        ctx,
                        ExperimentState::SelfHealing,
                        "container not healthy within experiment duration",
                    );
                }
            }
        }
    }

    /// SELF_HEALING -> STARTED or FAILED.
    pub fn call_self_healing(&self, ctx: &DiagnosticContext) {
        if !self.is_over_duration() {
            self.set_state(ctx, ExperimentState::Started, "back within experiment duration");
            return;
        }
        if !self.collaborators.admin.can_run_self_healing() {
            self.notify(
                ctx,
                NotificationLevel::Warn,
                "Self healing disabled due admin state",
                format!("admin state is {}", self.collaborators.admin.admin_state()),
            );
            self.set_state(ctx, ExperimentState::Started, "self-healing disallowed by admin");
            return;
        }
        if !self.can_run_self_healing() {
            eprintln!("[CHX-EXPERIMENT] WARNING: {ctx} self-healing ran too recently, deferring");
            self.set_state(ctx, ExperimentState::Started, "self-healing backoff");
            return;
        }

        let max = self.policy.max_self_healing_retries;
        if self.self_healing_counter() > max {
            let e = ChaosError::RetryBudgetExhausted {
                retries: self.self_healing_counter(),
            };
            self.notify(ctx, NotificationLevel::Error, MAXIMUM_SELF_HEALING_RETRIES_REACHED, e.to_string());
            self.fail(ctx, &e.to_string());
            return;
        }

        let attempt = self.self_healing_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify(
            ctx,
            NotificationLevel::Warn,
            format!("Running self healing for the {attempt} time."),
            String::new(),
        );
        let hook = self.inner.lock().hooks.self_healing.clone();
        let outcome = hook.map_or_else(
            || {
                Err(ChaosError::SelfHealing {
                    details: "no self-healing method bound".to_string(),
                })
            },
            |heal| contain_panic(|| heal(), |details| ChaosError::SelfHealing { details }),
        );
        // Stamped after every attempt, including one that panicked.
        self.inner.lock().last_self_healing_time = Some(self.now());

        let error = outcome.err().map(|e| e.to_string());
        if let Some(message) = &error {
            self.notify(ctx, NotificationLevel::Error, SELF_HEALING_ERROR, message.clone());
        }
        self.collaborators
            .activity
            .send(ActivityEvent::SelfHealingAttempt {
                context: ctx.clone(),
                attempt,
                error,
            });
        self.set_state(ctx, ExperimentState::Started, format!("self-healing attempt {attempt}"));
    }

    /// FINALIZING -> FINISHED or FAILED.
    pub fn call_finalize(&self, ctx: &DiagnosticContext) {
        let Some(finalizer) = self.inner.lock().hooks.finalizer.clone() else {
            self.set_state(ctx, ExperimentState::Finished, "no finalizer bound");
            return;
        };
        self.notify(ctx, NotificationLevel::Warn, "Running experiment finalization call", String::new());
        match contain_panic(|| finalizer(), |details| ChaosError::Finalization { details }) {
            Ok(()) => self.set_state(ctx, ExperimentState::Finished, "finalizer completed"),
            Err(e) => {
                let e = match e {
                    err @ ChaosError::Finalization { .. } => err,
                    other => ChaosError::Finalization {
                        details: other.to_string(),
                    },
                };
                self.notify(ctx, NotificationLevel::Error, "Experiment finalization failed", e.to_string());
                self.fail(ctx, &e.to_string());
            }
        }
    }

    /// Terminal housekeeping for FINISHED. Repeated calls do nothing.
    pub fn close_finished_experiment(&self, ctx: &DiagnosticContext) {
        let Some(duration) = self.close_once(ExperimentState::Finished) else {
            return;
        };
        self.notify(
            ctx,
            NotificationLevel::Good,
            "Experiment finished",
            format!(
                "Experiment finished. Duration: {} s, SelfHealing Attempts: {}",
                duration.num_seconds(),
                self.self_healing_counter()
            ),
        );
        self.report_completion(ctx, ExperimentState::Finished);
    }

    /// Terminal housekeeping for FAILED. Repeated calls do nothing.
    pub fn close_failed_experiment(&self, ctx: &DiagnosticContext) {
        let Some(duration) = self.close_once(ExperimentState::Failed) else {
            return;
        };
        self.notify(
            ctx,
            NotificationLevel::Error,
            "Experiment failed",
            format!("Experiment failed after {} s", duration.num_seconds()),
        );
        self.report_completion(ctx, ExperimentState::Failed);
    }

    /// Close whichever terminal state the experiment is in.
    pub fn close(&self, ctx: &DiagnosticContext) {
        match self.state() {
            ExperimentState::Finished => self.close_finished_experiment(ctx),
            ExperimentState::Failed => self.close_failed_experiment(ctx),
            _ => {}
        }
    }

    // ──── internals ────

    fn now(&self) -> DateTime<Utc> {
        self.collaborators.clock.now()
    }

    /// Marks the experiment closed if it is in `expected`; returns its total
    /// duration the first time only.
    fn close_once(&self, expected: ExperimentState) -> Option<TimeDelta> {
        let mut inner = self.inner.lock();
        if inner.state != expected || inner.closed {
            return None;
        }
        inner.closed = true;
        let now = self.collaborators.clock.now();
        let end = *inner.end_time.get_or_insert(now);
        let start = inner.start_time.unwrap_or(inner.created_at);
        Some(end - start)
    }

    fn report_completion(&self, ctx: &DiagnosticContext, state: ExperimentState) {
        self.collaborators
            .activity
            .send(ActivityEvent::ExperimentCompleted {
                context: ctx.clone(),
                state,
                self_healing_attempts: self.self_healing_counter(),
            });
    }

    fn reject(&self, kind: RejectionKind, reason: String) -> ChaosError {
        self.inner.lock().last_rejection = Some(StartupRejection {
            kind,
            reason: reason.clone(),
        });
        ChaosError::StartupRejected { reason }
    }

    fn fail(&self, ctx: &DiagnosticContext, reason: &str) {
        self.set_state(ctx, ExperimentState::Failed, reason);
    }

    /// Move along one edge of the lifecycle graph. Anything else is refused.
    fn set_state(&self, ctx: &DiagnosticContext, next: ExperimentState, reason: impl Into<String>) {
        let reason = reason.into();
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            if from == next {
                return;
            }
            if !from.can_transition_to(next) {
                eprintln!("[CHX-EXPERIMENT] {ctx} refused transition {from} -> {next}: {reason}");
                return;
            }
            let now = self.collaborators.clock.now();
            inner.state = next;
            if next.is_complete() && inner.end_time.is_none() {
                inner.end_time = Some(now);
            }
            inner.transitions.push(TransitionRecord {
                from,
                to: next,
                at: now,
                reason: reason.clone(),
            });
            from
        };
        self.collaborators.activity.send(ActivityEvent::Transition {
            context: ctx.clone(),
            from,
            to: next,
            reason,
        });
    }

    fn notify(
        &self,
        ctx: &DiagnosticContext,
        level: NotificationLevel,
        title: impl Into<String>,
        message: String,
    ) {
        let notification = ChaosNotification::new(ctx, level, title, message).in_state(self.state());
        self.collaborators
            .notifications
            .send(NotificationEvent::Experiment(notification));
    }
}

/// Run a user-supplied hook, turning a panic into the error built by `on_panic`.
fn contain_panic<T>(
    hook: impl FnOnce() -> Result<T>,
    on_panic: impl FnOnce(String) -> ChaosError,
) -> Result<T> {
    catch_unwind(AssertUnwindSafe(hook))
        .unwrap_or_else(|payload| Err(on_panic(format!("hook panicked: {}", panic_message(&*payload)))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}

/// Random RFC 4122 version 4 identifier.
fn new_experiment_id() -> String {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
