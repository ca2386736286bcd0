//! Owner of the experiment population.
//!
//! Two entry points run on their own cadence: [`ExperimentManager::schedule_experiments`]
//! creates cohorts and [`ExperimentManager::update_experiment_status`] advances
//! every live experiment by at most one transition. Both serialize on the
//! population lock. A new cohort is only created while the population is
//! empty unless the caller forces it.

#![allow(missing_docs)]

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::core::clock::after;
use crate::core::errors::{ChaosError, Result};
use crate::daemon::notifications::{ChaosNotification, NotificationEvent, NotificationLevel};
use crate::experiment::FAILED_TO_START_EXPERIMENT;
use crate::experiment::lifecycle::{Collaborators, Experiment, ExperimentPolicy, RejectionKind};
use crate::experiment::pool::{EvaluationPool, MAX_WORKERS, PassReport};
use crate::experiment::state::ExperimentState;
use crate::experiment::suite::ExperimentSuite;
use crate::logger::activity::ActivityEvent;
use crate::platform::container::Container;
use crate::platform::registry::{Platform, PlatformManager};

/// Upper bound on filter passes for a forced schedule.
const FORCED_FILTER_ATTEMPTS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub policy: ExperimentPolicy,
    pub max_workers: usize,
    /// Quiet period after a cohort completes; forced runs ignore it.
    pub backoff_period: TimeDelta,
    /// When false only forced or targeted runs create experiments.
    pub automated_mode: bool,
    /// Containers per aggregation group that a suite must leave untouched.
    pub minimum_survivors: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            policy: ExperimentPolicy::default(),
            max_workers: MAX_WORKERS,
            backoff_period: TimeDelta::minutes(15),
            automated_mode: true,
            minimum_survivors: 1,
        }
    }
}

/// Outcome of one status tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub evaluated: usize,
    pub panicked: usize,
    /// Experiments dropped because their container refused to start them.
    pub discarded: usize,
    /// The population emptied during this tick.
    pub cohort_completed: bool,
}

#[derive(Default)]
struct Population {
    experiments: Vec<Arc<Experiment>>,
    last_completed: Option<DateTime<Utc>>,
}

pub struct ExperimentManager {
    platforms: Arc<dyn PlatformManager>,
    collaborators: Collaborators,
    settings: RwLock<ManagerSettings>,
    population: Mutex<Population>,
    pool: EvaluationPool,
    history: Mutex<BTreeMap<Reverse<DateTime<Utc>>, Vec<ExperimentSuite>>>,
}

impl std::fmt::Debug for ExperimentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentManager")
            .field("active", &self.population.lock().experiments.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ExperimentManager {
    #[must_use]
    pub fn new(
        platforms: Arc<dyn PlatformManager>,
        collaborators: Collaborators,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            platforms,
            pool: EvaluationPool::new(settings.max_workers),
            settings: RwLock::new(settings),
            collaborators,
            population: Mutex::new(Population::default()),
            history: Mutex::new(BTreeMap::new()),
        }
    }

    /// Replace timing and policy settings. The worker cap is fixed at
    /// construction.
    pub fn update_settings(&self, settings: ManagerSettings) {
        *self.settings.write() = settings;
    }

    #[must_use]
    pub fn settings(&self) -> ManagerSettings {
        self.settings.read().clone()
    }

    // ──── scheduling ────

    /// Create a cohort on the next eligible platform.
    ///
    /// Returns nothing while any experiment is outstanding unless `force`.
    /// A forced run also ignores automated mode, the backoff period, and the
    /// platform clock, and re-filters the roster until a container volunteers.
    pub fn schedule_experiments(&self, force: bool) -> Vec<Arc<Experiment>> {
        let mut population = self.population.lock();
        if !force {
            if !population.experiments.is_empty() {
                return Vec::new();
            }
            let settings = self.settings.read();
            if !settings.automated_mode {
                return Vec::new();
            }
            if let Some(done) = population.last_completed
                && self.collaborators.clock.now() < after(done, settings.backoff_period)
            {
                return Vec::new();
            }
        }

        let Some(platform) = self.platforms.next_platform_for_experiment(force) else {
            return Vec::new();
        };
        platform.schedule_experiment();
        let roster = platform.generate_experiment_roster();
        if roster.is_empty() {
            return Vec::new();
        }

        let mut selected = self.filter_experimentable(&roster);
        let mut attempts = 1;
        while force && selected.is_empty() && attempts < FORCED_FILTER_ATTEMPTS {
            selected = self.filter_experimentable(&roster);
            attempts += 1;
        }
        if selected.is_empty() {
            if force {
                eprintln!(
                    "[CHX-MANAGER] WARNING: no container on {} volunteered after {attempts} passes",
                    platform.platform_type()
                );
            }
            return Vec::new();
        }

        let policy = self.settings.read().policy.clone();
        let created: Vec<Arc<Experiment>> = selected
            .into_iter()
            .map(|container| {
                Arc::new(Experiment::new(container, policy.clone(), self.collaborators.clone()))
            })
            .collect();
        self.announce_cohort(platform.as_ref(), created.len(), force);
        population.experiments.extend(created.iter().cloned());
        created
    }

    /// Run an operator-supplied suite. Refused while any experiment is
    /// outstanding.
    pub fn schedule_experiment_suite(&self, suite: &ExperimentSuite) -> Result<Vec<Arc<Experiment>>> {
        let mut population = self.population.lock();
        if !population.experiments.is_empty() {
            return Err(ChaosError::AnotherExperimentInProgress);
        }
        let platform = self
            .platforms
            .platform_by_type(&suite.platform_type)
            .ok_or_else(|| ChaosError::PlatformDoesNotExist {
                platform: suite.platform_type.clone(),
            })?;

        let (policy, survivors) = {
            let settings = self.settings.read();
            (settings.policy.clone(), settings.minimum_survivors)
        };
        let roster = platform.roster();
        let mut created = Vec::with_capacity(suite.experiment_count());
        for (aggregation_id, methods) in &suite.aggregation_map {
            let mut members: Vec<Arc<dyn Container>> = roster
                .iter()
                .filter(|c| c.aggregation_identifier() == aggregation_id)
                .cloned()
                .collect();
            let available = members.len().saturating_sub(survivors);
            if available < methods.len() {
                return Err(ChaosError::NotEnoughContainers {
                    platform: format!("{}/{aggregation_id}", suite.platform_type),
                    requested: methods.len(),
                    available,
                });
            }
            members.shuffle(&mut rand::rng());
            for (container, method) in members.into_iter().zip(methods) {
                created.push(Arc::new(
                    Experiment::new(container, policy.clone(), self.collaborators.clone())
                        .with_specific_method(method.clone()),
                ));
            }
        }

        self.announce_cohort(platform.as_ref(), created.len(), true);
        population.experiments.extend(created.iter().cloned());
        Ok(created)
    }

    /// Start an experiment on every container, on any platform, whose
    /// identity matches `identifier`. Bypasses scheduling entirely.
    pub fn experiment_container_id(&self, identifier: &str) -> Vec<Arc<Experiment>> {
        let mut population = self.population.lock();
        let policy = self.settings.read().policy.clone();
        let created: Vec<Arc<Experiment>> = self
            .platforms
            .platforms()
            .iter()
            .flat_map(|platform| platform.roster())
            .filter(|container| container.matches_identity(identifier))
            .map(|container| {
                Arc::new(Experiment::new(container, policy.clone(), self.collaborators.clone()))
            })
            .collect();
        population.experiments.extend(created.iter().cloned());
        created
    }

    fn filter_experimentable(&self, roster: &[Arc<dyn Container>]) -> Vec<Arc<dyn Container>> {
        let chosen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let jobs = roster
            .iter()
            .enumerate()
            .map(|(index, container)| {
                let container = Arc::clone(container);
                let chosen = Arc::clone(&chosen);
                Box::new(move || {
                    if container.can_experiment() {
                        chosen.lock().push(index);
                    }
                }) as Box<dyn FnOnce() + Send>
            })
            .collect();
        if let Err(e) = self.pool.run_pass(jobs) {
            eprintln!("[CHX-MANAGER] roster filter pass failed: {e}");
            return Vec::new();
        }
        let mut indices = std::mem::take(&mut *chosen.lock());
        indices.sort_unstable();
        indices.into_iter().map(|i| Arc::clone(&roster[i])).collect()
    }

    fn announce_cohort(&self, platform: &dyn Platform, experiments: usize, forced: bool) {
        eprintln!(
            "[CHX-MANAGER] scheduled {experiments} experiments on {}",
            platform.platform_type()
        );
        self.collaborators.activity.send(ActivityEvent::CohortScheduled {
            platform: platform.platform_type().to_string(),
            experiments,
            forced,
        });
        self.collaborators
            .notifications
            .send(NotificationEvent::CohortScheduled {
                platform: platform.platform_type().to_string(),
                experiments,
            });
    }

    // ──── status ────

    /// Advance every experiment by one step, then clear the population if
    /// all of them are complete.
    pub fn update_experiment_status(&self) -> StatusReport {
        let mut population = self.population.lock();
        if population.experiments.is_empty() {
            return StatusReport::default();
        }

        let pass = self.evaluate_experiments(&population.experiments);
        let mut report = StatusReport {
            evaluated: pass.completed + pass.panicked,
            panicked: pass.panicked,
            ..StatusReport::default()
        };

        let before = population.experiments.len();
        population
            .experiments
            .retain(|experiment| !self.discard_if_rejected(experiment));
        report.discarded = before - population.experiments.len();

        if population.experiments.iter().all(|e| e.is_complete()) {
            let finished = std::mem::take(&mut population.experiments);
            if !finished.is_empty() {
                let now = self.collaborators.clock.now();
                for experiment in &finished {
                    experiment.close(&experiment.diagnostic_context());
                }
                self.archive(now, &finished);
                population.last_completed = Some(now);
            }
            report.cohort_completed = true;
        }
        report
    }

    /// One bounded-parallel pass; each experiment gets exactly one step.
    fn evaluate_experiments(&self, experiments: &[Arc<Experiment>]) -> PassReport {
        let jobs = experiments
            .iter()
            .map(|experiment| {
                let experiment = Arc::clone(experiment);
                Box::new(move || advance_experiment(&experiment)) as Box<dyn FnOnce() + Send>
            })
            .collect();
        self.pool.run_pass(jobs).unwrap_or_else(|e| {
            eprintln!("[CHX-MANAGER] evaluation pool unavailable, evaluating inline: {e}");
            for experiment in experiments {
                advance_experiment(experiment);
            }
            PassReport {
                completed: experiments.len(),
                panicked: 0,
            }
        })
    }

    fn discard_if_rejected(&self, experiment: &Experiment) -> bool {
        if !experiment.was_rejected_by_container() {
            return false;
        }
        let ctx = experiment.diagnostic_context();
        let reason = experiment
            .last_rejection()
            .filter(|r| r.kind == RejectionKind::Container)
            .map(|r| r.reason)
            .unwrap_or_default();
        self.collaborators
            .notifications
            .send(NotificationEvent::Experiment(ChaosNotification::new(
                &ctx,
                NotificationLevel::Warn,
                FAILED_TO_START_EXPERIMENT,
                reason,
            )));
        true
    }

    fn archive(&self, at: DateTime<Utc>, experiments: &[Arc<Experiment>]) {
        let mut by_platform: BTreeMap<String, Vec<Arc<Experiment>>> = BTreeMap::new();
        for experiment in experiments {
            by_platform
                .entry(experiment.container().platform_type().to_string())
                .or_default()
                .push(Arc::clone(experiment));
        }
        let suites = by_platform
            .iter()
            .map(|(platform, members)| ExperimentSuite::from_experiments(platform, members))
            .collect();
        self.history.lock().insert(Reverse(at), suites);
    }

    // ──── queries ────

    #[must_use]
    pub fn experiments(&self) -> Vec<Arc<Experiment>> {
        self.population.lock().experiments.clone()
    }

    #[must_use]
    pub fn experiment(&self, id: &str) -> Option<Arc<Experiment>> {
        self.population
            .lock()
            .experiments
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.population.lock().experiments.is_empty()
    }

    /// Active experiments per state, every state present.
    #[must_use]
    pub fn experiment_stats(&self) -> BTreeMap<ExperimentState, usize> {
        let mut stats: BTreeMap<ExperimentState, usize> =
            ExperimentState::ALL.iter().map(|s| (*s, 0)).collect();
        for experiment in &self.population.lock().experiments {
            *stats.entry(experiment.state()).or_default() += 1;
        }
        stats
    }

    /// Archived cohorts, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<(DateTime<Utc>, ExperimentSuite)> {
        self.history
            .lock()
            .iter()
            .flat_map(|(Reverse(at), suites)| suites.iter().map(|s| (*at, s.clone())))
            .collect()
    }

    #[must_use]
    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        self.population.lock().last_completed
    }
}

/// Run the single transition matching the experiment's current state.
pub fn advance_experiment(experiment: &Experiment) {
    let ctx = experiment.diagnostic_context();
    match experiment.state() {
        ExperimentState::Created => {
            if let Err(e) = experiment.start_experiment(&ctx)
                && experiment.was_rejected_by_container()
            {
                eprintln!("[CHX-MANAGER] {ctx} startup rejected: {e}");
            }
        }
        ExperimentState::Starting => experiment.confirm_startup_complete(&ctx),
        ExperimentState::Started => experiment.evaluate_running_experiment(&ctx),
        ExperimentState::SelfHealing => experiment.call_self_healing(&ctx),
        ExperimentState::Finalizing => experiment.call_finalize(&ctx),
        ExperimentState::Finished => experiment.close_finished_experiment(&ctx),
        ExperimentState::Failed => experiment.close_failed_experiment(&ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::admin::calendar::CalendarHolidays;
    use crate::admin::state::{AdminState, AdminStateManager};
    use crate::core::clock::ManualClock;
    use crate::daemon::notifications::MemorySink;
    use crate::experiment::action::{ActionHooks, Capability};
    use crate::experiment::state::{ContainerHealth, ExperimentType};
    use crate::logger::activity::ActivityLoggerHandle;
    use crate::platform::registry::StaticPlatformManager;
    use crate::scripts::manager::ScriptManager;

    #[derive(Debug)]
    struct FakeContainer {
        id: String,
        group: String,
        platform: String,
        /// can_experiment() answers false this many times first.
        refusals: AtomicUsize,
        health: ContainerHealth,
    }

    impl FakeContainer {
        fn new(id: &str, group: &str, platform: &str) -> Self {
            Self {
                id: id.to_string(),
                group: group.to_string(),
                platform: platform.to_string(),
                refusals: AtomicUsize::new(0),
                health: ContainerHealth::Normal,
            }
        }
    }

    impl Container for FakeContainer {
        fn identity(&self) -> &str {
            &self.id
        }
        fn aggregation_identifier(&self) -> &str {
            &self.group
        }
        fn platform_type(&self) -> &str {
            &self.platform
        }
        fn container_health(&self, _: ExperimentType) -> Result<ContainerHealth> {
            Ok(self.health)
        }
        fn can_experiment(&self) -> bool {
            self.refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }
        fn minimum_self_healing_interval(&self) -> TimeDelta {
            TimeDelta::zero()
        }
        fn capabilities(&self) -> Vec<Capability> {
            vec![
                Capability::new("kill-process", ExperimentType::State, |_| Ok(ActionHooks::none())),
                Capability::new("restart", ExperimentType::State, |_| Ok(ActionHooks::none())),
            ]
        }
    }

    #[derive(Debug)]
    struct FakePlatform {
        name: String,
        containers: Vec<Arc<dyn Container>>,
        scheduled: AtomicUsize,
    }

    impl FakePlatform {
        fn new(name: &str, containers: Vec<Arc<dyn Container>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                containers,
                scheduled: AtomicUsize::new(0),
            })
        }
    }

    impl Platform for FakePlatform {
        fn platform_type(&self) -> &str {
            &self.name
        }
        fn roster(&self) -> Vec<Arc<dyn Container>> {
            self.containers.clone()
        }
        fn next_chaos_time(&self) -> DateTime<Utc> {
            DateTime::<Utc>::MIN_UTC
        }
        fn can_experiment(&self) -> bool {
            true
        }
        fn schedule_experiment(&self) {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
        admin: Arc<AdminStateManager>,
        manager: ExperimentManager,
    }

    fn quick_settings() -> ManagerSettings {
        ManagerSettings {
            policy: ExperimentPolicy {
                minimum_duration: TimeDelta::zero(),
                maximum_duration: TimeDelta::minutes(5),
                finalization_duration: TimeDelta::zero(),
                max_self_healing_retries: 2,
                preferred_action: None,
            },
            max_workers: 4,
            backoff_period: TimeDelta::minutes(15),
            automated_mode: true,
            minimum_survivors: 1,
        }
    }

    fn harness(platforms: Vec<Arc<FakePlatform>>) -> Harness {
        let platforms: Vec<Arc<dyn Platform>> = platforms
            .into_iter()
            .map(|p| p as Arc<dyn Platform>)
            .collect();
        let clock = Arc::new(ManualClock::starting_now());
        let sink = Arc::new(MemorySink::new());
        let admin = Arc::new(AdminStateManager::new(AdminState::Started, clock.clone()));
        let collaborators = Collaborators {
            notifications: sink.clone(),
            admin: admin.clone(),
            holidays: Arc::new(CalendarHolidays::always_open(clock.clone())),
            scripts: Arc::new(ScriptManager::empty()),
            clock: clock.clone(),
            activity: ActivityLoggerHandle::detached(),
        };
        let manager = ExperimentManager::new(
            Arc::new(StaticPlatformManager::new(platforms)),
            collaborators,
            quick_settings(),
        );
        Harness {
            clock,
            sink,
            admin,
            manager,
        }
    }

    fn web_platform(n: usize) -> Arc<FakePlatform> {
        FakePlatform::new(
            "fake",
            (0..n)
                .map(|i| Arc::new(FakeContainer::new(&format!("web-{i}"), "web", "fake")) as Arc<dyn Container>)
                .collect(),
        )
    }

    /// Tick until the population empties; returns the tick count.
    fn drive_to_completion(h: &Harness) -> usize {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut ticks = 0;
        while !h.manager.is_idle() && Instant::now() < deadline {
            h.manager.update_experiment_status();
            ticks += 1;
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(h.manager.is_idle(), "population did not drain");
        ticks
    }

    #[test]
    fn schedules_one_experiment_per_volunteer() {
        let platform = web_platform(3);
        let h = harness(vec![platform.clone()]);
        let created = h.manager.schedule_experiments(false);
        assert_eq!(created.len(), 3);
        assert_eq!(platform.scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(h.manager.experiments().len(), 3);
        assert!(created.iter().all(|e| e.state() == ExperimentState::Created));
    }

    #[test]
    fn single_flight_blocks_unforced_scheduling() {
        let h = harness(vec![web_platform(2)]);
        assert_eq!(h.manager.schedule_experiments(false).len(), 2);
        assert!(h.manager.schedule_experiments(false).is_empty());
        assert_eq!(h.manager.experiments().len(), 2);

        assert_eq!(h.manager.schedule_experiments(true).len(), 2);
        assert_eq!(h.manager.experiments().len(), 4);
    }

    #[test]
    fn forced_schedule_retries_until_a_container_volunteers() {
        let shy = FakeContainer::new("web-0", "web", "fake");
        shy.refusals.store(5, Ordering::SeqCst);
        let h = harness(vec![FakePlatform::new("fake", vec![Arc::new(shy)])]);
        assert_eq!(h.manager.schedule_experiments(true).len(), 1);
    }

    #[test]
    fn unforced_schedule_gives_up_after_one_pass() {
        let shy = FakeContainer::new("web-0", "web", "fake");
        shy.refusals.store(1, Ordering::SeqCst);
        let h = harness(vec![FakePlatform::new("fake", vec![Arc::new(shy)])]);
        assert!(h.manager.schedule_experiments(false).is_empty());
    }

    #[test]
    fn empty_platform_set_schedules_nothing() {
        let h = harness(Vec::new());
        assert!(h.manager.schedule_experiments(true).is_empty());
    }

    #[test]
    fn population_clears_when_every_experiment_completes() {
        let h = harness(vec![web_platform(3)]);
        h.manager.schedule_experiments(false);
        drive_to_completion(&h);

        let history = h.manager.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].1.platform_type, "fake");
        assert_eq!(history[0].1.experiment_count(), 3);

        let finished = h
            .sink
            .experiment_notifications()
            .into_iter()
            .filter(|n| n.title == "Experiment finished")
            .count();
        assert_eq!(finished, 3);
    }

    #[test]
    fn each_tick_moves_an_experiment_at_most_one_edge() {
        let h = harness(vec![web_platform(1)]);
        let experiment = h.manager.schedule_experiments(false).remove(0);
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = 0;
        while !experiment.is_complete() && Instant::now() < deadline {
            h.manager.update_experiment_status();
            let now = experiment.transitions().len();
            assert!(now - seen <= 1, "more than one transition in a tick");
            seen = now;
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(experiment.state(), ExperimentState::Finished);
    }

    #[test]
    fn backoff_period_follows_a_completed_cohort() {
        let h = harness(vec![web_platform(1)]);
        h.manager.schedule_experiments(false);
        drive_to_completion(&h);
        assert!(h.manager.last_completed().is_some());

        assert!(h.manager.schedule_experiments(false).is_empty());
        h.clock.advance(TimeDelta::minutes(16));
        assert_eq!(h.manager.schedule_experiments(false).len(), 1);
    }

    #[test]
    fn automated_mode_off_only_allows_forced_runs() {
        let h = harness(vec![web_platform(1)]);
        h.manager.update_settings(ManagerSettings {
            automated_mode: false,
            ..quick_settings()
        });
        assert!(h.manager.schedule_experiments(false).is_empty());
        assert_eq!(h.manager.schedule_experiments(true).len(), 1);
    }

    #[test]
    fn gated_experiments_wait_instead_of_being_discarded() {
        let h = harness(vec![web_platform(2)]);
        h.admin.set_state(AdminState::Paused);
        h.manager.schedule_experiments(false);
        let report = h.manager.update_experiment_status();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.discarded, 0);
        assert_eq!(h.manager.experiment_stats()[&ExperimentState::Created], 2);

        h.admin.set_state(AdminState::Started);
        h.manager.update_experiment_status();
        assert_eq!(h.manager.experiment_stats()[&ExperimentState::Starting], 2);
    }

    #[test]
    fn container_rejections_are_discarded() {
        let mut sick = FakeContainer::new("web-0", "web", "fake");
        sick.health = ContainerHealth::RunningExperiment;
        let h = harness(vec![FakePlatform::new("fake", vec![Arc::new(sick)])]);
        h.manager.schedule_experiments(false);
        let report = h.manager.update_experiment_status();
        assert_eq!(report.discarded, 1);
        assert!(report.cohort_completed);
        assert!(h.manager.is_idle());
        assert!(h.manager.history().is_empty());
        assert!(h
            .sink
            .experiment_notifications()
            .iter()
            .any(|n| n.title == FAILED_TO_START_EXPERIMENT));
    }

    #[test]
    fn targeted_run_creates_one_experiment_per_matching_container() {
        let a = FakePlatform::new(
            "alpha",
            vec![Arc::new(FakeContainer::new("shared", "g", "alpha")) as Arc<dyn Container>],
        );
        let b = FakePlatform::new(
            "beta",
            vec![
                Arc::new(FakeContainer::new("shared", "g", "beta")) as Arc<dyn Container>,
                Arc::new(FakeContainer::new("other", "g", "beta")),
            ],
        );
        let h = harness(vec![a, b]);
        let created = h.manager.experiment_container_id("shared");
        assert_eq!(created.len(), 2);
        assert_ne!(created[0].id(), created[1].id());
        let mut platforms: Vec<&str> = created.iter().map(|e| e.container().platform_type()).collect();
        platforms.sort_unstable();
        assert_eq!(platforms, vec!["alpha", "beta"]);
        assert!(h.manager.experiment_container_id("missing").is_empty());
    }

    #[test]
    fn suite_errors() {
        let h = harness(vec![web_platform(2)]);

        let unknown = ExperimentSuite::new("nope").with_method("web", "kill-process");
        assert_eq!(
            h.manager.schedule_experiment_suite(&unknown).unwrap_err().code(),
            "CHX-2102"
        );

        let greedy = ExperimentSuite::new("fake")
            .with_method("web", "kill-process")
            .with_method("web", "restart");
        let err = h.manager.schedule_experiment_suite(&greedy).unwrap_err();
        assert!(matches!(
            err,
            ChaosError::NotEnoughContainers {
                requested: 2,
                available: 1,
                ..
            }
        ));

        let fair = ExperimentSuite::new("fake").with_method("web", "restart");
        let created = h.manager.schedule_experiment_suite(&fair).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].specific_method(), Some("restart"));

        assert_eq!(
            h.manager.schedule_experiment_suite(&fair).unwrap_err().code(),
            "CHX-2101"
        );
    }

    #[test]
    fn suite_experiments_run_the_requested_method() {
        let h = harness(vec![web_platform(3)]);
        let suite = ExperimentSuite::new("fake").with_method("web", "restart");
        let experiment = h.manager.schedule_experiment_suite(&suite).unwrap().remove(0);
        h.manager.update_experiment_status();
        assert_eq!(experiment.action_name().as_deref(), Some("restart"));
        drive_to_completion(&h);
        assert_eq!(h.manager.history()[0].1, suite);
    }

    #[test]
    fn stats_cover_every_state() {
        let h = harness(vec![web_platform(2)]);
        let stats = h.manager.experiment_stats();
        assert_eq!(stats.len(), ExperimentState::ALL.len());
        assert!(stats.values().all(|n| *n == 0));

        h.manager.schedule_experiments(false);
        assert_eq!(h.manager.experiment_stats()[&ExperimentState::Created], 2);
    }

    #[test]
    fn lookup_by_id() {
        let h = harness(vec![web_platform(1)]);
        let created = h.manager.schedule_experiments(false);
        let id = created[0].id().to_string();
        assert!(h.manager.experiment(&id).is_some());
        assert!(h.manager.experiment("nope").is_none());
    }
}
