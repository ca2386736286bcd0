#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use chaos_engine::admin::calendar::CalendarHolidays;
use chaos_engine::admin::state::{AdminState, AdminStateManager};
use chaos_engine::core::clock::ManualClock;
use chaos_engine::core::errors::{ChaosError, Result};
use chaos_engine::daemon::notifications::MemorySink;
use chaos_engine::experiment::action::{ActionHooks, Capability};
use chaos_engine::experiment::lifecycle::{Collaborators, ExperimentPolicy};
use chaos_engine::experiment::manager::{ExperimentManager, ManagerSettings};
use chaos_engine::experiment::state::{ContainerHealth, ExperimentType};
use chaos_engine::logger::activity::ActivityLoggerHandle;
use chaos_engine::platform::container::Container;
use chaos_engine::platform::registry::{Platform, StaticPlatformManager};
use chaos_engine::scripts::manager::ScriptManager;

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_chaosd") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "chaosd.exe" } else { "chaosd" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve chaosd binary path for integration test"),
    }
}

/// Run the binary with `HOME` pointed at `home` so defaults never touch the
/// real user directories.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("chaosd-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("CHAOSD_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute chaosd command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── engine fakes ────────────────────

/// Container whose probe replays a health sequence; the last reading repeats.
#[derive(Debug)]
pub struct FakeContainer {
    pub id: String,
    pub group: String,
    pub platform: String,
    health: Mutex<VecDeque<ContainerHealth>>,
    pub heal_calls: Arc<AtomicUsize>,
    pub heal_fails: bool,
    pub heal_panics: bool,
    pub interval: TimeDelta,
}

impl FakeContainer {
    pub fn new(id: &str, platform: &str) -> Self {
        Self {
            id: id.to_string(),
            group: id.to_string(),
            platform: platform.to_string(),
            health: Mutex::new(VecDeque::from([ContainerHealth::Normal])),
            heal_calls: Arc::new(AtomicUsize::new(0)),
            heal_fails: false,
            heal_panics: false,
            interval: TimeDelta::zero(),
        }
    }

    #[must_use]
    pub fn with_health(self, readings: &[ContainerHealth]) -> Self {
        *self.health.lock() = readings.iter().copied().collect();
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    #[must_use]
    pub fn failing_heal(mut self) -> Self {
        self.heal_fails = true;
        self
    }

    #[must_use]
    pub fn panicking_heal(mut self) -> Self {
        self.heal_panics = true;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: TimeDelta) -> Self {
        self.interval = interval;
        self
    }

    pub fn heal_count(&self) -> usize {
        self.heal_calls.load(Ordering::SeqCst)
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
        let mut queue = self.health.lock();
        let next = queue.front().copied().unwrap_or(ContainerHealth::Normal);
        if queue.len() > 1 {
            queue.pop_front();
        }
        Ok(next)
    }
    fn can_experiment(&self) -> bool {
        true
    }
    fn minimum_self_healing_interval(&self) -> TimeDelta {
        self.interval
    }
    fn capabilities(&self) -> Vec<Capability> {
        let calls = Arc::clone(&self.heal_calls);
        let fails = self.heal_fails;
        let panics = self.heal_panics;
        vec![Capability::new("kill-process", ExperimentType::State, move |_| {
            let calls = Arc::clone(&calls);
            Ok(ActionHooks::none().with_self_healing(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                if panics {
                    panic!("remediation crashed");
                }
                if fails {
                    Err(ChaosError::SelfHealing {
                        details: "remediation did not help".to_string(),
                    })
                } else {
                    Ok(())
                }
            }))
        })]
    }
}

/// Always-due platform over a fixed roster.
#[derive(Debug)]
pub struct FakePlatform {
    pub name: String,
    pub containers: Vec<Arc<dyn Container>>,
}

impl FakePlatform {
    pub fn new(name: &str, containers: Vec<Arc<dyn Container>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            containers,
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
    fn schedule_experiment(&self) {}
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MemorySink>,
    pub admin: Arc<AdminStateManager>,
    pub manager: ExperimentManager,
}

pub fn policy(minimum: TimeDelta, finalization: TimeDelta, retries: u32) -> ExperimentPolicy {
    ExperimentPolicy {
        minimum_duration: minimum,
        maximum_duration: TimeDelta::minutes(5),
        finalization_duration: finalization,
        max_self_healing_retries: retries,
        preferred_action: None,
    }
}

pub fn harness_with(
    platforms: Vec<Arc<FakePlatform>>,
    policy: ExperimentPolicy,
    activity: ActivityLoggerHandle,
) -> Harness {
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
        activity,
    };
    let settings = ManagerSettings {
        policy,
        max_workers: 4,
        ..ManagerSettings::default()
    };
    let manager = ExperimentManager::new(
        Arc::new(StaticPlatformManager::new(platforms)),
        collaborators,
        settings,
    );
    Harness {
        clock,
        sink,
        admin,
        manager,
    }
}

pub fn harness(platforms: Vec<Arc<FakePlatform>>, policy: ExperimentPolicy) -> Harness {
    harness_with(platforms, policy, ActivityLoggerHandle::detached())
}

/// Tick until the population drains, advancing the clock by `step` per tick.
pub fn drive(h: &Harness, step: TimeDelta) -> usize {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut ticks = 0;
    while !h.manager.is_idle() && Instant::now() < deadline {
        h.manager.update_experiment_status();
        h.clock.advance(step);
        ticks += 1;
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(h.manager.is_idle(), "population did not drain");
    ticks
}

/// Tick until `done` holds or ten seconds pass.
pub fn tick_until(h: &Harness, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() && Instant::now() < deadline {
        h.manager.update_experiment_status();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(done(), "condition not reached before deadline");
}
