//! Engine wiring and the daemon loop.
//!
//! [`Engine`] builds every collaborator from configuration and owns the
//! experiment manager. [`ChaosDaemon`] drives that engine: a scheduling tick
//! and a status tick on their own intervals, plus signal-driven reload,
//! forced cohorts and shutdown.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::admin::calendar::{CalendarHolidays, HolidayManager};
use crate::admin::state::{AdminManager, AdminStateManager};
use crate::core::clock::{Clock, SystemClock, seconds};
use crate::core::config::Config;
use crate::core::errors::{ChaosError, Result};
use crate::daemon::notifications::{NotificationEvent, NotificationManager, NotificationSink};
use crate::daemon::signals::{ShutdownCoordinator, ShutdownTask, SignalHandler};
use crate::experiment::lifecycle::{Collaborators, Experiment};
use crate::experiment::manager::{ExperimentManager, StatusReport};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use crate::platform::inventory::build_platforms;
use crate::platform::registry::{PlatformManager, StaticPlatformManager};
use crate::scripts::manager::{ScriptManager, ScriptRegistry};

/// Longest sleep between loop iterations, so signals are noticed promptly.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(250);

// ──────────────────── engine ────────────────────

/// Every runtime collaborator, wired explicitly from one [`Config`].
pub struct Engine {
    pub manager: Arc<ExperimentManager>,
    pub platforms: Arc<StaticPlatformManager>,
    pub admin: Arc<AdminStateManager>,
    pub calendar: Arc<CalendarHolidays>,
    pub scripts: Arc<ScriptManager>,
    pub clock: Arc<dyn Clock>,
    notifications: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("manager", &self.manager)
            .field("platforms", &self.platforms.len())
            .field("admin", &self.admin.admin_state())
            .field("scripts", &self.scripts.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn build(
        config: &Config,
        notifications: Arc<dyn NotificationSink>,
        activity: ActivityLoggerHandle,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let admin = Arc::new(AdminStateManager::new(
            config.admin.initial_state,
            Arc::clone(&clock),
        ));
        let calendar = Arc::new(CalendarHolidays::from_config(
            &config.calendar,
            Arc::clone(&clock),
        )?);
        let scripts = Arc::new(load_scripts(config)?);
        let default_interval = seconds(
            config.experiment.self_healing_interval_minutes.saturating_mul(60),
        );
        let platforms = Arc::new(StaticPlatformManager::new(build_platforms(
            &config.inventory,
            default_interval,
            &clock,
        )?));

        let collaborators = Collaborators {
            notifications: Arc::clone(&notifications),
            admin: Arc::clone(&admin) as Arc<dyn AdminManager>,
            holidays: Arc::clone(&calendar) as Arc<dyn HolidayManager>,
            scripts: Arc::clone(&scripts) as Arc<dyn ScriptRegistry>,
            clock: Arc::clone(&clock),
            activity,
        };
        let manager = Arc::new(ExperimentManager::new(
            Arc::clone(&platforms) as Arc<dyn PlatformManager>,
            collaborators,
            config.manager_settings(),
        ));

        Ok(Self {
            manager,
            platforms,
            admin,
            calendar,
            scripts,
            clock,
            notifications,
        })
    }

    /// Push the reloadable sections of `next` into the running engine.
    ///
    /// Inventory and worker-cap changes need a restart; they are reported
    /// and otherwise ignored.
    pub fn apply_reload(&self, previous: &Config, next: &Config) -> Result<()> {
        self.calendar.reconfigure(&next.calendar)?;
        if next.scripts != previous.scripts {
            let reloaded = load_scripts(next)?;
            self.scripts.replace_from(&reloaded);
        }
        if next.admin.initial_state != previous.admin.initial_state {
            let before = self.admin.set_state(next.admin.initial_state);
            eprintln!(
                "[CHX-DAEMON] admin state {before} -> {}",
                next.admin.initial_state
            );
            self.notifications.send(NotificationEvent::AdminStateChanged {
                from: before.to_string(),
                to: next.admin.initial_state.to_string(),
            });
        }
        self.manager.update_settings(next.manager_settings());

        if next.inventory != previous.inventory {
            eprintln!("[CHX-DAEMON] inventory changes take effect after a restart");
        }
        if next.scheduler.max_workers != previous.scheduler.max_workers {
            eprintln!("[CHX-DAEMON] scheduler.max_workers changes take effect after a restart");
        }
        Ok(())
    }

    /// Run status ticks until the population is empty, `timeout` passes, or
    /// `signals` asks for shutdown. Returns the number of ticks run.
    pub fn drive_to_completion(
        &self,
        poll: Duration,
        timeout: Duration,
        signals: &SignalHandler,
    ) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut ticks = 0;
        while !self.manager.is_idle() {
            if signals.should_shutdown() {
                return Err(ChaosError::Runtime {
                    details: "interrupted while experiments were still running".to_string(),
                });
            }
            if Instant::now() >= deadline {
                return Err(ChaosError::Runtime {
                    details: format!(
                        "{} experiments still running after {}s",
                        self.manager.experiments().len(),
                        timeout.as_secs()
                    ),
                });
            }
            self.manager.update_experiment_status();
            ticks += 1;
            if !self.manager.is_idle() {
                thread::sleep(poll);
            }
        }
        Ok(ticks)
    }
}

fn load_scripts(config: &Config) -> Result<ScriptManager> {
    match &config.scripts.directory {
        Some(dir) => ScriptManager::load_dir(dir),
        None => Ok(ScriptManager::empty()),
    }
}

// ──────────────────── daemon ────────────────────

/// Long-running chaosd process.
pub struct ChaosDaemon {
    config: Config,
    engine: Engine,
    notifications: Arc<NotificationManager>,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    start_time: Instant,
}

impl ChaosDaemon {
    /// Build the daemon and register OS signal hooks.
    pub fn init(config: Config) -> Result<Self> {
        Self::with_signals(config, SignalHandler::new())
    }

    /// Build the daemon with an explicit signal handler.
    pub fn with_signals(config: Config, signal_handler: SignalHandler) -> Result<Self> {
        let (logger_handle, logger_join) = spawn_logger(config.logger_config())?;
        let notifications = Arc::new(NotificationManager::from_config(&config.notifications));
        let engine = Engine::build(
            &config,
            Arc::clone(&notifications) as Arc<dyn NotificationSink>,
            logger_handle.clone(),
            Arc::new(SystemClock),
        )?;

        Ok(Self {
            config,
            engine,
            notifications,
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler,
            start_time: Instant::now(),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn signal_handler(&self) -> SignalHandler {
        self.signal_handler.clone()
    }

    /// Run until shutdown is requested.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        let version = env!("CARGO_PKG_VERSION").to_string();
        self.logger_handle.send(ActivityEvent::EngineStarted {
            version: version.clone(),
            config_hash: config_hash.clone(),
        });
        self.notifications.send(NotificationEvent::EngineStarted {
            version,
            platforms: self.engine.platforms.len(),
        });
        eprintln!(
            "[CHX-DAEMON] started: {} platforms, {} scripts, config {config_hash}",
            self.engine.platforms.len(),
            self.engine.scripts.len()
        );

        let mut next_schedule = Instant::now();
        let mut next_status = Instant::now();

        loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[CHX-DAEMON] shutdown requested");
                break;
            }
            if self.signal_handler.should_reload() {
                self.handle_config_reload();
            }
            if self.signal_handler.should_schedule_now() {
                eprintln!("[CHX-DAEMON] forced cohort requested (SIGUSR1)");
                self.schedule_tick(true);
            }

            let now = Instant::now();
            if now >= next_schedule {
                self.schedule_tick(false);
                next_schedule = now + self.schedule_interval();
            }
            if now >= next_status {
                self.status_tick();
                next_status = now + self.status_interval();
            }

            let wake = next_schedule.min(next_status);
            let idle = wake.saturating_duration_since(Instant::now());
            thread::sleep(idle.min(MAX_IDLE_SLEEP));
        }

        self.shutdown();
        Ok(())
    }

    fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.config.scheduler.schedule_interval_secs.max(1))
    }

    fn status_interval(&self) -> Duration {
        Duration::from_secs(self.config.scheduler.status_interval_secs.max(1))
    }

    fn schedule_tick(&self, force: bool) {
        let created = self.engine.manager.schedule_experiments(force);
        if !created.is_empty() {
            eprintln!("[CHX-DAEMON] cohort of {} experiments created", created.len());
        }
    }

    fn status_tick(&self) {
        let StatusReport {
            panicked,
            cohort_completed,
            ..
        } = self.engine.manager.update_experiment_status();
        if panicked > 0 {
            self.logger_handle.send(ActivityEvent::Error {
                code: "CHX-3900".to_string(),
                message: format!("{panicked} experiment evaluations panicked"),
            });
        }
        if cohort_completed {
            eprintln!("[CHX-DAEMON] cohort completed");
        }
    }

    fn handle_config_reload(&mut self) {
        eprintln!("[CHX-DAEMON] config reload requested (SIGHUP)");

        let new_config = match Config::load(Some(&self.config.paths.config_file)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("[CHX-DAEMON] config reload failed: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("config reload failed: {e}"),
                });
                return;
            }
        };

        let old_hash = self.config.stable_hash().unwrap_or_default();
        let new_hash = new_config.stable_hash().unwrap_or_default();
        if old_hash == new_hash {
            eprintln!("[CHX-DAEMON] config unchanged, skipping reload");
            return;
        }

        match self.engine.apply_reload(&self.config, &new_config) {
            Ok(()) => {
                self.logger_handle.send(ActivityEvent::ConfigReloaded {
                    details: format!("config hash: {old_hash} -> {new_hash}"),
                });
                self.config = new_config;
                eprintln!("[CHX-DAEMON] config reloaded successfully");
            }
            Err(e) => {
                eprintln!("[CHX-DAEMON] config reload failed: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("config reload failed: {e}"),
                });
            }
        }
    }

    fn shutdown(&mut self) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let active: Vec<Arc<Experiment>> = self.engine.manager.experiments();
        if !active.is_empty() {
            eprintln!(
                "[CHX-DAEMON] stopping with {} experiments still active",
                active.len()
            );
        }

        let logger = self.logger_handle.clone();
        let notifications = Arc::clone(&self.notifications);
        let record_stop = move || {
            logger.send(ActivityEvent::EngineStopped {
                reason: "clean shutdown".to_string(),
                uptime_secs,
            });
            notifications.send(NotificationEvent::EngineStopped {
                reason: "clean shutdown".to_string(),
                uptime_secs,
            });
            Ok(())
        };
        let logger_join = std::cell::RefCell::new(self.logger_join.take());
        let logger = self.logger_handle.clone();
        let stop_logger = move || {
            logger.shutdown();
            match logger_join.borrow_mut().take() {
                Some(join) => join.join().map_err(|_| ChaosError::Runtime {
                    details: "logger thread panicked".to_string(),
                }),
                None => Ok(()),
            }
        };

        let tasks: Vec<ShutdownTask<'_>> = vec![
            ("record stop", &record_stop),
            ("flush activity log", &stop_logger),
        ];
        ShutdownCoordinator::default().execute(&tasks);
        eprintln!("[CHX-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}
