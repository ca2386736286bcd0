//! Experiment lifecycle: action selection, the per-experiment state machine,
//! cohort grouping, and the manager that schedules and advances experiments.

pub mod action;
pub mod context;
pub mod lifecycle;
pub mod manager;
pub mod pool;
pub mod startup;
pub mod state;
pub mod suite;

/// Default maximum time a fault may run before self-healing becomes mandatory.
pub const DEFAULT_EXPERIMENT_DURATION_MINUTES: u64 = 5;
/// Default window during which health is always reported as still running.
pub const DEFAULT_EXPERIMENT_MINIMUM_DURATION_SECONDS: u64 = 30;
/// Default grace period between the first healthy reading and finalization.
pub const DEFAULT_TIME_BEFORE_FINALIZATION_SECONDS: u64 = 30;
/// Default minimum time between two self-healing attempts.
pub const DEFAULT_SELF_HEALING_INTERVAL_MINUTES: u64 = 5;
/// Default number of self-healing attempts before an experiment fails.
pub const DEFAULT_MAXIMUM_SELF_HEALING_RETRIES: u32 = 10;

/// Notification text when an experiment begins injecting its fault.
pub const STARTING_NEW_EXPERIMENT: &str = "Starting new experiment";
/// Notification text when startup fails.
pub const FAILED_TO_START_EXPERIMENT: &str = "Failed to start experiment";
/// Notification text when the self-healing budget is spent.
pub const MAXIMUM_SELF_HEALING_RETRIES_REACHED: &str = "Maximum self healing retries reached";
/// Notification text when a remediation call errors.
pub const SELF_HEALING_ERROR: &str = "An exception occurred while running self-healing.";
/// Placeholder action name before selection has happened.
pub const METHOD_NOT_SET: &str = "Experiment method not set yet";
