//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use chaos_engine::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::Config;
pub use crate::core::errors::{ChaosError, Result};

// Operator controls
pub use crate::admin::calendar::{CalendarHolidays, HolidayManager};
pub use crate::admin::state::{AdminManager, AdminState, AdminStateManager};

// Experiments
pub use crate::experiment::action::ExperimentAction;
pub use crate::experiment::lifecycle::{Collaborators, Experiment, ExperimentPolicy};
pub use crate::experiment::manager::{ExperimentManager, ManagerSettings, StatusReport};
pub use crate::experiment::state::{ContainerHealth, ExperimentState, ExperimentType};
pub use crate::experiment::suite::ExperimentSuite;

// Platforms
pub use crate::platform::container::Container;
pub use crate::platform::registry::{Platform, PlatformManager, StaticPlatformManager};

// Collaborator implementations
pub use crate::daemon::notifications::{NotificationManager, NotificationSink};
pub use crate::logger::activity::{ActivityLoggerHandle, spawn_logger};
pub use crate::scripts::manager::{ScriptManager, ScriptRegistry};
