//! Operator-controlled engine state: pause, drain, and abort switches.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::clock::Clock;
use crate::core::errors::ChaosError;

/// Engine-wide operating mode set by operators.
///
/// | state      | new experiments | self-healing | forced self-healing |
/// |------------|-----------------|--------------|---------------------|
/// | `starting` | no              | no           | no                  |
/// | `started`  | yes             | yes          | no                  |
/// | `paused`   | no              | no           | no                  |
/// | `drain`    | no              | yes          | no                  |
/// | `abort`    | no              | yes          | yes                 |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Starting,
    #[default]
    Started,
    Paused,
    Drain,
    Abort,
}

impl AdminState {
    #[must_use]
    pub const fn allows_experiments(self) -> bool {
        matches!(self, Self::Started)
    }

    #[must_use]
    pub const fn allows_self_healing(self) -> bool {
        matches!(self, Self::Started | Self::Drain | Self::Abort)
    }

    #[must_use]
    pub const fn forces_self_healing(self) -> bool {
        matches!(self, Self::Abort)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Paused => "paused",
            Self::Drain => "drain",
            Self::Abort => "abort",
        };
        f.write_str(label)
    }
}

impl FromStr for AdminState {
    type Err = ChaosError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starting" => Ok(Self::Starting),
            "started" => Ok(Self::Started),
            "paused" => Ok(Self::Paused),
            "drain" => Ok(Self::Drain),
            "abort" => Ok(Self::Abort),
            other => Err(ChaosError::ConfigParse {
                context: "admin state",
                details: format!("unknown admin state {other:?}"),
            }),
        }
    }
}

/// Query surface the experiment lifecycle consults before acting.
pub trait AdminManager: Send + Sync {
    fn can_run_experiments(&self) -> bool;
    fn can_run_self_healing(&self) -> bool;
    fn must_run_self_healing(&self) -> bool;
    fn admin_state(&self) -> AdminState;
}

#[derive(Debug, Clone, Copy)]
struct StateEntry {
    state: AdminState,
    since: DateTime<Utc>,
}

/// Holds the current admin state and when it was entered.
#[derive(Debug)]
pub struct AdminStateManager {
    current: RwLock<StateEntry>,
    clock: Arc<dyn Clock>,
}

impl AdminStateManager {
    #[must_use]
    pub fn new(initial: AdminState, clock: Arc<dyn Clock>) -> Self {
        let since = clock.now();
        Self {
            current: RwLock::new(StateEntry {
                state: initial,
                since,
            }),
            clock,
        }
    }

    /// Switch state; returns the previous one. Re-entering the current
    /// state does not reset its timer.
    pub fn set_state(&self, next: AdminState) -> AdminState {
        let mut current = self.current.write();
        let previous = current.state;
        if previous != next {
            *current = StateEntry {
                state: next,
                since: self.clock.now(),
            };
        }
        previous
    }

    #[must_use]
    pub fn time_in_state(&self) -> TimeDelta {
        let since = self.current.read().since;
        self.clock.now() - since
    }
}

impl AdminManager for AdminStateManager {
    fn can_run_experiments(&self) -> bool {
        self.current.read().state.allows_experiments()
    }

    fn can_run_self_healing(&self) -> bool {
        self.current.read().state.allows_self_healing()
    }

    fn must_run_self_healing(&self) -> bool {
        self.current.read().state.forces_self_healing()
    }

    fn admin_state(&self) -> AdminState {
        self.current.read().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    fn manager(initial: AdminState) -> (AdminStateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (AdminStateManager::new(initial, clock.clone()), clock)
    }

    #[test]
    fn permissions_per_state() {
        let cases = [
            (AdminState::Starting, false, false, false),
            (AdminState::Started, true, true, false),
            (AdminState::Paused, false, false, false),
            (AdminState::Drain, false, true, false),
            (AdminState::Abort, false, true, true),
        ];
        for (state, experiments, healing, forced) in cases {
            let (admin, _) = manager(state);
            assert_eq!(admin.can_run_experiments(), experiments, "{state}");
            assert_eq!(admin.can_run_self_healing(), healing, "{state}");
            assert_eq!(admin.must_run_self_healing(), forced, "{state}");
        }
    }

    #[test]
    fn time_in_state_resets_only_on_change() {
        let (admin, clock) = manager(AdminState::Started);
        clock.advance(TimeDelta::minutes(3));
        assert_eq!(admin.set_state(AdminState::Started), AdminState::Started);
        assert_eq!(admin.time_in_state(), TimeDelta::minutes(3));

        assert_eq!(admin.set_state(AdminState::Paused), AdminState::Started);
        assert_eq!(admin.time_in_state(), TimeDelta::zero());
        assert_eq!(admin.admin_state(), AdminState::Paused);
    }

    #[test]
    fn parses_from_config_strings() {
        assert_eq!("Drain".parse::<AdminState>().unwrap(), AdminState::Drain);
        let err = "halted".parse::<AdminState>().unwrap_err();
        assert_eq!(err.code(), "CHX-1003");
    }
}
