//! Platforms and the manager that picks which one runs next.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::platform::container::Container;

/// Chance that an eligible container volunteers for a cohort.
pub const DEFAULT_DESTRUCTION_PROBABILITY: f64 = 0.2;

/// A homogeneous pool of containers with its own scheduling clock.
pub trait Platform: Send + Sync + fmt::Debug {
    fn platform_type(&self) -> &str;

    /// Every container currently known to the platform.
    fn roster(&self) -> Vec<Arc<dyn Container>>;

    /// Containers offered to a new cohort, in preference order.
    fn generate_experiment_roster(&self) -> Vec<Arc<dyn Container>> {
        self.roster()
    }

    /// When this platform next becomes due.
    fn next_chaos_time(&self) -> DateTime<Utc>;

    /// Due now according to the scheduling clock.
    fn can_experiment(&self) -> bool;

    /// Record that a cohort is being created, consuming the current slot.
    fn schedule_experiment(&self);

    fn has_eligible_containers(&self) -> bool {
        !self.roster().is_empty()
    }

    fn destruction_probability(&self) -> f64 {
        DEFAULT_DESTRUCTION_PROBABILITY
    }
}

pub trait PlatformManager: Send + Sync {
    fn platforms(&self) -> Vec<Arc<dyn Platform>>;

    /// Earliest-due platform that is allowed to run and has containers.
    /// `force` ignores the scheduling clock.
    fn next_platform_for_experiment(&self, force: bool) -> Option<Arc<dyn Platform>> {
        let mut platforms = self.platforms();
        platforms.sort_by_key(|p| p.next_chaos_time());
        platforms
            .into_iter()
            .filter(|p| force || p.can_experiment())
            .find(|p| p.has_eligible_containers())
    }

    fn platform_by_type(&self, platform_type: &str) -> Option<Arc<dyn Platform>> {
        self.platforms()
            .into_iter()
            .find(|p| p.platform_type() == platform_type)
    }
}

/// Fixed set of platforms wired at start-up.
#[derive(Debug, Default)]
pub struct StaticPlatformManager {
    platforms: Vec<Arc<dyn Platform>>,
}

impl StaticPlatformManager {
    #[must_use]
    pub fn new(platforms: Vec<Arc<dyn Platform>>) -> Self {
        Self { platforms }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

impl PlatformManager for StaticPlatformManager {
    fn platforms(&self) -> Vec<Arc<dyn Platform>> {
        self.platforms.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[derive(Debug)]
    struct FixedPlatform {
        name: &'static str,
        next: DateTime<Utc>,
        due: bool,
        containers: usize,
    }

    impl Platform for FixedPlatform {
        fn platform_type(&self) -> &str {
            self.name
        }
        fn roster(&self) -> Vec<Arc<dyn Container>> {
            Vec::new()
        }
        fn next_chaos_time(&self) -> DateTime<Utc> {
            self.next
        }
        fn can_experiment(&self) -> bool {
            self.due
        }
        fn schedule_experiment(&self) {}
        fn has_eligible_containers(&self) -> bool {
            self.containers > 0
        }
    }

    fn manager() -> StaticPlatformManager {
        let now = Utc::now();
        StaticPlatformManager::new(vec![
            Arc::new(FixedPlatform {
                name: "late",
                next: now + TimeDelta::hours(2),
                due: true,
                containers: 1,
            }),
            Arc::new(FixedPlatform {
                name: "early-empty",
                next: now - TimeDelta::hours(3),
                due: true,
                containers: 0,
            }),
            Arc::new(FixedPlatform {
                name: "early-not-due",
                next: now - TimeDelta::hours(2),
                due: false,
                containers: 4,
            }),
        ])
    }

    #[test]
    fn picks_earliest_due_platform_with_containers() {
        let picked = manager().next_platform_for_experiment(false).unwrap();
        assert_eq!(picked.platform_type(), "late");
    }

    #[test]
    fn force_ignores_the_clock() {
        let picked = manager().next_platform_for_experiment(true).unwrap();
        assert_eq!(picked.platform_type(), "early-not-due");
    }

    #[test]
    fn lookup_by_type() {
        let m = manager();
        assert!(m.platform_by_type("late").is_some());
        assert!(m.platform_by_type("missing").is_none());
        assert!(StaticPlatformManager::default()
            .next_platform_for_experiment(true)
            .is_none());
    }
}
