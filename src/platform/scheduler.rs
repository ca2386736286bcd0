//! Per-platform scheduling clock.
//!
//! The gap between two experiments on one platform is `average` scaled by a
//! random factor with mean close to one, drawn from a truncated normal
//! through `log2(1 / (1 - g))`. The first gap uses the square root of the
//! factor so a freshly started daemon does not wait a full period.

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::core::clock::{Clock, after};

const RAMANUJAN_SOLDNER: f64 = 1.451_369_234_883_381;

#[derive(Debug)]
struct Slots {
    next: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ChaosScheduler {
    average: TimeDelta,
    clock: Arc<dyn Clock>,
    slots: Mutex<Slots>,
}

impl ChaosScheduler {
    #[must_use]
    pub fn new(average: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            average,
            clock,
            slots: Mutex::new(Slots {
                next: None,
                last: None,
            }),
        }
    }

    /// Scheduler whose first slot is already due.
    #[must_use]
    pub fn due_now(average: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let scheduler = Self::new(average, clock);
        scheduler.slots.lock().next = Some(now);
        scheduler
    }

    /// Computed lazily and stable until the next [`Self::start_experiment`].
    pub fn next_chaos_time(&self) -> DateTime<Utc> {
        let mut slots = self.slots.lock();
        if let Some(next) = slots.next {
            return next;
        }
        let next = match slots.last {
            Some(last) => after(last, self.scaled(scaling_factor())),
            None => after(self.clock.now(), self.scaled(scaling_factor().sqrt())),
        };
        slots.next = Some(next);
        next
    }

    pub fn is_due(&self) -> bool {
        self.next_chaos_time() <= self.clock.now()
    }

    /// Consume the current slot.
    pub fn start_experiment(&self) {
        let mut slots = self.slots.lock();
        slots.last = Some(slots.next.unwrap_or_else(|| self.clock.now()));
        slots.next = None;
    }

    #[must_use]
    pub fn last_chaos_time(&self) -> Option<DateTime<Utc>> {
        self.slots.lock().last
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn scaled(&self, factor: f64) -> TimeDelta {
        let millis = self.average.num_milliseconds() as f64 * factor;
        TimeDelta::milliseconds(millis.max(0.0) as i64)
    }
}

/// Random factor in roughly `(0.014, 16.6)` with mean near one.
fn scaling_factor() -> f64 {
    loop {
        let g = (standard_normal() + 1.0) * 0.5 / RAMANUJAN_SOLDNER;
        if g > 0.01 && g < 0.999_99 {
            return (1.0 - g).ln() / 0.5_f64.ln();
        }
    }
}

/// Box-Muller transform over two uniform draws.
fn standard_normal() -> f64 {
    let u1: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rand::random();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
