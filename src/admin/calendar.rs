//! Working-hours and holiday calendar.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc, Weekday};
use parking_lot::RwLock;

use crate::core::clock::Clock;
use crate::core::config::CalendarConfig;
use crate::core::errors::{ChaosError, Result};

/// Calendar queries consulted before starting an experiment.
pub trait HolidayManager: Send + Sync {
    fn is_holiday(&self) -> bool;
    fn is_outside_working_hours(&self) -> bool;
}

#[derive(Debug, Clone)]
struct Window {
    enabled: bool,
    offset: FixedOffset,
    start_hour: u32,
    end_hour: u32,
    weekends_off: bool,
    holidays: BTreeSet<NaiveDate>,
}

impl Window {
    fn from_config(config: &CalendarConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_hours.saturating_mul(3600))
            .ok_or_else(|| ChaosError::InvalidConfig {
                details: format!(
                    "calendar.utc_offset_hours out of range: {}",
                    config.utc_offset_hours
                ),
            })?;
        let holidays = config
            .holidays
            .iter()
            .map(|raw| parse_holiday(raw))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self {
            enabled: config.enabled,
            offset,
            start_hour: config.start_hour,
            end_hour: config.end_hour,
            weekends_off: config.weekends_off,
            holidays,
        })
    }
}

/// Fixed-offset working window with an explicit holiday list. The window can
/// be swapped at runtime on config reload.
#[derive(Debug)]
pub struct CalendarHolidays {
    window: RwLock<Window>,
    clock: Arc<dyn Clock>,
}

impl CalendarHolidays {
    pub fn from_config(config: &CalendarConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            window: RwLock::new(Window::from_config(config)?),
            clock,
        })
    }

    /// Calendar that never gates anything.
    #[must_use]
    pub fn always_open(clock: Arc<dyn Clock>) -> Self {
        Self {
            window: RwLock::new(Window {
                enabled: false,
                offset: Utc.fix(),
                start_hour: 0,
                end_hour: 24,
                weekends_off: false,
                holidays: BTreeSet::new(),
            }),
            clock,
        }
    }

    /// Replace the window. On error the previous window stays in force.
    pub fn reconfigure(&self, config: &CalendarConfig) -> Result<()> {
        let window = Window::from_config(config)?;
        *self.window.write() = window;
        Ok(())
    }
}

impl HolidayManager for CalendarHolidays {
    fn is_holiday(&self) -> bool {
        let window = self.window.read();
        if !window.enabled {
            return false;
        }
        let today = self.clock.now().with_timezone(&window.offset).date_naive();
        if window.weekends_off && matches!(today.weekday(), Weekday::Sat | Weekday::Sun) {
            return true;
        }
        window.holidays.contains(&today)
    }

    fn is_outside_working_hours(&self) -> bool {
        let window = self.window.read();
        if !window.enabled {
            return false;
        }
        let hour = self.clock.now().with_timezone(&window.offset).hour();
        hour < window.start_hour || hour >= window.end_hour
    }
}

/// Parse one `YYYY-MM-DD` holiday entry.
pub fn parse_holiday(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|err| ChaosError::ConfigParse {
        context: "calendar.holidays",
        details: format!("{raw:?}: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use chrono::{DateTime, TimeZone};

    fn calendar(at: DateTime<Utc>, config: &CalendarConfig) -> CalendarHolidays {
        CalendarHolidays::from_config(config, Arc::new(ManualClock::new(at))).unwrap()
    }

    #[test]
    fn inside_hours_on_a_weekday() {
        // Wednesday.
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 10, 30, 0).unwrap();
        let cal = calendar(at, &CalendarConfig::default());
        assert!(!cal.is_holiday());
        assert!(!cal.is_outside_working_hours());
    }

    #[test]
    fn end_hour_is_exclusive() {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 17, 0, 0).unwrap();
        let cal = calendar(at, &CalendarConfig::default());
        assert!(cal.is_outside_working_hours());
    }

    #[test]
    fn weekends_and_listed_dates_are_holidays() {
        let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap();
        assert!(calendar(saturday, &CalendarConfig::default()).is_holiday());

        let config = CalendarConfig {
            holidays: vec!["2026-12-25".to_string()],
            ..CalendarConfig::default()
        };
        let christmas = Utc.with_ymd_and_hms(2026, 12, 25, 12, 0, 0).unwrap();
        assert!(calendar(christmas, &config).is_holiday());
    }

    #[test]
    fn offset_shifts_the_local_day_and_hour() {
        // 23:00 UTC Friday is 08:00 Saturday at +9.
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 23, 0, 0).unwrap();
        let config = CalendarConfig {
            utc_offset_hours: 9,
            ..CalendarConfig::default()
        };
        let cal = calendar(at, &config);
        assert!(cal.is_holiday());
        assert!(cal.is_outside_working_hours());
    }

    #[test]
    fn disabled_calendar_never_gates() {
        let saturday_night = Utc.with_ymd_and_hms(2026, 10, 17, 23, 0, 0).unwrap();
        let config = CalendarConfig {
            enabled: false,
            ..CalendarConfig::default()
        };
        let cal = calendar(saturday_night, &config);
        assert!(!cal.is_holiday());
        assert!(!cal.is_outside_working_hours());
    }

    #[test]
    fn malformed_holiday_is_rejected() {
        let config = CalendarConfig {
            holidays: vec!["25/12/2026".to_string()],
            ..CalendarConfig::default()
        };
        let err = CalendarHolidays::from_config(&config, Arc::new(ManualClock::starting_now()))
            .unwrap_err();
        assert_eq!(err.code(), "CHX-1003");
    }

    #[test]
    fn reconfigure_swaps_window_and_keeps_old_on_error() {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 7, 0, 0).unwrap();
        let cal = calendar(at, &CalendarConfig::default());
        assert!(cal.is_outside_working_hours());

        let early = CalendarConfig {
            start_hour: 6,
            ..CalendarConfig::default()
        };
        cal.reconfigure(&early).unwrap();
        assert!(!cal.is_outside_working_hours());

        let broken = CalendarConfig {
            holidays: vec!["soon".to_string()],
            ..CalendarConfig::default()
        };
        assert!(cal.reconfigure(&broken).is_err());
        assert!(!cal.is_outside_working_hours());
    }
}
