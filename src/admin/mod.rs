//! Operator controls: admin state and the working-hours calendar.

pub mod calendar;
pub mod state;
