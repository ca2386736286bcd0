//! Core types: errors, configuration, time, shared path helpers.

pub mod clock;
pub mod config;
pub mod errors;
pub mod paths;
