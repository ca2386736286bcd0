#![forbid(unsafe_code)]

//! chaos_engine: a chaos-engineering control plane.
//!
//! The engine periodically picks a platform, selects a cohort of containers,
//! and drives one experiment per container through its lifecycle:
//! fault injection, health observation, bounded self-healing, and
//! finalization.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use chaos_engine::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use chaos_engine::core::config::Config;
//! use chaos_engine::experiment::manager::ExperimentManager;
//! ```

pub mod prelude;

pub mod admin;
pub mod core;
pub mod daemon;
pub mod experiment;
pub mod logger;
pub mod platform;
pub mod scripts;
