//! Platform layer: containers, platforms, their scheduling clocks, and the
//! bundled shell-driven inventory platform.

pub mod container;
pub mod inventory;
pub mod registry;
pub mod scheduler;
pub mod shell;
