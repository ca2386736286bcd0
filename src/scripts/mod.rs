//! Shell script assets: header parsing and the script registry.

pub mod manager;
pub mod shell;
