//! Activity logging: a background writer thread feeding an append-only JSONL
//! file with rotation and graceful degradation.

pub mod activity;
pub mod jsonl;
