//! Disk-space driven file cleanup.
//!
//! Each volume gets a [`policy::CleanupPolicy`]. A background
//! [`scheduler::CleanupScheduler`] re-reads the policies on every tick,
//! deletes eligible files oldest first and records each deletion in a
//! dated audit trail.

pub mod audit;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod output;
pub mod policy;
pub mod scheduler;
pub mod utils;
pub mod volume;
