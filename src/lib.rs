//! Snapshot-safe backup jobs.
//!
//! A [`workflow::Job`] runs before-hooks, a data movement step and
//! after-hooks. LVM snapshots of the source are created and mounted by
//! before-hooks and torn down by after-hooks whether or not the job
//! succeeded; ZFS snapshot retention runs on the destination after success.

pub mod backup;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod hooks;
pub mod mount;
pub mod signal_handler;
pub mod snapshot;
pub mod types;
pub mod util;
pub mod workflow;

#[cfg(test)]
mod testing;
