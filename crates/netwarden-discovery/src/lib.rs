//! NetWarden Discovery - Device polling and scheduling
//!
//! This crate drives the discovery pipeline:
//! - Device poller reading each device over NETCONF with bounded concurrency
//! - Snapshot capture, persistence and alarm raising per device
//! - Scheduler for daily and on-demand poll runs

pub mod poller;
pub mod scheduler;

pub use poller::{Poller, PollerConfig, DEFAULT_CPU_ALARM_THRESHOLD, DEFAULT_MAX_CONCURRENCY};
pub use scheduler::{Scheduler, SchedulerConfig, TriggerOutcome, DEFAULT_POLL_INTERVAL};
