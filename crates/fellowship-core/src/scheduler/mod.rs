//! Coarse periodic task scheduler.
//!
//! One `TaskScheduler` per process, started when the host application mounts
//! and stopped when it unmounts. Schedules are `*/N` minute or hour intervals
//! checked on a 60 second tick.

pub mod interval;
pub mod runner;

pub use interval::IntervalSpec;
pub use runner::{BackgroundStatus, TaskAction, TaskScheduler, DEFAULT_TICK_INTERVAL_SECS};
