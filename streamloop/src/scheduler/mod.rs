//! The polling scheduler: per-domain fairness queues, the 1-second clock,
//! and capture worker lifecycle.

mod queue;
mod service;

pub use queue::{AGING_MULTIPLIER, DomainQueue, QueuedChannel};
pub use service::{Scheduler, SchedulerConfig};
