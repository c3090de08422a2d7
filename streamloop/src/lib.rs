//! Rotating probe-and-capture engine for live channels.
//!
//! Channels are grouped by their resolved origin domain; each domain queue
//! runs one probe per poll interval against its most overdue channel, and a
//! channel found live moves to a dedicated capture worker until the stream
//! ends. Scheduling, capture, and remuxing live here; stream probing lives
//! in the `stream-probe` crate.

pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod remux;
pub mod scheduler;
pub mod util;

pub use channel::Channel;
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBroadcaster, LooperEvent};
pub use scheduler::{Scheduler, SchedulerConfig};
