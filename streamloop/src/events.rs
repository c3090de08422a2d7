//! Scheduler events for presentation layers.
//!
//! The scheduler owns one [`EventBroadcaster`]; anything that wants to render
//! status (CLI printer, notifications, a future GUI) subscribes through it.
//! Events are fire-and-forget: a lagging or absent subscriber never affects
//! scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events emitted by the scheduler and its capture workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LooperEvent {
    /// A probe found the channel live and a capture started.
    ChannelLive {
        name: String,
        rendition: String,
        timestamp: DateTime<Utc>,
    },
    /// A probe found the channel offline (or failed; the two are equivalent).
    ChannelOffline {
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// Periodic progress for an active capture.
    CaptureProgress {
        name: String,
        /// Seconds since the capture started.
        elapsed_secs: u64,
        /// Total bytes written so far.
        bytes_total: u64,
        /// Bytes written during the last second.
        bytes_per_sec: u64,
    },
    /// A capture finished (stream ended, errored out, or was cancelled).
    CaptureEnded {
        name: String,
        output: PathBuf,
        bytes_total: u64,
        ended_at: DateTime<Utc>,
    },
    /// A channel was snoozed and left the scheduling rotation.
    ChannelSnoozed {
        name: String,
        until: DateTime<Utc>,
    },
    /// A channel's snooze expired or was cleared; it is eligible again.
    ChannelUnsnoozed { name: String },
    /// A channel was edited; presentation layers should refresh the name.
    ChannelEdited {
        old_name: String,
        new_name: String,
    },
}

impl LooperEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            LooperEvent::ChannelLive {
                name, rendition, ..
            } => format!("{name} is live ({rendition})"),
            LooperEvent::ChannelOffline { name, .. } => format!("{name} is offline"),
            LooperEvent::CaptureProgress {
                name,
                bytes_total,
                bytes_per_sec,
                ..
            } => format!(
                "{name}: {} ({}/s)",
                crate::util::format_bytes(*bytes_total),
                crate::util::format_bytes(*bytes_per_sec)
            ),
            LooperEvent::CaptureEnded { name, ended_at, .. } => {
                format!("{name} stream ended at {}", ended_at.format("%H:%M:%S"))
            }
            LooperEvent::ChannelSnoozed { name, until } => {
                format!("{name} snoozed until {}", until.format("%Y-%m-%d %H:%M:%S"))
            }
            LooperEvent::ChannelUnsnoozed { name } => format!("{name} is back in the queue"),
            LooperEvent::ChannelEdited { old_name, new_name } => {
                format!("{old_name} renamed to {new_name}")
            }
        }
    }
}

/// Buffered events kept per subscriber before the oldest are dropped.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out handle for [`LooperEvent`]s.
///
/// A thin wrapper over a `tokio::sync::broadcast` channel. The scheduler and
/// its workers publish through clones of this handle; a subscriber that
/// falls behind loses the oldest buffered events instead of applying
/// backpressure to the scheduler.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<LooperEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Use an explicit buffer size instead of the default.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LooperEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event to every subscriber. With no subscribers attached
    /// the event is simply dropped.
    pub fn publish(&self, event: LooperEvent) {
        let _ = self.sender.send(event);
    }

    /// How many receivers are currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_subscribe_round_trip() {
        let broadcaster = EventBroadcaster::new();
        let mut receiver = broadcaster.subscribe();

        broadcaster.publish(LooperEvent::ChannelUnsnoozed {
            name: "alice".to_string(),
        });

        let received = receiver.try_recv().unwrap();
        assert!(matches!(received, LooperEvent::ChannelUnsnoozed { .. }));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(LooperEvent::ChannelOffline {
            name: "bob".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn descriptions_mention_the_channel() {
        let event = LooperEvent::ChannelLive {
            name: "alice".to_string(),
            rendition: "1080p".to_string(),
            timestamp: Utc::now(),
        };
        assert!(event.description().contains("alice"));
        assert!(event.description().contains("1080p"));
    }
}
