//! Channel entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stream_probe::RenditionPreference;
use url::Url;

use crate::{Error, Result};

/// One monitored stream source.
///
/// A channel lives in exactly one domain queue (keyed by the host component
/// of its address) while idle or snoozed, and in the scheduler's active set
/// while a capture is running. `waited` and `snoozed_until` are run-scoped
/// scheduling state; everything else is user configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Unique user-facing key.
    pub name: String,
    /// Network locator of the stream.
    pub address: Url,
    /// Positive priority weight; smaller is more urgent.
    pub priority: u32,
    /// Desired capture quality.
    #[serde(default)]
    pub rendition: RenditionPreference,
    /// While set and in the future, the channel is excluded from probing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<DateTime<Utc>>,
    /// Idle ticks accumulated since the last probe attempt.
    #[serde(skip)]
    pub waited: u64,
}

impl Channel {
    /// Create a validated channel.
    pub fn new(
        name: impl Into<String>,
        address: &str,
        priority: u32,
        rendition: RenditionPreference,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("channel name must not be empty"));
        }
        if priority == 0 {
            return Err(Error::validation("channel priority must be at least 1"));
        }

        let address: Url = address.parse()?;
        if address.host_str().is_none() {
            return Err(Error::validation(format!(
                "address has no host component: {address}"
            )));
        }

        Ok(Self {
            name,
            address,
            priority,
            rendition,
            snoozed_until: None,
            waited: 0,
        })
    }

    /// The origin domain this channel is grouped under.
    pub fn domain(&self) -> String {
        domain_of(&self.address)
    }

    /// Whether the channel is currently snoozed.
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| now < until)
    }
}

/// Derive the queue key from an address.
///
/// Uses the host, lowercased. The address was validated to have a host at
/// construction time.
pub fn domain_of(address: &Url) -> String {
    address.host_str().unwrap_or_default().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_channel() {
        let ch = Channel::new(
            "alice",
            "https://live.example.com/alice",
            1,
            RenditionPreference::Best,
        )
        .unwrap();
        assert_eq!(ch.domain(), "live.example.com");
        assert_eq!(ch.waited, 0);
        assert!(!ch.is_snoozed(Utc::now()));
    }

    #[test]
    fn rejects_empty_name() {
        let err = Channel::new("  ", "https://example.com/x", 1, RenditionPreference::Best)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_zero_priority() {
        let err = Channel::new("a", "https://example.com/x", 0, RenditionPreference::Best)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_hostless_address() {
        assert!(Channel::new("a", "not a url", 1, RenditionPreference::Best).is_err());
        assert!(Channel::new("a", "file:///tmp/x", 1, RenditionPreference::Best).is_err());
    }

    #[test]
    fn domain_is_lowercased() {
        let ch = Channel::new(
            "a",
            "https://Live.Example.COM/a",
            1,
            RenditionPreference::Best,
        )
        .unwrap();
        assert_eq!(ch.domain(), "live.example.com");
    }

    #[test]
    fn serde_round_trip_keeps_the_address() {
        let ch = Channel::new(
            "alice",
            "https://live.example.com/alice",
            2,
            RenditionPreference::High,
        )
        .unwrap();

        let json = serde_json::to_string(&ch).unwrap();
        assert!(json.contains("https://live.example.com/alice"));

        let back: Channel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "alice");
        assert_eq!(back.address, ch.address);
        assert_eq!(back.priority, 2);
        assert_eq!(back.rendition, RenditionPreference::High);
        // Run-scoped state never round-trips.
        assert_eq!(back.waited, 0);
    }

    #[test]
    fn snooze_deadline_is_compared_against_now() {
        let mut ch =
            Channel::new("a", "https://example.com/a", 1, RenditionPreference::Best).unwrap();
        let now = Utc::now();
        ch.snoozed_until = Some(now + chrono::Duration::hours(8));
        assert!(ch.is_snoozed(now));
        assert!(!ch.is_snoozed(now + chrono::Duration::hours(9)));
    }
}
