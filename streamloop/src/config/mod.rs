//! Persistent configuration.
//!
//! A single JSON document holds the channel roster, per-domain poll
//! intervals, and app-level settings. Channel entries are stored raw and
//! validated on conversion, so a hand-edited file gets a real error instead
//! of a panic deep in the scheduler.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stream_probe::RenditionPreference;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "streamloop.json";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_priority() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("captures")
}

/// One channel as it appears on disk.
///
/// `snoozed_until` is persisted so a snooze survives a restart; everything
/// run-scoped (wait counters, queue position) is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub address: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub rendition: RenditionPreference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<DateTime<Utc>>,
}

impl ChannelEntry {
    /// Validate into a runtime channel.
    pub fn into_channel(self) -> Result<Channel> {
        let mut channel = Channel::new(&self.name, &self.address, self.priority, self.rendition)?;
        channel.snoozed_until = self.snoozed_until;
        Ok(channel)
    }
}

impl From<&Channel> for ChannelEntry {
    fn from(channel: &Channel) -> Self {
        Self {
            name: channel.name.clone(),
            address: channel.address.to_string(),
            priority: channel.priority,
            rendition: channel.rendition,
            snoozed_until: channel.snoozed_until,
        }
    }
}

/// The on-disk configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channels: Vec<ChannelEntry>,
    /// Poll interval per resolved domain, seconds.
    pub domain_poll_intervals: HashMap<String, u64>,
    /// Interval for domains without an explicit entry.
    pub default_poll_interval_secs: u64,
    pub output_dir: PathBuf,
    /// Begin scheduling immediately instead of waiting for a start command.
    pub start_on_launch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            domain_poll_intervals: HashMap::new(),
            default_poll_interval_secs: default_poll_interval(),
            output_dir: default_output_dir(),
            start_on_launch: false,
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file does not
    /// exist yet. Snoozes that expired while the app was down are dropped on
    /// the way in.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no configuration file, starting fresh");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&text)?;
        if config.default_poll_interval_secs == 0 {
            return Err(Error::config("default_poll_interval_secs must be at least 1"));
        }
        if let Some(domain) = config
            .domain_poll_intervals
            .iter()
            .find_map(|(domain, secs)| (*secs == 0).then_some(domain))
        {
            return Err(Error::config(format!(
                "poll interval for domain '{domain}' must be at least 1"
            )));
        }

        let swept = config.sweep_expired_snoozes(Utc::now());
        if swept > 0 {
            info!(count = swept, "cleared snoozes that expired while offline");
        }
        Ok(config)
    }

    /// Write the document to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Drop snooze timestamps that are already in the past. Returns how many
    /// were cleared.
    pub fn sweep_expired_snoozes(&mut self, now: DateTime<Utc>) -> usize {
        let mut swept = 0;
        for entry in &mut self.channels {
            if matches!(entry.snoozed_until, Some(until) if until <= now) {
                entry.snoozed_until = None;
                swept += 1;
            }
        }
        swept
    }

    /// Validate every stored channel. Invalid entries are skipped with a
    /// warning rather than taking the whole roster down.
    pub fn channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter_map(|entry| match entry.clone().into_channel() {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(name = %entry.name, error = %e, "skipping invalid channel entry");
                    None
                }
            })
            .collect()
    }

    /// Scheduler settings derived from this document.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            default_poll_interval_secs: self.default_poll_interval_secs,
            domain_poll_intervals: self.domain_poll_intervals.clone(),
            output_dir: self.output_dir.clone(),
            ..SchedulerConfig::default()
        }
    }

    /// Replace the stored roster with the scheduler's current one.
    pub fn set_channels<'a>(&mut self, channels: impl IntoIterator<Item = &'a Channel>) {
        self.channels = channels.into_iter().map(ChannelEntry::from).collect();
    }
}
