//! Scheduler service implementation.
//!
//! The scheduler owns every domain queue and every active capture worker.
//! One clock tick per second drives aging and selection; probes and captures
//! run on their own tasks so a stalled network call never delays the tick or
//! other domains. All queue/worker mutation is serialized through a single
//! mutex that is never held across an await.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use stream_probe::{Rendition, RenditionReader, StreamProbe, select_rendition};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::{DomainQueue, QueuedChannel};
use crate::capture::{CaptureOutcome, CaptureWorker};
use crate::channel::Channel;
use crate::events::{EventBroadcaster, LooperEvent};
use crate::remux::Remuxer;
use crate::{Error, Result};

/// Default per-domain poll interval (seconds).
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Poll interval for domains without an explicit entry.
    pub default_poll_interval_secs: u64,
    /// Per-domain poll intervals.
    pub domain_poll_intervals: HashMap<String, u64>,
    /// Directory capture sinks are created in.
    pub output_dir: PathBuf,
    /// Clock period. One tick equals one second of scheduling time
    /// regardless of this value; shortening it only makes tests faster.
    pub tick_interval: Duration,
    /// When set, no internal clock task is spawned and the embedder drives
    /// [`Scheduler::tick`] itself.
    pub external_clock: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            domain_poll_intervals: HashMap::new(),
            output_dir: PathBuf::from("captures"),
            tick_interval: Duration::from_secs(1),
            external_clock: false,
        }
    }
}

/// A channel whose probe is in flight.
///
/// Keyed by the name it had at dispatch time; an edit that renames the
/// channel mid-probe updates the stored entry but not the key.
struct ProbingChannel {
    entry: QueuedChannel,
    /// Domain of the queue the entry was taken from. An edit can relocate
    /// the channel mid-probe, so this may differ from the channel's current
    /// domain by the time the probe resolves.
    origin_domain: String,
    /// Manual probes (`check_now`) are allowed to finish even when the
    /// scheduler is paused.
    manual: bool,
}

/// A channel owned by a running capture worker.
struct ActiveCapture {
    channel: Channel,
    cancel: CancellationToken,
    /// Taken by `stop`/`remove_channel` when they need to join the worker.
    handle: Option<JoinHandle<()>>,
}

struct SchedulerState {
    queues: HashMap<String, DomainQueue>,
    probing: HashMap<String, ProbingChannel>,
    active: HashMap<String, ActiveCapture>,
    intervals: HashMap<String, u64>,
    default_interval: u64,
    running: bool,
    started_once: bool,
}

impl SchedulerState {
    /// The queue for a domain, created with its configured interval when a
    /// channel first lands there.
    fn queue_for(&mut self, domain: &str) -> &mut DomainQueue {
        let interval = self
            .intervals
            .get(domain)
            .copied()
            .unwrap_or(self.default_interval);
        self.queues
            .entry(domain.to_string())
            .or_insert_with(|| DomainQueue::new(domain, interval))
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.queues.values().any(|q| q.contains(name))
            || self.probing.values().any(|p| p.entry.channel.name == name)
            || self.active.values().any(|a| a.channel.name == name)
    }

    /// Put a probed entry back in its queue.
    ///
    /// The original position is restored only when the channel still belongs
    /// to the queue it was taken from; a sequence number from one queue means
    /// nothing in another, so a relocated channel is appended fresh.
    fn requeue(&mut self, entry: QueuedChannel, origin_domain: &str) {
        let domain = entry.channel.domain();
        if domain == origin_domain {
            self.queue_for(&domain).reinsert(entry);
        } else {
            self.queue_for(&domain).push(entry.channel);
        }
    }
}

struct Inner {
    output_dir: PathBuf,
    probe: Arc<dyn StreamProbe>,
    remuxer: Arc<dyn Remuxer>,
    events: EventBroadcaster,
    state: Mutex<SchedulerState>,
    shutdown: CancellationToken,
}

/// The scheduling core.
///
/// Cheap to clone; all clones share one state. Construction requires a tokio
/// runtime since the clock task (unless disabled) and capture workers are
/// spawned on it.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        probe: Arc<dyn StreamProbe>,
        remuxer: Arc<dyn Remuxer>,
    ) -> Self {
        let state = SchedulerState {
            queues: HashMap::new(),
            probing: HashMap::new(),
            active: HashMap::new(),
            intervals: config.domain_poll_intervals.clone(),
            default_interval: config.default_poll_interval_secs,
            running: false,
            started_once: false,
        };

        let inner = Arc::new(Inner {
            output_dir: config.output_dir.clone(),
            probe,
            remuxer,
            events: EventBroadcaster::new(),
            state: Mutex::new(state),
            shutdown: CancellationToken::new(),
        });

        if !config.external_clock {
            let clock_inner = inner.clone();
            let period = config.tick_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;

                        _ = clock_inner.shutdown.cancelled() => {
                            debug!("scheduler clock stopped");
                            break;
                        }
                        _ = ticker.tick() => clock_inner.tick(),
                    }
                }
            });
        }

        Self { inner }
    }

    /// Subscribe to scheduler events.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<LooperEvent> {
        self.inner.events.subscribe()
    }

    /// Get the event broadcaster for external use.
    pub fn event_broadcaster(&self) -> &EventBroadcaster {
        &self.inner.events
    }

    /// Begin scheduling.
    ///
    /// On the very first start, one selection round runs immediately for
    /// every queue so the first check is not delayed by a full poll
    /// interval.
    pub fn start(&self) {
        let selected = {
            let mut st = self.inner.state.lock();
            if st.running {
                return;
            }
            st.running = true;
            if st.started_once {
                Vec::new()
            } else {
                st.started_once = true;
                let now = Utc::now();
                let mut selected = Vec::new();
                for queue in st.queues.values_mut() {
                    if let Some(entry) = queue.select(now) {
                        selected.push(entry);
                    }
                }
                selected
            }
        };

        info!("scheduler started");
        for entry in selected {
            self.inner.dispatch(entry, false);
        }
    }

    /// Stop scheduling new probes. Active captures keep running.
    pub fn pause(&self) {
        self.inner.state.lock().running = false;
        info!("scheduler paused");
    }

    /// Pause and cancel every active capture, waiting for each worker to
    /// finalize its file and requeue its channel.
    pub async fn stop(&self) {
        let handles = {
            let mut st = self.inner.state.lock();
            st.running = false;
            let mut handles = Vec::new();
            for active in st.active.values_mut() {
                active.cancel.cancel();
                if let Some(handle) = active.handle.take() {
                    handles.push(handle);
                }
            }
            handles
        };

        let count = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        info!(cancelled = count, "scheduler stopped");
    }

    /// Stop, then tear down the clock task.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Advance the scheduler by one clock tick.
    ///
    /// Driven by the internal clock task; exposed for embedders that own the
    /// clock (the original design drove this from a GUI timer).
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Add a channel to the rotation.
    pub fn add_channel(&self, channel: Channel) -> Result<()> {
        let mut st = self.inner.state.lock();
        if st.name_in_use(&channel.name) {
            return Err(Error::Duplicate(channel.name));
        }
        let domain = channel.domain();
        st.queue_for(&domain).push(channel);
        Ok(())
    }

    /// Remove a channel wherever it currently lives, cancelling its capture
    /// if one is running. Idempotent: returns whether anything was removed.
    pub async fn remove_channel(&self, name: &str) -> bool {
        enum Removed {
            Done,
            Capture(CancellationToken, Option<JoinHandle<()>>),
            Missing,
        }

        let removed = {
            let mut st = self.inner.state.lock();
            if let Some(queue) = st.queues.values_mut().find(|q| q.contains(name)) {
                queue.remove(name);
                Removed::Done
            } else if let Some(key) = probing_key(&st, name) {
                st.probing.remove(&key);
                Removed::Done
            } else if let Some(key) = active_key(&st, name) {
                let mut active = st
                    .active
                    .remove(&key)
                    .unwrap_or_else(|| unreachable!("key came from the map"));
                Removed::Capture(active.cancel.clone(), active.handle.take())
            } else {
                Removed::Missing
            }
        };

        match removed {
            Removed::Done => true,
            Removed::Capture(cancel, handle) => {
                cancel.cancel();
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
                true
            }
            Removed::Missing => false,
        }
    }

    /// Replace a channel's configuration wherever it currently lives.
    ///
    /// Run-scoped state (`waited`, `snoozed_until`, queue position) is
    /// preserved; only the user-configured fields come from `new`. A domain
    /// change relocates the channel to the target queue.
    pub fn edit_channel(&self, old_name: &str, new: Channel) -> Result<()> {
        let (old, renamed_to) = {
            let mut st = self.inner.state.lock();
            if new.name != old_name && st.name_in_use(&new.name) {
                return Err(Error::Duplicate(new.name));
            }

            let old_domain = st
                .queues
                .iter()
                .find(|(_, q)| q.contains(old_name))
                .map(|(domain, _)| domain.clone());

            if let Some(old_domain) = old_domain {
                let mut entry = st
                    .queues
                    .get_mut(&old_domain)
                    .and_then(|q| q.take(old_name))
                    .unwrap_or_else(|| unreachable!("queue was just found by name"));
                entry.channel = apply_edit(entry.channel, &new);
                let new_domain = entry.channel.domain();
                if new_domain == old_domain {
                    st.queue_for(&new_domain).reinsert(entry);
                } else {
                    st.queue_for(&new_domain).push(entry.channel);
                }
            } else if let Some(key) = probing_key(&st, old_name) {
                let probing = st
                    .probing
                    .get_mut(&key)
                    .unwrap_or_else(|| unreachable!("key came from the map"));
                probing.entry.channel =
                    apply_edit(probing.entry.channel.clone(), &new);
            } else if let Some(key) = active_key(&st, old_name) {
                let active = st
                    .active
                    .get_mut(&key)
                    .unwrap_or_else(|| unreachable!("key came from the map"));
                active.channel = apply_edit(active.channel.clone(), &new);
            } else {
                return Err(Error::NotFound(old_name.to_string()));
            }

            (old_name.to_string(), new.name)
        };

        self.inner.events.publish(LooperEvent::ChannelEdited {
            old_name: old,
            new_name: renamed_to,
        });
        Ok(())
    }

    /// Exclude a channel from probing for `duration`.
    ///
    /// A capturing channel has its worker cancelled first; the partial
    /// capture is still finalized and the channel requeues already snoozed.
    pub fn snooze(&self, name: &str, duration: chrono::Duration) -> Result<()> {
        let until = Utc::now() + duration;
        {
            let mut st = self.inner.state.lock();
            if let Some(channel) = st
                .queues
                .values_mut()
                .find_map(|q| q.get_mut(name))
            {
                channel.snoozed_until = Some(until);
            } else if let Some(key) = probing_key(&st, name) {
                if let Some(probing) = st.probing.get_mut(&key) {
                    probing.entry.channel.snoozed_until = Some(until);
                }
            } else if let Some(key) = active_key(&st, name) {
                if let Some(active) = st.active.get_mut(&key) {
                    active.channel.snoozed_until = Some(until);
                    active.cancel.cancel();
                }
            } else {
                return Err(Error::NotFound(name.to_string()));
            }
        }

        self.inner.events.publish(LooperEvent::ChannelSnoozed {
            name: name.to_string(),
            until,
        });
        Ok(())
    }

    /// Snooze by whole hours, matching the original 8/16/24-hour presets.
    pub fn snooze_hours(&self, name: &str, hours: i64) -> Result<()> {
        self.snooze(name, chrono::Duration::hours(hours))
    }

    /// Clear a channel's snooze immediately, independent of the tick sweep.
    pub fn unsnooze(&self, name: &str) -> Result<()> {
        {
            let mut st = self.inner.state.lock();
            if let Some(channel) = st.queues.values_mut().find_map(|q| q.get_mut(name)) {
                channel.snoozed_until = None;
            } else if let Some(key) = probing_key(&st, name) {
                if let Some(probing) = st.probing.get_mut(&key) {
                    probing.entry.channel.snoozed_until = None;
                }
            } else if let Some(key) = active_key(&st, name) {
                if let Some(active) = st.active.get_mut(&key) {
                    active.channel.snoozed_until = None;
                }
            } else {
                return Err(Error::NotFound(name.to_string()));
            }
        }

        self.inner.events.publish(LooperEvent::ChannelUnsnoozed {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Force an immediate, out-of-band probe for one channel.
    ///
    /// Bypasses the aging algorithm and leaves every other queue member's
    /// bookkeeping untouched. Implies an unsnooze. A channel that is already
    /// probing or capturing is left alone.
    pub fn check_now(&self, name: &str) -> Result<()> {
        let mut entry = {
            let mut st = self.inner.state.lock();
            if probing_key(&st, name).is_some() || active_key(&st, name).is_some() {
                return Ok(());
            }
            let Some(entry) = st
                .queues
                .values_mut()
                .find(|q| q.contains(name))
                .and_then(|q| q.take(name))
            else {
                return Err(Error::NotFound(name.to_string()));
            };
            entry
        };
        if entry.channel.snoozed_until.take().is_some() {
            self.inner.events.publish(LooperEvent::ChannelUnsnoozed {
                name: entry.channel.name.clone(),
            });
        }
        self.inner.dispatch(entry, true);
        Ok(())
    }

    /// Change a domain's poll interval, creating the setting for future
    /// queues and updating a live queue in place.
    pub fn set_poll_interval(&self, domain: &str, secs: u64) {
        let mut st = self.inner.state.lock();
        st.intervals.insert(domain.to_string(), secs);
        if let Some(queue) = st.queues.get_mut(domain) {
            queue.poll_interval_secs = secs;
        }
    }

    /// Names of channels currently being captured.
    pub fn active_names(&self) -> Vec<String> {
        let st = self.inner.state.lock();
        st.active.values().map(|a| a.channel.name.clone()).collect()
    }

    /// Snapshot of the queued channels for one domain, in insertion order.
    pub fn queued(&self, domain: &str) -> Vec<Channel> {
        let st = self.inner.state.lock();
        st.queues
            .get(domain)
            .map(|q| q.channels().cloned().collect())
            .unwrap_or_default()
    }

    /// Domains with a queue, whether or not it currently has channels.
    pub fn domains(&self) -> Vec<String> {
        let st = self.inner.state.lock();
        let mut domains: Vec<String> = st.queues.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Snapshot of every channel the scheduler owns, wherever it currently
    /// lives: queued, mid-probe, or capturing.
    ///
    /// This is the roster persistence must save. Probes run on detached
    /// tasks, so at any instant a channel can be in none of the queues; a
    /// snapshot built from `queued` alone would silently drop it.
    pub fn channels(&self) -> Vec<Channel> {
        let st = self.inner.state.lock();
        let mut channels: Vec<Channel> = st
            .queues
            .values()
            .flat_map(|q| q.channels())
            .cloned()
            .collect();
        channels.extend(st.probing.values().map(|p| p.entry.channel.clone()));
        channels.extend(st.active.values().map(|a| a.channel.clone()));
        channels
    }

    /// Find a channel snapshot by name, wherever it lives.
    pub fn find_channel(&self, name: &str) -> Option<Channel> {
        let st = self.inner.state.lock();
        st.queues
            .values()
            .flat_map(|q| q.channels())
            .find(|c| c.name == name)
            .cloned()
            .or_else(|| {
                st.probing
                    .values()
                    .map(|p| &p.entry.channel)
                    .find(|c| c.name == name)
                    .cloned()
            })
            .or_else(|| {
                st.active
                    .values()
                    .map(|a| &a.channel)
                    .find(|c| c.name == name)
                    .cloned()
            })
    }
}

/// Dispatch-time key of the probing entry holding `name`, if any.
fn probing_key(st: &SchedulerState, name: &str) -> Option<String> {
    st.probing
        .iter()
        .find(|(_, p)| p.entry.channel.name == name)
        .map(|(key, _)| key.clone())
}

/// Dispatch-time key of the active capture holding `name`, if any.
fn active_key(st: &SchedulerState, name: &str) -> Option<String> {
    st.active
        .iter()
        .find(|(_, a)| a.channel.name == name)
        .map(|(key, _)| key.clone())
}

/// Merge user-configured fields from `new` over `current`, preserving
/// run-scoped scheduling state.
fn apply_edit(current: Channel, new: &Channel) -> Channel {
    Channel {
        name: new.name.clone(),
        address: new.address.clone(),
        priority: new.priority,
        rendition: new.rendition,
        snoozed_until: current.snoozed_until,
        waited: current.waited,
    }
}

impl Inner {
    /// One clock tick: age queues and channels, expire snoozes, and run a
    /// selection round for every queue whose interval elapsed.
    fn tick(self: &Arc<Self>) {
        let now = Utc::now();
        let (unsnoozed, selected) = {
            let mut st = self.state.lock();
            if !st.running {
                return;
            }

            let mut unsnoozed = Vec::new();
            let mut selected = Vec::new();
            for queue in st.queues.values_mut() {
                unsnoozed.extend(queue.tick(now));
            }
            for queue in st.queues.values_mut() {
                if queue.due() {
                    queue.queue_waited = 0;
                    if let Some(entry) = queue.select(now) {
                        selected.push(entry);
                    }
                }
            }
            (unsnoozed, selected)
        };

        for name in unsnoozed {
            debug!(channel = %name, "snooze expired");
            self.events.publish(LooperEvent::ChannelUnsnoozed { name });
        }
        for entry in selected {
            self.dispatch(entry, false);
        }
    }

    /// Move a selected channel into the probing set and run the probe on its
    /// own task.
    fn dispatch(self: &Arc<Self>, entry: QueuedChannel, manual: bool) {
        let key = entry.channel.name.clone();
        let address = entry.channel.address.clone();
        let preference = entry.channel.rendition;
        let origin_domain = entry.channel.domain();

        {
            let mut st = self.state.lock();
            st.probing.insert(
                key.clone(),
                ProbingChannel {
                    entry,
                    origin_domain,
                    manual,
                },
            );
        }

        let inner = self.clone();
        tokio::spawn(async move {
            let live = match inner.probe.probe(&address).await {
                Ok(renditions) => select_rendition(&renditions, preference).cloned(),
                Err(e) => {
                    debug!(channel = %key, error = %e, "probe failed");
                    None
                }
            };

            let Some(rendition) = live else {
                inner.probe_missed(&key);
                return;
            };

            match inner.probe.open(&rendition).await {
                Ok(reader) => inner.begin_capture(&key, rendition, reader),
                Err(e) => {
                    debug!(channel = %key, error = %e, "failed to open rendition");
                    inner.probe_missed(&key);
                }
            }
        });
    }

    /// A probe came back not-live (or failed, which is the same thing).
    ///
    /// The channel's wait counter was consumed by this round; it re-enters
    /// its queue at its original position with `waited` reset to 0.
    fn probe_missed(&self, key: &str) {
        let name = {
            let mut st = self.state.lock();
            let Some(probing) = st.probing.remove(key) else {
                return;
            };
            let mut entry = probing.entry;
            entry.channel.waited = 0;
            let name = entry.channel.name.clone();
            st.requeue(entry, &probing.origin_domain);
            name
        };

        self.events.publish(LooperEvent::ChannelOffline {
            name,
            timestamp: Utc::now(),
        });
    }

    /// A probe succeeded: hand the channel to a capture worker.
    fn begin_capture(self: &Arc<Self>, key: &str, rendition: Rendition, reader: RenditionReader) {
        let now = Utc::now();
        let live = {
            let mut st = self.state.lock();
            let Some(probing) = st.probing.remove(key) else {
                // Removed while the probe was in flight.
                return;
            };

            let mut entry = probing.entry;
            entry.channel.waited = 0;

            // Scheduling stopped or the channel was snoozed mid-probe:
            // requeue instead of starting a capture.
            if (!st.running && !probing.manual) || entry.channel.is_snoozed(now) {
                st.requeue(entry, &probing.origin_domain);
                None
            } else {
                let name = entry.channel.name.clone();
                let cancel = CancellationToken::new();
                let worker = CaptureWorker::new(
                    name.clone(),
                    rendition.clone(),
                    self.output_dir.clone(),
                    cancel.clone(),
                    self.events.clone(),
                    self.remuxer.clone(),
                );

                let inner = self.clone();
                let worker_key = key.to_string();
                let handle = tokio::spawn(async move {
                    let outcome = worker.run(reader).await;
                    inner.finish_capture(&worker_key, outcome);
                });

                st.active.insert(
                    key.to_string(),
                    ActiveCapture {
                        channel: entry.channel,
                        cancel,
                        handle: Some(handle),
                    },
                );
                Some((name, rendition.label))
            }
        };

        if let Some((name, label)) = live {
            info!(channel = %name, rendition = %label, "channel went live");
            self.events.publish(LooperEvent::ChannelLive {
                name,
                rendition: label,
                timestamp: now,
            });
        }
    }

    /// A capture worker finished: requeue the channel with reset wait state.
    fn finish_capture(&self, key: &str, outcome: CaptureOutcome) {
        let requeued = {
            let mut st = self.state.lock();
            st.active.remove(key).map(|active| {
                let mut channel = active.channel;
                channel.waited = 0;
                let name = channel.name.clone();
                let domain = channel.domain();
                st.queue_for(&domain).push(channel);
                name
            })
        };

        if requeued.is_none() {
            // The channel was removed while capturing; the file is still
            // finalized but nothing returns to the rotation.
            warn!(channel = %outcome.name, "capture ended for a removed channel");
        }

        info!(
            channel = %outcome.name,
            bytes = outcome.bytes_total,
            output = %outcome.output.display(),
            "capture ended"
        );
        self.events.publish(LooperEvent::CaptureEnded {
            name: requeued.unwrap_or_else(|| outcome.name.clone()),
            output: outcome.output,
            bytes_total: outcome.bytes_total,
            ended_at: outcome.ended_at,
        });
    }
}
