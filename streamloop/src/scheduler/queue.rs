//! Per-domain fairness queue.
//!
//! Channels sharing an origin domain compete inside one `DomainQueue`; the
//! queue ages every idle channel once per tick and, when its own poll
//! interval elapses, hands out the single most overdue eligible channel.
//! Selection is deterministic: aging score descending, insertion order as
//! the tie break.

use chrono::{DateTime, Utc};

use crate::channel::Channel;

/// How many domain poll intervals a channel waits per unit of priority
/// before it overtakes longer-idle but lower-priority peers.
pub const AGING_MULTIPLIER: u64 = 3;

/// A channel plus the insertion sequence that anchors tie-breaking.
///
/// The sequence survives failed probe rounds: a channel that leaves the
/// queue for a probe and comes back keeps its original position relative to
/// its peers.
#[derive(Debug, Clone)]
pub struct QueuedChannel {
    pub channel: Channel,
    pub seq: u64,
}

impl QueuedChannel {
    /// Aging score: `waited - pollInterval * 3 * priority`.
    ///
    /// Higher means more overdue. The subtrahend is the channel's deadline in
    /// ticks; priority 1 channels reach eligibility fastest.
    pub fn score(&self, poll_interval_secs: u64) -> i64 {
        self.channel.waited as i64
            - (poll_interval_secs * AGING_MULTIPLIER * self.channel.priority as u64) as i64
    }
}

/// The ordered set of channels sharing one resolved domain.
#[derive(Debug)]
pub struct DomainQueue {
    domain: String,
    /// Configured spacing between probe attempts for this domain as a whole.
    pub poll_interval_secs: u64,
    /// Ticks elapsed since this queue last triggered a selection round.
    pub queue_waited: u64,
    entries: Vec<QueuedChannel>,
    next_seq: u64,
}

impl DomainQueue {
    pub fn new(domain: impl Into<String>, poll_interval_secs: u64) -> Self {
        Self {
            domain: domain.into(),
            poll_interval_secs,
            queue_waited: 0,
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.channel.name == name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.entries.iter().map(|e| &e.channel)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.entries
            .iter_mut()
            .find(|e| e.channel.name == name)
            .map(|e| &mut e.channel)
    }

    /// Append a channel at the back of the insertion order.
    pub fn push(&mut self, channel: Channel) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueuedChannel { channel, seq });
    }

    /// Put a channel back at its original insertion position.
    ///
    /// Used after a probe round; keeps tie-breaking stable across failed
    /// rounds. Entries are always kept sorted by sequence.
    pub fn reinsert(&mut self, entry: QueuedChannel) {
        let at = self
            .entries
            .partition_point(|existing| existing.seq < entry.seq);
        self.entries.insert(at, entry);
    }

    /// Remove a channel by name, discarding its queue position.
    pub fn remove(&mut self, name: &str) -> Option<Channel> {
        self.take(name).map(|e| e.channel)
    }

    /// Remove a channel by name, keeping its queue position for reinsertion.
    pub fn take(&mut self, name: &str) -> Option<QueuedChannel> {
        let idx = self.entries.iter().position(|e| e.channel.name == name)?;
        Some(self.entries.remove(idx))
    }

    /// Advance one tick: age the queue counter, expire due snoozes, and age
    /// every idle channel's wait counter.
    ///
    /// Returns the names of channels whose snooze expired this tick, so the
    /// caller can emit unsnoozed notifications.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.queue_waited += 1;

        let mut unsnoozed = Vec::new();
        for entry in &mut self.entries {
            match entry.channel.snoozed_until {
                Some(until) if now >= until => {
                    entry.channel.snoozed_until = None;
                    unsnoozed.push(entry.channel.name.clone());
                }
                Some(_) => {}
                None => entry.channel.waited += 1,
            }
        }
        unsnoozed
    }

    /// Whether this queue's poll interval has elapsed.
    pub fn due(&self) -> bool {
        self.queue_waited >= self.poll_interval_secs
    }

    /// Pick and remove the most deserving eligible channel.
    ///
    /// Snoozed channels are skipped; if every channel is snoozed (or the
    /// queue is empty) this is a silent no-op. Losers keep their aged
    /// `waited` untouched.
    pub fn select(&mut self, now: DateTime<Utc>) -> Option<QueuedChannel> {
        let mut best: Option<usize> = None;

        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.channel.is_snoozed(now) {
                continue;
            }
            let better = match best {
                None => true,
                // Strictly greater: earlier insertion wins score ties since
                // entries are kept in sequence order.
                Some(current) => {
                    entry.score(self.poll_interval_secs)
                        > self.entries[current].score(self.poll_interval_secs)
                }
            };
            if better {
                best = Some(idx);
            }
        }

        best.map(|idx| self.entries.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_probe::RenditionPreference;

    fn channel(name: &str, priority: u32) -> Channel {
        Channel::new(
            name,
            &format!("https://live.example.com/{name}"),
            priority,
            RenditionPreference::Best,
        )
        .unwrap()
    }

    fn queue_with(priorities: &[(&str, u32)]) -> DomainQueue {
        let mut q = DomainQueue::new("live.example.com", 30);
        for (name, priority) in priorities {
            q.push(channel(name, *priority));
        }
        q
    }

    #[test]
    fn single_channel_is_always_selected() {
        let mut q = queue_with(&[("alice", 1)]);
        let chosen = q.select(Utc::now()).unwrap();
        assert_eq!(chosen.channel.name, "alice");
        assert!(q.is_empty());
    }

    #[test]
    fn empty_queue_selects_nothing() {
        let mut q = DomainQueue::new("live.example.com", 30);
        assert!(q.select(Utc::now()).is_none());
    }

    #[test]
    fn largest_waited_wins_at_equal_priority() {
        let mut q = queue_with(&[("alice", 1), ("bob", 1), ("carol", 1)]);
        q.get_mut("bob").unwrap().waited = 50;
        q.get_mut("carol").unwrap().waited = 20;

        let chosen = q.select(Utc::now()).unwrap();
        assert_eq!(chosen.channel.name, "bob");
    }

    #[test]
    fn insertion_order_breaks_score_ties() {
        let mut q = queue_with(&[("alice", 1), ("bob", 1)]);
        q.get_mut("alice").unwrap().waited = 10;
        q.get_mut("bob").unwrap().waited = 10;

        let chosen = q.select(Utc::now()).unwrap();
        assert_eq!(chosen.channel.name, "alice");
    }

    #[test]
    fn snoozed_channel_is_never_selected() {
        let now = Utc::now();
        let mut q = queue_with(&[("alice", 1), ("bob", 1)]);
        q.get_mut("alice").unwrap().waited = 1_000_000;
        q.get_mut("alice").unwrap().snoozed_until = Some(now + chrono::Duration::days(365));

        let chosen = q.select(now).unwrap();
        assert_eq!(chosen.channel.name, "bob");

        // Only the snoozed one left: silent no-op.
        assert!(q.select(now).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn tick_ages_idle_and_expires_snoozes() {
        let now = Utc::now();
        let mut q = queue_with(&[("alice", 1), ("bob", 1)]);
        q.get_mut("bob").unwrap().snoozed_until = Some(now - chrono::Duration::seconds(1));

        let unsnoozed = q.tick(now);
        assert_eq!(unsnoozed, vec!["bob".to_string()]);
        assert_eq!(q.queue_waited, 1);
        // Idle channel aged; the expiring one did not also age this tick.
        assert_eq!(
            q.channels().find(|c| c.name == "alice").unwrap().waited,
            1
        );
        assert_eq!(q.channels().find(|c| c.name == "bob").unwrap().waited, 0);

        // Next tick, the unsnoozed channel ages normally.
        let unsnoozed = q.tick(now);
        assert!(unsnoozed.is_empty());
        assert_eq!(q.channels().find(|c| c.name == "bob").unwrap().waited, 1);
    }

    #[test]
    fn tick_does_not_age_future_snoozes() {
        let now = Utc::now();
        let mut q = queue_with(&[("alice", 1)]);
        q.get_mut("alice").unwrap().snoozed_until = Some(now + chrono::Duration::hours(8));

        q.tick(now);
        assert_eq!(q.channels().next().unwrap().waited, 0);
        assert!(q.channels().next().unwrap().snoozed_until.is_some());
    }

    #[test]
    fn reinsert_restores_original_position() {
        let mut q = queue_with(&[("alice", 1), ("bob", 1), ("carol", 1)]);

        let taken = q.take("bob").unwrap();
        assert_eq!(taken.seq, 1);
        q.reinsert(taken);

        let names: Vec<_> = q.channels().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn due_follows_poll_interval() {
        let now = Utc::now();
        let mut q = DomainQueue::new("live.example.com", 3);
        q.push(channel("alice", 1));

        assert!(!q.due());
        q.tick(now);
        q.tick(now);
        assert!(!q.due());
        q.tick(now);
        assert!(q.due());
        q.queue_waited = 0;
        assert!(!q.due());
    }

    /// The exact scoring scenario: interval 30, priorities {1, 1, 2}, thirty
    /// ticks of aging. score = waited - 30 * 3 * priority.
    #[test]
    fn scoring_formula_scenario() {
        let now = Utc::now();
        let mut q = queue_with(&[("alice", 1), ("bob", 1), ("low", 2)]);
        for _ in 0..30 {
            q.tick(now);
        }

        // waited == 30 everywhere: scores are -60, -60, -150; the first
        // priority-1 channel wins on the insertion-order tie break.
        let entry = q.take("alice").unwrap();
        assert_eq!(entry.score(30), 30 - 30 * 3 * 1);
        q.reinsert(entry);
        let entry = q.take("low").unwrap();
        assert_eq!(entry.score(30), 30 - 30 * 3 * 2);
        q.reinsert(entry);

        let chosen = q.select(now).unwrap();
        assert_eq!(chosen.channel.name, "alice");
        q.reinsert(chosen);

        // The priority-2 channel is selected first only once its accumulated
        // wait pushes its score past the others'.
        q.get_mut("low").unwrap().waited = 250; // 250 - 180 = 70 > -60
        let chosen = q.select(now).unwrap();
        assert_eq!(chosen.channel.name, "low");
    }

    #[test]
    fn failed_probe_round_trip_keeps_losers_aged() {
        let now = Utc::now();
        let mut q = queue_with(&[("alice", 1), ("bob", 1)]);
        for _ in 0..5 {
            q.tick(now);
        }

        let mut chosen = q.select(now).unwrap();
        assert_eq!(chosen.channel.name, "alice");

        // Probe failed: consumed this round.
        chosen.channel.waited = 0;
        q.reinsert(chosen);

        assert_eq!(q.channels().find(|c| c.name == "bob").unwrap().waited, 5);
        let chosen = q.select(now).unwrap();
        assert_eq!(chosen.channel.name, "bob");
    }
}
