//! Reply playback queue
//!
//! Reply payloads play strictly in arrival order, one at a time. The queue
//! only tracks bookkeeping; the actual decode/play happens on an
//! [`AudioPlayer`](crate::audio::AudioPlayer) and reports back by ticket.

use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Identifies one queued payload across the async decode/play boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// How a payload's playback ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    DecodeFailed(String),
}

/// Completion report from the player
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackReport {
    pub ticket: Ticket,
    pub outcome: PlaybackOutcome,
}

/// One synthesized reply payload
#[derive(Clone, Debug)]
pub struct PlaybackItem {
    pub ticket: Ticket,
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

/// What the queue wants after a completion report
#[derive(Debug)]
pub enum Advance {
    /// Report for an item that is no longer current; ignore it
    Stale,
    /// Start this item next
    Next(PlaybackItem),
    /// Nothing left, playback went idle on its own
    Drained,
}

/// FIFO of reply payloads with at most one in flight
///
/// Nothing is ever discarded except by [`PlaybackQueue::interrupt`].
pub struct PlaybackQueue {
    pending: VecDeque<PlaybackItem>,
    current: Option<Ticket>,
    next_ticket: u64,
    /// Backlog size that triggers a warning
    backlog_warning: usize,
    backlog_warned: bool,
    played: u64,
    failed: u64,
}

impl PlaybackQueue {
    /// Create a queue that warns once more than `backlog_warning` items wait
    pub fn new(backlog_warning: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            next_ticket: 1,
            backlog_warning: backlog_warning.max(1),
            backlog_warned: false,
            played: 0,
            failed: 0,
        }
    }

    /// Append a payload
    ///
    /// Returns the item to start immediately when nothing is playing.
    pub fn enqueue(&mut self, payload: Vec<u8>, now: Instant) -> Option<PlaybackItem> {
        let item = PlaybackItem {
            ticket: Ticket(self.next_ticket),
            payload,
            received_at: now,
        };
        self.next_ticket += 1;

        if self.current.is_none() {
            self.current = Some(item.ticket);
            return Some(item);
        }

        self.pending.push_back(item);
        if self.pending.len() > self.backlog_warning && !self.backlog_warned {
            self.backlog_warned = true;
            warn!(
                "Playback is falling behind, {} reply items waiting",
                self.pending.len()
            );
        }
        None
    }

    /// Record the outcome for `ticket` and decide what plays next
    pub fn complete(&mut self, report: &PlaybackReport) -> Advance {
        if self.current != Some(report.ticket) {
            debug!("Ignoring report for superseded {:?}", report.ticket);
            return Advance::Stale;
        }

        match &report.outcome {
            PlaybackOutcome::Finished => self.played += 1,
            PlaybackOutcome::DecodeFailed(error) => {
                self.failed += 1;
                warn!("Skipping undecodable reply {:?}: {}", report.ticket, error);
            }
        }

        match self.pending.pop_front() {
            Some(item) => {
                if self.pending.len() <= self.backlog_warning {
                    self.backlog_warned = false;
                }
                self.current = Some(item.ticket);
                Advance::Next(item)
            }
            None => {
                self.current = None;
                Advance::Drained
            }
        }
    }

    /// Stop the current item and drop everything queued
    ///
    /// Returns how many items were discarded, including the current one.
    pub fn interrupt(&mut self) -> usize {
        let dropped = self.pending.len() + usize::from(self.current.is_some());
        self.pending.clear();
        self.current = None;
        self.backlog_warned = false;
        if dropped > 0 {
            debug!("Playback interrupted, {} item(s) dropped", dropped);
        }
        dropped
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<Ticket> {
        self.current
    }

    /// Items waiting behind the current one
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    pub fn played(&self) -> u64 {
        self.played
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(ticket: Ticket) -> PlaybackReport {
        PlaybackReport {
            ticket,
            outcome: PlaybackOutcome::Finished,
        }
    }

    fn failed(ticket: Ticket) -> PlaybackReport {
        PlaybackReport {
            ticket,
            outcome: PlaybackOutcome::DecodeFailed("corrupt".into()),
        }
    }

    #[test]
    fn test_first_item_starts_immediately() {
        let now = Instant::now();
        let mut queue = PlaybackQueue::default();

        let first = queue.enqueue(vec![1], now).unwrap();
        assert!(queue.is_playing());
        assert_eq!(queue.current(), Some(first.ticket));

        assert!(queue.enqueue(vec![2], now).is_none());
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_plays_in_enqueue_order() {
        let now = Instant::now();
        let mut queue = PlaybackQueue::default();

        let mut playing = queue.enqueue(vec![0], now).unwrap();
        for i in 1..5u8 {
            assert!(queue.enqueue(vec![i], now).is_none());
        }

        let mut order = vec![playing.payload[0]];
        loop {
            match queue.complete(&finished(playing.ticket)) {
                Advance::Next(item) => {
                    order.push(item.payload[0]);
                    playing = item;
                }
                Advance::Drained => break,
                Advance::Stale => panic!("unexpected stale report"),
            }
        }

        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.played(), 5);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_decode_failure_skips_to_next() {
        let now = Instant::now();
        let mut queue = PlaybackQueue::default();
        let n = 6u8;
        let k = 2u8;

        let mut playing = queue.enqueue(vec![0], now).unwrap();
        for i in 1..n {
            queue.enqueue(vec![i], now);
        }

        let mut heard = Vec::new();
        loop {
            let report = if playing.payload[0] == k {
                failed(playing.ticket)
            } else {
                heard.push(playing.payload[0]);
                finished(playing.ticket)
            };
            match queue.complete(&report) {
                Advance::Next(item) => playing = item,
                Advance::Drained => break,
                Advance::Stale => panic!("unexpected stale report"),
            }
        }

        assert_eq!(heard, vec![0, 1, 3, 4, 5]);
        assert_eq!(queue.played(), (n - 1) as u64);
        assert_eq!(queue.failed(), 1);
    }

    #[test]
    fn test_interrupt_clears_everything() {
        let now = Instant::now();
        let mut queue = PlaybackQueue::default();
        let first = queue.enqueue(vec![1], now).unwrap();
        queue.enqueue(vec![2], now);
        queue.enqueue(vec![3], now);

        assert_eq!(queue.interrupt(), 3);
        assert!(queue.is_idle());
        assert!(!queue.is_playing());

        // The interrupted item finishing later changes nothing
        assert!(matches!(queue.complete(&finished(first.ticket)), Advance::Stale));
        assert!(queue.is_idle());

        assert_eq!(queue.interrupt(), 0);
    }

    #[test]
    fn test_tickets_are_not_reused_after_interrupt() {
        let now = Instant::now();
        let mut queue = PlaybackQueue::default();
        let old = queue.enqueue(vec![1], now).unwrap();
        queue.interrupt();
        let new = queue.enqueue(vec![2], now).unwrap();

        assert_ne!(old.ticket, new.ticket);
        assert!(matches!(queue.complete(&finished(old.ticket)), Advance::Stale));
        assert_eq!(queue.current(), Some(new.ticket));
    }

    #[test]
    fn test_backlog_never_drops_items() {
        let now = Instant::now();
        let mut queue = PlaybackQueue::new(2);
        let mut playing = queue.enqueue(vec![0], now).unwrap();
        for i in 1..10u8 {
            assert!(queue.enqueue(vec![i], now).is_none());
        }
        assert_eq!(queue.pending_len(), 9);

        let mut order = vec![playing.payload[0]];
        while let Advance::Next(item) = queue.complete(&finished(playing.ticket)) {
            order.push(item.payload[0]);
            playing = item;
        }
        assert_eq!(order, (0..10u8).collect::<Vec<_>>());
        assert_eq!(queue.played(), 10);
    }
}
