//! The four named session timers
//!
//! Timers are plain deadlines owned by the session. Nothing runs in the
//! background: the runner sleeps until [`TimerSet::next_deadline`] and then
//! takes expired timers one at a time, so a timer cancelled or re-armed by the
//! delivery of an earlier one is never delivered.

use crate::config::TimerConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Silence long enough to close the open segment
    SilenceConfirm,
    /// Extended silence while listening
    LongSilence,
    /// Hard cap on one segment
    MaxSpeaking,
    /// No voice for too long, the session ends
    Inactivity,
}

impl TimerKind {
    /// Delivery order for timers expiring at the same instant
    pub const ALL: [TimerKind; 4] = [
        TimerKind::SilenceConfirm,
        TimerKind::MaxSpeaking,
        TimerKind::LongSilence,
        TimerKind::Inactivity,
    ];

    fn index(self) -> usize {
        match self {
            TimerKind::SilenceConfirm => 0,
            TimerKind::MaxSpeaking => 1,
            TimerKind::LongSilence => 2,
            TimerKind::Inactivity => 3,
        }
    }

    /// Configured delay for this timer
    pub fn duration(self, config: &TimerConfig) -> Duration {
        let ms = match self {
            TimerKind::SilenceConfirm => config.silence_confirm_ms,
            TimerKind::LongSilence => config.long_silence_ms,
            TimerKind::MaxSpeaking => config.max_speaking_ms,
            TimerKind::Inactivity => config.inactivity_ms,
        };
        Duration::from_millis(ms)
    }
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKind::SilenceConfirm => write!(f, "silence-confirm"),
            TimerKind::LongSilence => write!(f, "long-silence"),
            TimerKind::MaxSpeaking => write!(f, "max-speaking"),
            TimerKind::Inactivity => write!(f, "inactivity"),
        }
    }
}

/// Armed deadlines, at most one per kind
#[derive(Clone, Debug, Default)]
pub struct TimerSet {
    deadlines: [Option<Instant>; 4],
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire at `at`, replacing any earlier deadline
    pub fn arm(&mut self, kind: TimerKind, at: Instant) {
        self.deadlines[kind.index()] = Some(at);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind.index()] = None;
    }

    pub fn cancel_all(&mut self) {
        self.deadlines = [None; 4];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].is_some()
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines[kind.index()]
    }

    /// Currently armed kinds, in delivery order
    pub fn armed(&self) -> Vec<TimerKind> {
        TimerKind::ALL
            .into_iter()
            .filter(|kind| self.is_armed(*kind))
            .collect()
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return the earliest timer due at `now`
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerKind> {
        let kind = TimerKind::ALL
            .into_iter()
            .filter_map(|kind| self.deadline(kind).map(|at| (at, kind)))
            .filter(|(at, _)| *at <= now)
            .min_by_key(|(at, kind)| (*at, kind.index()))
            .map(|(_, kind)| kind)?;
        self.cancel(kind);
        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_arm_and_cancel() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Inactivity, now + ms(100));
        timers.arm(TimerKind::LongSilence, now + ms(50));
        assert_eq!(timers.next_deadline(), Some(now + ms(50)));

        timers.cancel(TimerKind::LongSilence);
        assert!(!timers.is_armed(TimerKind::LongSilence));
        assert_eq!(timers.next_deadline(), Some(now + ms(100)));

        timers.cancel_all();
        assert!(timers.armed().is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Inactivity, now + ms(100));
        timers.arm(TimerKind::Inactivity, now + ms(500));

        assert_eq!(timers.take_expired(now + ms(200)), None);
        assert_eq!(timers.take_expired(now + ms(500)), Some(TimerKind::Inactivity));
        assert!(!timers.is_armed(TimerKind::Inactivity));
    }

    #[test]
    fn test_expired_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Inactivity, now + ms(10));
        timers.arm(TimerKind::SilenceConfirm, now + ms(20));

        let later = now + ms(30);
        assert_eq!(timers.take_expired(later), Some(TimerKind::Inactivity));
        assert_eq!(timers.take_expired(later), Some(TimerKind::SilenceConfirm));
        assert_eq!(timers.take_expired(later), None);
    }

    #[test]
    fn test_same_deadline_prefers_max_speaking_over_inactivity() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerKind::Inactivity, now);
        timers.arm(TimerKind::MaxSpeaking, now);
        assert_eq!(timers.take_expired(now), Some(TimerKind::MaxSpeaking));
    }

    #[test]
    fn test_durations_follow_config() {
        let config = TimerConfig::default();
        assert_eq!(TimerKind::SilenceConfirm.duration(&config), ms(350));
        assert_eq!(TimerKind::Inactivity.duration(&config), ms(30_000));
    }
}
