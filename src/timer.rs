//! Deadline queue for debounce and gesture windows.
//!
//! Each key holds at most one pending deadline. Scheduling an existing key
//! restarts it, so a stale expiry can never fire after a restart or cancel.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

use smallvec::SmallVec;

#[derive(Debug)]
pub struct TimerQueue<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `key` to fire at `due`, replacing any pending deadline.
    pub fn schedule(&mut self, key: K, due: Instant) {
        self.deadlines.insert(key, due);
    }

    /// Returns whether a deadline was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns every key due at or before `now`, earliest first.
    pub fn take_expired(&mut self, now: Instant) -> SmallVec<[K; 4]> {
        let mut expired: SmallVec<[(Instant, K); 4]> = self
            .deadlines
            .iter()
            .filter(|(_, due)| **due <= now)
            .map(|(key, due)| (*due, *key))
            .collect();
        if expired.is_empty() {
            return SmallVec::new();
        }
        expired.sort_unstable();
        for (_, key) in &expired {
            self.deadlines.remove(key);
        }
        expired.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_schedule_restarts_deadline() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(1u8, t0 + Duration::from_millis(60));
        timers.schedule(1u8, t0 + Duration::from_millis(100));

        assert!(timers.take_expired(t0 + Duration::from_millis(80)).is_empty());
        assert_eq!(
            timers.take_expired(t0 + Duration::from_millis(100)).as_slice(),
            &[1]
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_prevents_expiry() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(7u8, t0);
        assert!(timers.cancel(&7));
        assert!(!timers.cancel(&7));
        assert!(timers.take_expired(t0 + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_expired_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(3u8, t0 + Duration::from_millis(30));
        timers.schedule(1u8, t0 + Duration::from_millis(10));
        timers.schedule(2u8, t0 + Duration::from_millis(20));
        timers.schedule(9u8, t0 + Duration::from_millis(500));

        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_millis(10)));
        assert_eq!(
            timers.take_expired(t0 + Duration::from_millis(50)).as_slice(),
            &[1, 2, 3]
        );
        assert!(timers.is_pending(&9));
    }
}
