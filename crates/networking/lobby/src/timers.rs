use std::time::Instant;

/// Cancellable one-shot timers keyed by kind, checked against the tick clock.
///
/// At most one timer per kind is pending; scheduling a kind again moves its
/// deadline.
#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    entries: Vec<(K, Instant)>,
}

impl<K: Copy + PartialEq> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn schedule(&mut self, kind: K, at: Instant) {
        self.cancel(kind);
        self.entries.push((kind, at));
    }

    /// Returns `true` if a pending timer was removed.
    pub fn cancel(&mut self, kind: K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != kind);
        self.entries.len() != before
    }

    pub fn is_pending(&self, kind: K) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == kind)
    }

    pub fn deadline(&self, kind: K) -> Option<Instant> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == kind)
            .map(|(_, at)| *at)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(_, at)| *at).min()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<(K, Instant)> {
        let mut due = Vec::new();
        self.entries.retain(|(kind, at)| {
            if *at <= now {
                due.push((*kind, *at));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(_, at)| *at);
        due
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Copy + PartialEq> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        A,
        B,
    }

    #[test]
    fn rescheduling_replaces_deadline() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(Kind::A, start + Duration::from_millis(500));
        timers.schedule(Kind::A, start + Duration::from_millis(100));

        assert_eq!(timers.deadline(Kind::A), Some(start + Duration::from_millis(100)));
        assert_eq!(timers.due(start + Duration::from_millis(100)).len(), 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn due_returns_earliest_first_and_keeps_future() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(Kind::B, start + Duration::from_millis(20));
        timers.schedule(Kind::A, start + Duration::from_millis(10));

        assert!(timers.due(start).is_empty());
        let due = timers.due(start + Duration::from_millis(15));
        assert_eq!(due, vec![(Kind::A, start + Duration::from_millis(10))]);
        assert!(timers.is_pending(Kind::B));
        assert!(timers.cancel(Kind::B));
        assert!(!timers.cancel(Kind::B));
        assert_eq!(timers.next_deadline(), None);
    }
}
