//! Bounded ring buffer of recent snapshots: append, drop the oldest entry
//! once capacity is exceeded.

use std::collections::VecDeque;

use chrono::{Duration as ChronoDuration, Utc};

use crate::model::Snapshot;

pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Default)]
pub struct History {
    buffer: VecDeque<Snapshot>,
    capacity: usize,
}

impl History {
    pub fn new() -> Self {
        History::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        History {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `snapshot`; drops the oldest entry once length exceeds capacity.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.buffer.push_back(snapshot);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.buffer.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> {
        self.buffer.iter()
    }

    /// Snapshots within `minutes` of wall-clock now. Cutoff is computed as
    /// `now - minutes*60s`, never by naively subtracting from `now.minute()`
    /// (the source's buggy approach, explicitly rejected — see SPEC_FULL.md §9).
    pub fn recent(&self, minutes: i64) -> Vec<&Snapshot> {
        let cutoff = Utc::now() - ChronoDuration::seconds(minutes * 60);
        self.buffer.iter().filter(|s| s.timestamp >= cutoff).collect()
    }

    /// The most recent `n` snapshots, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&Snapshot> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_drops_oldest_on_overflow() {
        let mut h = History::with_capacity(2);
        h.push(Snapshot::empty(Utc::now()));
        h.push(Snapshot::empty(Utc::now()));
        let mut third = Snapshot::empty(Utc::now());
        third.cpu_percent = 99.0;
        h.push(third);
        assert_eq!(h.len(), 2);
        assert_eq!(h.last().unwrap().cpu_percent, 99.0);
    }

    #[test]
    fn recent_filters_by_window() {
        let mut h = History::new();
        let old = Snapshot::empty(Utc::now() - ChronoDuration::minutes(30));
        let fresh = Snapshot::empty(Utc::now());
        h.push(old);
        h.push(fresh);
        let recent = h.recent(5);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn last_n_returns_most_recent_in_order() {
        let mut h = History::new();
        for i in 0..5 {
            let mut s = Snapshot::empty(Utc::now());
            s.process_count = i;
            h.push(s);
        }
        let last3 = h.last_n(3);
        assert_eq!(last3.len(), 3);
        assert_eq!(last3[2].process_count, 4);
    }
}
