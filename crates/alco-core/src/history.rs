//! Bounded concentration history for trend display

use alloc::vec::Vec;
use core::fmt;

use heapless::Deque;
use serde::{Deserialize, Serialize};

use crate::config::HISTORY_CAPACITY;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Wall-clock time of day with second resolution.
///
/// There is no date component: history that spans midnight appears to jump
/// backwards from 23:59:59 to 00:00:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
    second: u8,
}

impl TimeOfDay {
    /// Build from clock fields, returning `None` outside `00:00:00..=23:59:59`.
    pub const fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        if hour < 24 && minute < 60 && second < 60 {
            Some(Self {
                hour,
                minute,
                second,
            })
        } else {
            None
        }
    }

    /// Build from seconds since midnight; values past one day wrap.
    pub const fn from_seconds(seconds: u32) -> Self {
        let seconds = seconds % SECONDS_PER_DAY;
        Self {
            hour: (seconds / 3600) as u8,
            minute: ((seconds / 60) % 60) as u8,
            second: (seconds % 60) as u8,
        }
    }

    pub const fn seconds(&self) -> u32 {
        self.hour as u32 * 3600 + self.minute as u32 * 60 + self.second as u32
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Source of the wall-clock time stamped on each history entry
pub trait WallClock {
    fn now(&self) -> TimeOfDay;
}

/// One concentration sample stamped with the time it was taken
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: TimeOfDay,
    pub value: f32,
}

impl HistoryEntry {
    pub const fn new(timestamp: TimeOfDay, value: f32) -> Self {
        Self { timestamp, value }
    }
}

/// Fixed-capacity FIFO of [`HistoryEntry`].
///
/// Appending to a full history drops the oldest entry first, so the length
/// never exceeds [`HISTORY_CAPACITY`] and iteration is always oldest-first.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Deque<HistoryEntry, HISTORY_CAPACITY>,
}

impl History {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        // Cannot fail: a slot was freed above when the deque was full.
        let _ = self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seconds: u32) -> HistoryEntry {
        HistoryEntry::new(TimeOfDay::from_seconds(seconds), seconds as f32)
    }

    #[test]
    fn test_time_of_day_formatting() {
        assert_eq!(TimeOfDay::from_seconds(0).to_string(), "00:00:00");
        assert_eq!(TimeOfDay::from_seconds(3 * 3600 + 7 * 60 + 9).to_string(), "03:07:09");
        assert_eq!(TimeOfDay::new(23, 59, 59).unwrap().to_string(), "23:59:59");
        assert!(TimeOfDay::new(24, 0, 0).is_none());
    }

    #[test]
    fn test_time_of_day_wraps_at_midnight() {
        let late = TimeOfDay::from_seconds(SECONDS_PER_DAY - 1);
        let early = TimeOfDay::from_seconds(SECONDS_PER_DAY);
        assert_eq!(early, TimeOfDay::from_seconds(0));
        assert!(early < late);
    }

    #[test]
    fn test_history_fills_to_capacity() {
        let mut history = History::new();
        for i in 0..HISTORY_CAPACITY as u32 {
            history.push(entry(i));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.iter().next().unwrap().value, 0.0);
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let mut history = History::new();
        for i in 0..=HISTORY_CAPACITY as u32 {
            history.push(entry(i));
        }

        let entries = history.to_vec();
        assert_eq!(entries.len(), HISTORY_CAPACITY);
        // Entry 0 was evicted; 1..=60 remain in insertion order.
        assert_eq!(entries[0].value, 1.0);
        assert_eq!(entries[HISTORY_CAPACITY - 1].value, HISTORY_CAPACITY as f32);
        assert!(entries.windows(2).all(|w| w[0].value < w[1].value));
    }

    #[test]
    fn test_history_stays_bounded_under_many_pushes() {
        let mut history = History::new();
        for i in 0..1000 {
            history.push(entry(i));
            assert!(history.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(history.iter().next().unwrap().value, 940.0);
    }
}
