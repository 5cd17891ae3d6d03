//! Local wall clock for history timestamps

use alco_core::history::{TimeOfDay, WallClock};
use chrono::{Local, Timelike};

/// Time of day in the host's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl WallClock for LocalClock {
    fn now(&self) -> TimeOfDay {
        TimeOfDay::from_seconds(Local::now().num_seconds_from_midnight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_clock_is_within_one_day() {
        let now = LocalClock.now();
        assert!(now.seconds() < 24 * 60 * 60);
        assert_eq!(now.to_string().len(), 8);
    }
}
