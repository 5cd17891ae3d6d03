//! Periodic task abstraction
//!
//! Each long-lived loop is a [`PeriodicTask`]. A runner (threads on the host)
//! owns the scheduling: it checks the shutdown flag at the top of every
//! iteration, runs one cycle to completion, then sleeps for [`period`].
//!
//! [`period`]: PeriodicTask::period

use core::time::Duration;

pub trait PeriodicTask {
    /// Name used for the thread and in logs
    fn name(&self) -> &'static str;

    /// Sleep between the end of one cycle and the start of the next
    fn period(&self) -> Duration;

    /// Run one full cycle. Never interrupted part-way.
    fn run_cycle(&mut self);

    /// Called once after the last cycle, on shutdown.
    fn finish(&mut self) {}
}
