//! Sampling loop: the only writer of the state store

use core::time::Duration;

use log::{debug, warn};

use crate::calibration::Baseline;
use crate::config::{FAULT_SENTINEL, MetricParams};
use crate::history::{HistoryEntry, WallClock};
use crate::metrics::Measurement;
use crate::sensors::RawSampler;
use crate::store::{MeasurementStore, StoreError};
use crate::task::PeriodicTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPhase {
    Idle,
    Sampling,
    Publishing,
}

pub struct SamplingTask<R, S, C> {
    sampler: R,
    store: S,
    clock: C,
    baseline: Baseline,
    params: MetricParams,
    period: Duration,
    phase: SamplingPhase,
    zero_readings: u32,
}

impl<R, S, C> SamplingTask<R, S, C>
where
    R: RawSampler,
    S: MeasurementStore,
    C: WallClock,
{
    pub fn new(
        sampler: R,
        store: S,
        clock: C,
        baseline: Baseline,
        params: MetricParams,
        period: Duration,
    ) -> Self {
        Self {
            sampler,
            store,
            clock,
            baseline,
            params,
            period,
            phase: SamplingPhase::Idle,
            zero_readings: 0,
        }
    }

    /// Read, compute and publish one measurement.
    ///
    /// A zero reading is published like any other value even though it may be
    /// a failed bus read; with a typical baseline it classifies as Alert.
    pub fn sample_once(&mut self) -> Result<Measurement, StoreError> {
        self.phase = SamplingPhase::Sampling;
        let raw = self.sampler.read_raw();
        if raw == FAULT_SENTINEL {
            self.zero_readings += 1;
            warn!(
                "Raw reading 0 (bus fault or true zero, {} so far); publishing as-is",
                self.zero_readings
            );
        }

        let measurement = Measurement::compute(raw, self.baseline, &self.params);
        let entry = HistoryEntry::new(self.clock.now(), measurement.concentration());

        self.phase = SamplingPhase::Publishing;
        let published = self.store.publish(measurement, entry);
        self.phase = SamplingPhase::Idle;

        published.map(|()| {
            debug!(
                "raw={} diff={} conc={:.3} ratio={:.3} {}",
                raw,
                measurement.diff(),
                measurement.concentration(),
                measurement.ratio(),
                measurement.status().label()
            );
            measurement
        })
    }

    pub fn phase(&self) -> SamplingPhase {
        self.phase
    }

    /// Zero readings seen so far; each may have been a bus fault.
    pub fn zero_readings(&self) -> u32 {
        self.zero_readings
    }
}

impl<R, S, C> PeriodicTask for SamplingTask<R, S, C>
where
    R: RawSampler,
    S: MeasurementStore,
    C: WallClock,
{
    fn name(&self) -> &'static str {
        "sampling"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run_cycle(&mut self) {
        if let Err(e) = self.sample_once() {
            warn!("Failed to publish measurement: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::ScriptedSampler;
    use crate::history::TimeOfDay;
    use crate::metrics::Severity;
    use crate::store::SharedStore;
    use core::cell::Cell;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    struct StepClock(Cell<u32>);

    impl WallClock for StepClock {
        fn now(&self) -> TimeOfDay {
            let t = self.0.get();
            self.0.set(t + 1);
            TimeOfDay::from_seconds(t)
        }
    }

    fn task<'a>(
        script: &[u16],
        store: &'a SharedStore<NoopRawMutex>,
    ) -> SamplingTask<ScriptedSampler, &'a SharedStore<NoopRawMutex>, StepClock> {
        SamplingTask::new(
            ScriptedSampler::new(script.iter().copied()),
            store,
            StepClock(Cell::new(3600)),
            Baseline::new(1380),
            MetricParams::default(),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_cycle_publishes_measurement_and_history() {
        let store = SharedStore::<NoopRawMutex>::new();
        let mut task = task(&[1200, 1380], &store);

        task.run_cycle();
        let m = store.snapshot().unwrap();
        assert_eq!(m.raw(), 1200);
        assert_eq!(m.status(), Severity::Alert);
        assert_eq!(task.phase(), SamplingPhase::Idle);

        task.run_cycle();
        let history = store.snapshot_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp.to_string(), "01:00:00");
        assert!((history[0].value - 0.3).abs() < 1e-4);
        assert_eq!(history[1].value, 0.0);
        assert_eq!(store.snapshot().unwrap().status(), Severity::Normal);
    }

    #[test]
    fn test_zero_reading_flows_through_as_alert() {
        let store = SharedStore::<NoopRawMutex>::new();
        let mut task = task(&[1380, 0, 1380], &store);

        task.run_cycle();
        let m = task.sample_once().unwrap();
        assert_eq!(m.raw(), 0);
        assert_eq!(m.diff(), 1380);
        assert_eq!(m.status(), Severity::Alert);
        assert_eq!(task.zero_readings(), 1);

        task.run_cycle();
        assert_eq!(store.snapshot().unwrap().status(), Severity::Normal);
        assert_eq!(store.history_len(), 3);
    }
}
