//! Local actuation loop: indicator LEDs and the display
//!
//! A pure reader of the store. Each cycle copies the latest measurement,
//! lights exactly one LED, and redraws the dashboard when a display is
//! present.

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use heapless::String;
use log::{debug, info, warn};

use crate::display::{Display, Panel, draw_dashboard};
use crate::metrics::{Measurement, Severity};
use crate::store::MeasurementStore;
use crate::task::PeriodicTask;

/// The two indicator LEDs. Exactly one is lit while running.
pub struct Indicators<N, A> {
    normal: N,
    alert: A,
}

impl<N: OutputPin, A: OutputPin> Indicators<N, A> {
    pub fn new(normal: N, alert: A) -> Self {
        Self { normal, alert }
    }

    /// Light "alert" for [`Severity::Alert`], otherwise "normal".
    ///
    /// Normal and Trace look the same on the LEDs; only the display text and
    /// the web surface tell them apart. The LED being switched off goes first
    /// so both are never lit at once.
    pub fn show(&mut self, severity: Severity) {
        let result = if severity == Severity::Alert {
            self.normal
                .set_low()
                .map_err(|e| debug!("normal LED: {:?}", e))
                .and_then(|()| self.alert.set_high().map_err(|e| debug!("alert LED: {:?}", e)))
        } else {
            self.alert
                .set_low()
                .map_err(|e| debug!("alert LED: {:?}", e))
                .and_then(|()| self.normal.set_high().map_err(|e| debug!("normal LED: {:?}", e)))
        };
        if result.is_err() {
            warn!("Failed to drive indicator LEDs");
        }
    }

    /// Switch both LEDs off.
    pub fn de_energize(&mut self) {
        if let Err(e) = self.normal.set_low() {
            warn!("Failed to switch off normal LED: {:?}", e);
        }
        if let Err(e) = self.alert.set_low() {
            warn!("Failed to switch off alert LED: {:?}", e);
        }
    }
}

pub struct ActuationTask<S, N, A, P> {
    store: S,
    indicators: Indicators<N, A>,
    display: Option<Display<P>>,
    footer: String<24>,
    period: Duration,
    last_severity: Option<Severity>,
}

impl<S, N, A, P> ActuationTask<S, N, A, P>
where
    S: MeasurementStore,
    N: OutputPin,
    A: OutputPin,
    P: Panel,
{
    /// `display` is `None` when the panel failed to initialize; the LEDs keep
    /// working either way.
    pub fn new(
        store: S,
        indicators: Indicators<N, A>,
        display: Option<Display<P>>,
        footer: &str,
        period: Duration,
    ) -> Self {
        if display.is_none() {
            warn!("No display attached, driving LEDs only");
        }
        let mut text = String::new();
        for c in footer.chars() {
            if text.push(c).is_err() {
                break;
            }
        }
        Self {
            store,
            indicators,
            display,
            footer: text,
            period,
            last_severity: None,
        }
    }

    fn render(&mut self, measurement: &Measurement) {
        let Some(display) = self.display.as_mut() else {
            return;
        };
        let footer = self.footer.as_str();
        if let Err(e) = display.draw_frame(|fb| draw_dashboard(fb, measurement, footer)) {
            warn!("Display update failed: {}", e);
        }
    }

    pub fn display(&self) -> Option<&Display<P>> {
        self.display.as_ref()
    }
}

impl<S, N, A, P> PeriodicTask for ActuationTask<S, N, A, P>
where
    S: MeasurementStore,
    N: OutputPin,
    A: OutputPin,
    P: Panel,
{
    fn name(&self) -> &'static str {
        "actuation"
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn run_cycle(&mut self) {
        let measurement = match self.store.snapshot() {
            Ok(measurement) => measurement,
            Err(e) => {
                warn!("Actuation skipped, store unavailable: {}", e);
                return;
            }
        };

        let severity = measurement.status();
        if self.last_severity != Some(severity) {
            info!("Status now {} (diff {})", severity.label(), measurement.diff());
            self.last_severity = Some(severity);
        }
        self.indicators.show(severity);
        self.render(&measurement);
    }

    fn finish(&mut self) {
        info!("Actuation stopping, switching LEDs off");
        self.indicators.de_energize();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calibration::Baseline;
    use crate::config::MetricParams;
    use crate::display::tests::CapturePanel;
    use crate::history::{HistoryEntry, TimeOfDay};
    use crate::store::SharedStore;
    use core::convert::Infallible;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embedded_hal::digital::ErrorType;
    use std::rc::Rc;
    use std::cell::Cell;

    /// LED whose level can be inspected through a shared handle.
    #[derive(Clone, Default)]
    pub(crate) struct LevelPin(pub(crate) Rc<Cell<bool>>);

    impl ErrorType for LevelPin {
        type Error = Infallible;
    }

    impl OutputPin for LevelPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0.set(true);
            Ok(())
        }
    }

    fn publish(store: &SharedStore<NoopRawMutex>, raw: u16) {
        let m = Measurement::compute(raw, Baseline::new(1380), &MetricParams::default());
        store
            .publish(m, HistoryEntry::new(TimeOfDay::default(), m.concentration()))
            .unwrap();
    }

    fn task<'a>(
        store: &'a SharedStore<NoopRawMutex>,
        display: Option<Display<CapturePanel>>,
    ) -> (
        ActuationTask<&'a SharedStore<NoopRawMutex>, LevelPin, LevelPin, CapturePanel>,
        LevelPin,
        LevelPin,
    ) {
        let normal = LevelPin::default();
        let alert = LevelPin::default();
        let task = ActuationTask::new(
            store,
            Indicators::new(normal.clone(), alert.clone()),
            display,
            "HTTP :5000",
            Duration::from_millis(100),
        );
        (task, normal, alert)
    }

    #[test]
    fn test_exactly_one_led_per_level() {
        let store = SharedStore::<NoopRawMutex>::new();
        let (mut task, normal, alert) = task(&store, None);

        for (raw, expect_alert) in [(1380, false), (1320, false), (1280, true), (1379, false)] {
            publish(&store, raw);
            task.run_cycle();
            assert_eq!(alert.0.get(), expect_alert, "raw {}", raw);
            assert_eq!(normal.0.get(), !expect_alert, "raw {}", raw);
        }
    }

    #[test]
    fn test_finish_de_energizes_both_leds() {
        let store = SharedStore::<NoopRawMutex>::new();
        let (mut task, normal, alert) = task(&store, None);
        publish(&store, 1000);
        task.run_cycle();
        assert!(alert.0.get());

        task.finish();
        assert!(!normal.0.get());
        assert!(!alert.0.get());
    }

    #[test]
    fn test_display_failure_does_not_stop_leds() {
        let store = SharedStore::<NoopRawMutex>::new();
        let panel = CapturePanel {
            fail: true,
            ..CapturePanel::default()
        };
        let (mut task, normal, alert) = task(&store, Some(Display::new(panel)));

        publish(&store, 1380);
        task.run_cycle();
        assert!(normal.0.get());
        assert!(!alert.0.get());
    }

    #[test]
    fn test_renders_every_cycle_when_display_present() {
        let store = SharedStore::<NoopRawMutex>::new();
        let (mut task, _, _) = task(&store, Some(Display::new(CapturePanel::default())));

        publish(&store, 1300);
        task.run_cycle();
        task.run_cycle();
        assert_eq!(task.display().unwrap().panel().frames, 2);
    }
}
