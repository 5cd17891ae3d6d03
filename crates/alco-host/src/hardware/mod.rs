//! Peripherals the pipeline runs on
//!
//! [`sim`] stands in for the board on any host. [`linux`] drives the real
//! ADC, LEDs and SSD1306 panel through linux-embedded-hal and is only built
//! with the `linux-hw` feature.

#[cfg(feature = "linux-hw")]
pub mod linux;
pub mod sim;

use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use log::{info, warn};

/// Everything the pipeline needs from the board.
///
/// `panel` is `None` when the display could not be brought up; the rest of
/// the pipeline runs without it.
pub struct Hardware<R, N, A, P> {
    pub sampler: R,
    pub led_normal: N,
    pub led_alert: A,
    pub panel: Option<P>,
}

/// Blocking delay backed by `thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns as u64));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// An output pin borrowed from the OS that has to be handed back
pub trait ReleasePin {
    fn release(&mut self) -> Result<(), String>;
}

/// Indicator LED that releases its pin when dropped.
///
/// The actuation loop drives both LEDs low as it finishes and drops them
/// afterwards, so a pin is always released in the off state.
pub struct OwnedLed<P: ReleasePin> {
    name: &'static str,
    pin: P,
}

impl<P: ReleasePin> OwnedLed<P> {
    pub fn new(name: &'static str, pin: P) -> Self {
        Self { name, pin }
    }
}

impl<P: ReleasePin + ErrorType> ErrorType for OwnedLed<P> {
    type Error = P::Error;
}

impl<P: ReleasePin + OutputPin> OutputPin for OwnedLed<P> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pin.set_low()
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pin.set_high()
    }
}

impl<P: ReleasePin> Drop for OwnedLed<P> {
    fn drop(&mut self) {
        match self.pin.release() {
            Ok(()) => info!("Released the {} LED pin", self.name),
            Err(e) => warn!("Failed to release the {} LED pin: {}", self.name, e),
        }
    }
}
