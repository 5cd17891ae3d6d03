//! Startup baseline calibration
//!
//! Runs once, before any loop starts, while the sensor sits in clean air.

use embedded_hal::delay::DelayNs;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{FALLBACK_BASELINE, FAULT_SENTINEL, TimingConfig};
use crate::display::{Display, Panel, draw_calibrating};
use crate::sensors::RawSampler;

/// Raw reading that corresponds to "no gas present".
///
/// Produced once by [`Calibrator::run`] and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline(u16);

impl Baseline {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

/// Outcome of a calibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub baseline: Baseline,
    /// Non-sentinel readings that went into the average
    pub valid_samples: u16,
    pub used_fallback: bool,
}

pub struct Calibrator<S, D> {
    sampler: S,
    delay: D,
    samples: u16,
    delay_ms: u32,
}

impl<S: RawSampler, D: DelayNs> Calibrator<S, D> {
    pub fn new(sampler: S, delay: D, timing: &TimingConfig) -> Self {
        Self {
            sampler,
            delay,
            samples: timing.calibration_samples,
            delay_ms: timing.calibration_delay_ms,
        }
    }

    /// Average the valid readings of one calibration window.
    ///
    /// Zero readings are treated as failed reads and skipped. With no valid
    /// reading at all the fallback baseline is used. Never fails.
    pub fn run<P: Panel>(&mut self, display: Option<&mut Display<P>>) -> Calibration {
        info!("Calibrating sensor, keep it in clean air");
        if let Some(display) = display
            && let Err(e) = display.draw_frame(draw_calibrating)
        {
            warn!("Could not show calibration screen: {}", e);
        }

        let mut sum: u32 = 0;
        let mut valid: u16 = 0;
        for _ in 0..self.samples {
            let raw = self.sampler.read_raw();
            if raw != FAULT_SENTINEL {
                sum += raw as u32;
                valid += 1;
            }
            self.delay.delay_ms(self.delay_ms);
        }

        if valid == 0 {
            warn!(
                "Calibration collected no valid readings, using fallback baseline {}",
                FALLBACK_BASELINE
            );
            return Calibration {
                baseline: Baseline::new(FALLBACK_BASELINE),
                valid_samples: 0,
                used_fallback: true,
            };
        }

        let baseline = Baseline::new((sum / valid as u32) as u16);
        info!(
            "Baseline established at {} from {}/{} readings",
            baseline.raw(),
            valid,
            self.samples
        );
        Calibration {
            baseline,
            valid_samples: valid,
            used_fallback: false,
        }
    }

    /// Hand the sampler back for the sampling loop.
    pub fn into_sampler(self) -> S {
        self.sampler
    }
}
