//! Simulated board for running the pipeline without hardware

use std::convert::Infallible;
use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use alco_core::config::{ADC_FULL_SCALE, FAULT_SENTINEL, FALLBACK_BASELINE};
use alco_core::display::Panel;
use alco_core::framebuffer::MonoFrameBuffer;
use alco_core::sensors::RawSampler;
use embedded_hal::digital::{ErrorType, OutputPin};
use log::{debug, info, trace};

use super::Hardware;

/// Reads in one simulated breath cycle
const BREATH_PERIOD: u64 = 120;
/// Reads at the start of each cycle during which someone is blowing
const BREATH_LEN: u64 = 30;
/// Deepest drop below clean air, enough to reach Alert at default thresholds
const BREATH_DEPTH: f64 = 180.0;

/// Synthetic ADC: clean air near a resting level with a slow wobble, plus a
/// periodic breath that pulls the reading down.
#[derive(Debug, Clone)]
pub struct SimulatedSampler {
    rest: u16,
    reads: u64,
    fault_every: Option<u64>,
}

impl SimulatedSampler {
    pub fn new(rest: u16) -> Self {
        Self {
            rest,
            reads: 0,
            fault_every: None,
        }
    }

    /// Return the fault sentinel on every `n`th read.
    pub fn with_fault_every(mut self, n: u64) -> Self {
        self.fault_every = (n > 0).then_some(n);
        self
    }

    fn level(&self, t: u64) -> f64 {
        let wobble = 3.0 * (t as f64 / 7.0).sin() + 1.5 * (t as f64 / 3.0).cos();
        let phase = t % BREATH_PERIOD;
        let breath = if phase < BREATH_LEN {
            BREATH_DEPTH * (PI * phase as f64 / BREATH_LEN as f64).sin()
        } else {
            0.0
        };
        self.rest as f64 + wobble - breath
    }
}

impl Default for SimulatedSampler {
    fn default() -> Self {
        Self::new(FALLBACK_BASELINE)
    }
}

impl RawSampler for SimulatedSampler {
    fn read_raw(&mut self) -> u16 {
        self.reads += 1;
        if let Some(n) = self.fault_every
            && self.reads % n == 0
        {
            return FAULT_SENTINEL;
        }
        // Calibration reads come first, so start the clock after a full
        // clean-air stretch.
        let t = self.reads + BREATH_LEN;
        self.level(t).round().clamp(1.0, ADC_FULL_SCALE as f64) as u16
    }
}

/// Indicator LED whose level can be watched from another thread through a
/// clone.
#[derive(Debug, Clone)]
pub struct SimulatedLed {
    name: &'static str,
    lit: Arc<AtomicBool>,
}

impl SimulatedLed {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::Acquire)
    }

    fn set(&mut self, lit: bool) {
        if self.lit.swap(lit, Ordering::AcqRel) != lit {
            debug!("LED {} {}", self.name, if lit { "on" } else { "off" });
        }
    }
}

impl ErrorType for SimulatedLed {
    type Error = Infallible;
}

impl OutputPin for SimulatedLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// Panel that logs frames instead of lighting pixels
#[derive(Debug, Clone, Default)]
pub struct LogPanel {
    frames: u32,
}

impl Panel for LogPanel {
    type Error = Infallible;

    fn present(&mut self, frame: &mut MonoFrameBuffer) -> Result<(), Self::Error> {
        self.frames += 1;
        trace!("frame {}: {} pixels lit", self.frames, frame.lit_pixels());
        Ok(())
    }
}

pub type SimHardware = Hardware<SimulatedSampler, SimulatedLed, SimulatedLed, LogPanel>;

pub fn open(fault_every: Option<u64>) -> SimHardware {
    info!("Using simulated sensor, LEDs and display");
    let mut sampler = SimulatedSampler::default();
    if let Some(n) = fault_every {
        sampler = sampler.with_fault_every(n);
    }
    Hardware {
        sampler,
        led_normal: SimulatedLed::new("normal"),
        led_alert: SimulatedLed::new("alert"),
        panel: Some(LogPanel::default()),
    }
}
