//! Device configuration
//!
//! Everything here is loaded once at startup and never mutated afterwards.
//! The defaults describe the reference build: an ADC121C021 and an SSD1306
//! sharing I2C bus 1 on a Raspberry Pi, with LEDs on BCM 17 and 27.

use core::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Full-scale value of the 12-bit ADC.
pub const ADC_FULL_SCALE: u16 = 4095;

/// Number of history entries retained for trend display.
pub const HISTORY_CAPACITY: usize = 60;

/// Baseline used when calibration collects no valid reading.
pub const FALLBACK_BASELINE: u16 = 1380;

/// `diff` at which the display bar is drawn full width.
pub const BAR_FULL_SCALE: u16 = 250;

/// Raw value the bus reader substitutes for a failed read.
///
/// A failed read and a genuine zero reading are indistinguishable once they
/// leave the driver. Calibration discards zeros; the sampling loop publishes
/// them as-is, which can register as a spurious Alert.
pub const FAULT_SENTINEL: u16 = 0;

const SAMPLING_INTERVAL_RANGE_MS: core::ops::RangeInclusive<u32> = 100..=500;
const ACTUATION_INTERVAL_RANGE_MS: core::ops::RangeInclusive<u32> = 100..=200;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("thresholds must ascend: trace {trace} >= alert {alert}")]
    ThresholdOrder { trace: u16, alert: u16 },
    #[error("{field} of {value} ms is outside the supported range")]
    IntervalOutOfRange { field: &'static str, value: u32 },
    #[error("calibration needs at least one sample")]
    NoCalibrationSamples,
    #[error("conversion factor must be positive and finite")]
    InvalidConversionFactor,
}

/// I2C bus wiring
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Linux I2C bus number (`/dev/i2c-N`)
    pub i2c_bus: u8,
    /// ADC121C021 address
    pub adc_address: u8,
    /// SSD1306 address
    pub display_address: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            adc_address: 0x50,
            display_address: 0x3C,
        }
    }
}

/// GPIO pins (BCM numbering) for the two indicator LEDs
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PinConfig {
    pub led_normal: u8,
    pub led_alert: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            led_normal: 17,
            led_alert: 27,
        }
    }
}

/// Classification thresholds on `diff`, in raw ADC units.
///
/// `diff < trace` is Normal, `trace <= diff < alert` is Trace and
/// `diff >= alert` is Alert.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Thresholds {
    pub trace: u16,
    pub alert: u16,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trace: 40,
            alert: 100,
        }
    }
}

/// Loop cadences and calibration pacing
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub sampling_interval_ms: u32,
    pub actuation_interval_ms: u32,
    pub calibration_samples: u16,
    pub calibration_delay_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 500,
            actuation_interval_ms: 100,
            calibration_samples: 30,
            calibration_delay_ms: 100,
        }
    }
}

impl TimingConfig {
    pub const fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms as u64)
    }

    pub const fn actuation_interval(&self) -> Duration {
        Duration::from_millis(self.actuation_interval_ms as u64)
    }
}

/// Parameters of the metric engine, split out so that every store strategy
/// and the query surface classify with the same numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricParams {
    pub thresholds: Thresholds,
    /// Concentration units (mg/L) per raw unit of `diff`
    pub conversion_factor: f32,
}

impl Default for MetricParams {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            conversion_factor: DEFAULT_CONVERSION_FACTOR,
        }
    }
}

/// 0.25 mg/L observed at a 150-unit drop during bench calibration
pub const DEFAULT_CONVERSION_FACTOR: f32 = 0.25 / 150.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub pins: PinConfig,
    pub thresholds: Thresholds,
    pub timing: TimingConfig,
    pub conversion_factor: f32,
    pub http_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            pins: PinConfig::default(),
            thresholds: Thresholds::default(),
            timing: TimingConfig::default(),
            conversion_factor: DEFAULT_CONVERSION_FACTOR,
            http_port: 5000,
        }
    }
}

impl Config {
    pub fn metric_params(&self) -> MetricParams {
        MetricParams {
            thresholds: self.thresholds,
            conversion_factor: self.conversion_factor,
        }
    }

    /// Reject configurations the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thresholds.trace >= self.thresholds.alert {
            return Err(ConfigError::ThresholdOrder {
                trace: self.thresholds.trace,
                alert: self.thresholds.alert,
            });
        }
        if !SAMPLING_INTERVAL_RANGE_MS.contains(&self.timing.sampling_interval_ms) {
            return Err(ConfigError::IntervalOutOfRange {
                field: "sampling_interval_ms",
                value: self.timing.sampling_interval_ms,
            });
        }
        if !ACTUATION_INTERVAL_RANGE_MS.contains(&self.timing.actuation_interval_ms) {
            return Err(ConfigError::IntervalOutOfRange {
                field: "actuation_interval_ms",
                value: self.timing.actuation_interval_ms,
            });
        }
        if self.timing.calibration_samples == 0 {
            return Err(ConfigError::NoCalibrationSamples);
        }
        if !(self.conversion_factor.is_finite() && self.conversion_factor > 0.0) {
            return Err(ConfigError::InvalidConversionFactor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.thresholds = Thresholds {
            trace: 100,
            alert: 40,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ThresholdOrder {
                trace: 100,
                alert: 40
            })
        );
    }

    #[test]
    fn test_rejects_fast_actuation_interval() {
        let mut config = Config::default();
        config.timing.actuation_interval_ms = 20;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IntervalOutOfRange {
                field: "actuation_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "thresholds": { "alert": 120 }, "http_port": 8080 }"#)
                .unwrap();
        assert_eq!(config.thresholds.trace, 40);
        assert_eq!(config.thresholds.alert, 120);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.timing.calibration_samples, 30);
    }
}
