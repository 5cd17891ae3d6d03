//! Metric engine: raw reading + baseline to a classified measurement
//!
//! Everything in this module is pure. The sampling loop, the shared-memory
//! store and the tests all go through [`Measurement::compute`], so a given
//! `(raw, baseline)` pair always produces the same measurement.

use serde::{Deserialize, Serialize};

use crate::calibration::Baseline;
use crate::config::{ADC_FULL_SCALE, MetricParams, Thresholds};

/// Severity of a reading, derived solely from `diff`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    /// Below the trace threshold
    #[default]
    Normal,
    /// Detectable but below the alert threshold
    Trace,
    /// At or above the alert threshold
    Alert,
}

impl Severity {
    /// Classify a `diff` against ascending thresholds.
    ///
    /// Lower bounds are inclusive, so `diff == trace` is already Trace and
    /// `diff == alert` is already Alert.
    pub const fn classify(diff: u16, thresholds: &Thresholds) -> Self {
        if diff < thresholds.trace {
            Self::Normal
        } else if diff < thresholds.alert {
            Self::Trace
        } else {
            Self::Alert
        }
    }

    /// Numeric level exposed to the web surface and the indicators
    pub const fn level(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Trace => 1,
            Self::Alert => 2,
        }
    }

    /// Display label for this severity
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Trace => "Trace",
            Self::Alert => "ALERT",
        }
    }
}

/// Sensor resistance ratio `Rs(gas) / Rs(air)`.
///
/// Returns 0.0 whenever either side of the divider is undefined: a zero
/// reading, a zero baseline, or a saturated ADC on either input.
pub fn resistance_ratio(raw: u16, baseline: u16) -> f32 {
    if raw == 0 || baseline == 0 || raw >= ADC_FULL_SCALE || baseline >= ADC_FULL_SCALE {
        return 0.0;
    }
    let full_scale = ADC_FULL_SCALE as f32;
    let rs_gas = raw as f32 / (full_scale - raw as f32);
    let rs_air = baseline as f32 / (full_scale - baseline as f32);
    if rs_air == 0.0 {
        return 0.0;
    }
    rs_gas / rs_air
}

/// The two inputs a measurement is derived from.
///
/// This is what crosses a process boundary. The receiving side rebuilds the
/// measurement with [`Measurement::compute`] and its own parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub raw: u16,
    pub baseline: u16,
}

impl Reading {
    /// Both values fit the 12-bit converter.
    pub const fn in_adc_range(&self) -> bool {
        self.raw <= ADC_FULL_SCALE && self.baseline <= ADC_FULL_SCALE
    }
}

/// One complete, internally consistent reading.
///
/// Fields are private and the type is not deserializable: the only
/// constructors are [`Measurement::compute`] and the zeroed startup value, so
/// `status` can never disagree with `diff`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    raw: u16,
    baseline: u16,
    diff: u16,
    concentration: f32,
    ratio: f32,
    status: Severity,
}

impl Measurement {
    /// Value published before the first sampling cycle completes
    pub const fn initial() -> Self {
        Self {
            raw: 0,
            baseline: 0,
            diff: 0,
            concentration: 0.0,
            ratio: 0.0,
            status: Severity::Normal,
        }
    }

    pub fn compute(raw: u16, baseline: Baseline, params: &MetricParams) -> Self {
        let baseline = baseline.raw();
        let diff = baseline.saturating_sub(raw);
        Self {
            raw,
            baseline,
            diff,
            concentration: diff as f32 * params.conversion_factor,
            ratio: resistance_ratio(raw, baseline),
            status: Severity::classify(diff, &params.thresholds),
        }
    }

    pub const fn reading(&self) -> Reading {
        Reading {
            raw: self.raw,
            baseline: self.baseline,
        }
    }

    pub const fn raw(&self) -> u16 {
        self.raw
    }

    pub const fn baseline(&self) -> u16 {
        self.baseline
    }

    pub const fn diff(&self) -> u16 {
        self.diff
    }

    pub const fn concentration(&self) -> f32 {
        self.concentration
    }

    pub const fn ratio(&self) -> f32 {
        self.ratio
    }

    pub const fn status(&self) -> Severity {
        self.status
    }

    pub const fn level(&self) -> u8 {
        self.status.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> MetricParams {
        MetricParams::default()
    }

    #[test]
    fn test_classification_boundaries() {
        let t = Thresholds::default();
        assert_eq!(Severity::classify(0, &t), Severity::Normal);
        assert_eq!(Severity::classify(39, &t), Severity::Normal);
        assert_eq!(Severity::classify(40, &t), Severity::Trace);
        assert_eq!(Severity::classify(99, &t), Severity::Trace);
        assert_eq!(Severity::classify(100, &t), Severity::Alert);
        assert_eq!(Severity::classify(u16::MAX, &t), Severity::Alert);

        assert_eq!(Severity::classify(39, &t).level(), 0);
        assert_eq!(Severity::classify(40, &t).level(), 1);
        assert_eq!(Severity::classify(99, &t).level(), 1);
        assert_eq!(Severity::classify(100, &t).level(), 2);
    }

    #[test]
    fn test_alert_reading_end_to_end() {
        let m = Measurement::compute(1200, Baseline::new(1380), &params());
        assert_eq!(m.diff(), 180);
        assert_eq!(m.status(), Severity::Alert);
        assert_eq!(m.level(), 2);
        assert!((m.concentration() - 0.300).abs() < 1e-4);
    }

    #[test]
    fn test_clean_air_reading_end_to_end() {
        let m = Measurement::compute(1380, Baseline::new(1380), &params());
        assert_eq!(m.diff(), 0);
        assert_eq!(m.status(), Severity::Normal);
        assert_eq!(m.level(), 0);
        assert_eq!(m.concentration(), 0.0);
        assert_eq!(m.ratio(), 1.0);
    }

    #[test]
    fn test_reading_above_baseline_clamps_diff() {
        let m = Measurement::compute(1500, Baseline::new(1380), &params());
        assert_eq!(m.diff(), 0);
        assert_eq!(m.status(), Severity::Normal);
        assert!(m.ratio() > 1.0);
    }

    #[test]
    fn test_fault_sentinel_passes_through_as_alert() {
        // A failed bus read looks like raw == 0 and is not filtered here.
        let m = Measurement::compute(0, Baseline::new(1380), &params());
        assert_eq!(m.diff(), 1380);
        assert_eq!(m.status(), Severity::Alert);
        assert_eq!(m.ratio(), 0.0);
    }

    #[test]
    fn test_ratio_undefined_inputs() {
        assert_eq!(resistance_ratio(0, 1380), 0.0);
        assert_eq!(resistance_ratio(1380, 0), 0.0);
        assert_eq!(resistance_ratio(4095, 1380), 0.0);
        assert_eq!(resistance_ratio(1380, 4095), 0.0);
    }

    #[test]
    fn test_reading_range_check() {
        let m = Measurement::compute(1200, Baseline::new(1380), &params());
        assert_eq!(m.reading(), Reading { raw: 1200, baseline: 1380 });
        assert!(m.reading().in_adc_range());
        assert!(Reading { raw: 4095, baseline: 4095 }.in_adc_range());
        assert!(!Reading { raw: 4096, baseline: 1380 }.in_adc_range());
        assert!(!Reading { raw: 0, baseline: u16::MAX }.in_adc_range());
    }

    #[test]
    fn test_initial_measurement_is_zeroed() {
        let m = Measurement::initial();
        assert_eq!(m, Measurement::default());
        assert_eq!(m.level(), 0);
    }

    proptest! {
        #[test]
        fn prop_diff_and_concentration_non_negative(raw in 0u16..=4094, baseline in 1u16..=4094) {
            let m = Measurement::compute(raw, Baseline::new(baseline), &params());
            prop_assert_eq!(m.diff(), baseline.saturating_sub(raw));
            prop_assert!(m.concentration() >= 0.0);
        }

        #[test]
        fn prop_ratio_non_negative(raw in 0u16..=u16::MAX, baseline in 0u16..=u16::MAX) {
            let ratio = resistance_ratio(raw, baseline);
            prop_assert!(ratio >= 0.0);
            prop_assert!(!ratio.is_nan());
        }

        #[test]
        fn prop_level_mirrors_status(raw in 0u16..=4095, baseline in 0u16..=4095) {
            let m = Measurement::compute(raw, Baseline::new(baseline), &params());
            prop_assert_eq!(m.level(), m.status().level());
            prop_assert_eq!(m.status(), Severity::classify(m.diff(), &Thresholds::default()));
        }
    }
}
