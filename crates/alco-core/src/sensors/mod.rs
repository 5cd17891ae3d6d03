//! Gas sensor access
//!
//! The pipeline only ever asks for one 12-bit raw sample. Drivers that can
//! fail implement [`RawSampler`] by substituting [`FAULT_SENTINEL`] for a
//! failed read, so bus errors never reach the loops.

mod adc121c021;

pub use adc121c021::Adc121c021;

pub use crate::config::FAULT_SENTINEL;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
}

/// Source of raw gas sensor readings.
///
/// Returns a value in `0..=4095`. Zero doubles as the fault sentinel and is
/// indistinguishable from a genuine zero reading.
pub trait RawSampler {
    fn read_raw(&mut self) -> u16;
}

impl<T: RawSampler + ?Sized> RawSampler for &mut T {
    fn read_raw(&mut self) -> u16 {
        (**self).read_raw()
    }
}
