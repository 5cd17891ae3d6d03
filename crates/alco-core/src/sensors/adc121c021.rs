use embedded_hal::i2c::I2c;
use log::debug;

use super::{FAULT_SENTINEL, RawSampler, SensorError};

/// Conversion result register
const REG_CONVERSION: u8 = 0x00;

/// Upper nibble of the MSB carries alert flags, not data
const DATA_MASK_MSB: u8 = 0x0F;

/// TI ADC121C021 12-bit I2C ADC wired to the gas sensor's divider output
pub struct Adc121c021<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Adc121c021<I> {
    pub const fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Read the latest conversion result.
    pub fn read_conversion(&mut self) -> Result<u16, SensorError> {
        let mut data = [0u8; 2];
        self.i2c
            .write_read(self.address, &[REG_CONVERSION], &mut data)
            .map_err(|e| {
                debug!("ADC121C021 conversion read failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "ADC121C021",
                    operation: "read conversion register",
                    details: "I2C communication error",
                }
            })?;

        Ok((((data[0] & DATA_MASK_MSB) as u16) << 8) | data[1] as u16)
    }
}

impl<I: I2c> RawSampler for Adc121c021<I> {
    fn read_raw(&mut self) -> u16 {
        self.read_conversion().unwrap_or(FAULT_SENTINEL)
    }
}
