//! Raspberry Pi peripherals: ADC121C021 and SSD1306 on one I2C bus, sysfs LEDs
//!
//! The ADC (sampling thread) and the display (actuation thread) each get a
//! [`MutexDevice`] over the same bus, which is locked for one transaction at
//! a time and independently of the store.

use std::sync::Mutex;

use alco_core::config::Config;
use alco_core::display::Panel;
use alco_core::framebuffer::MonoFrameBuffer;
use alco_core::sensors::Adc121c021;
use embedded_hal_bus::i2c::MutexDevice;
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{I2cdev, SysfsPin};
use log::{info, warn};
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};
use static_cell::StaticCell;
use thiserror::Error;

use super::{Hardware, OwnedLed, ReleasePin};

static I2C_BUS: StaticCell<Mutex<I2cdev>> = StaticCell::new();

pub type BusDevice = MutexDevice<'static, I2cdev>;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("failed to open I2C bus {path}: {details}")]
    I2c { path: String, details: String },
    #[error("failed to claim GPIO {pin} for the {name} LED: {details}")]
    Gpio {
        name: &'static str,
        pin: u8,
        details: String,
    },
    #[error("hardware has already been opened")]
    AlreadyOpened,
}

type Ssd1306Driver =
    Ssd1306<I2CInterface<BusDevice>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

/// SSD1306 128x64 in buffered mode
pub struct Ssd1306Panel {
    driver: Ssd1306Driver,
}

impl Ssd1306Panel {
    fn init(i2c: BusDevice, address: u8) -> Option<Self> {
        let interface = I2CDisplayInterface::new_custom_address(i2c, address);
        let mut driver = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        match driver.init() {
            Ok(()) => {
                info!("SSD1306 display initialised at {:#04x}", address);
                Some(Self { driver })
            }
            Err(e) => {
                warn!("SSD1306 display init failed at {:#04x}: {:?}", address, e);
                None
            }
        }
    }
}

impl Panel for Ssd1306Panel {
    type Error = String;

    fn present(&mut self, frame: &mut MonoFrameBuffer) -> Result<(), Self::Error> {
        frame
            .flush(&mut self.driver)
            .map_err(|e| format!("{:?}", e))?;
        self.driver.flush().map_err(|e| format!("{:?}", e))
    }
}

impl ReleasePin for SysfsPin {
    fn release(&mut self) -> Result<(), String> {
        self.unexport().map_err(|e| e.to_string())
    }
}

fn output_pin(name: &'static str, pin: u8) -> Result<OwnedLed<SysfsPin>, HardwareError> {
    let gpio = SysfsPin::new(pin as u64);
    gpio.export()
        .and_then(|()| gpio.set_direction(Direction::Low))
        .map_err(|e| HardwareError::Gpio {
            name,
            pin,
            details: e.to_string(),
        })?;
    info!("GPIO {} claimed for the {} LED", pin, name);
    Ok(OwnedLed::new(name, gpio))
}

pub type LinuxHardware =
    Hardware<Adc121c021<BusDevice>, OwnedLed<SysfsPin>, OwnedLed<SysfsPin>, Ssd1306Panel>;

/// Open the bus, claim both LEDs and bring up the display.
///
/// A missing bus or LED is fatal. A display that does not answer is not.
pub fn open(config: &Config) -> Result<LinuxHardware, HardwareError> {
    let path = format!("/dev/i2c-{}", config.bus.i2c_bus);
    let i2c = I2cdev::new(&path).map_err(|e| HardwareError::I2c {
        path: path.clone(),
        details: e.to_string(),
    })?;
    let bus: &'static Mutex<I2cdev> = I2C_BUS
        .try_init(Mutex::new(i2c))
        .ok_or(HardwareError::AlreadyOpened)?;
    info!("I2C bus {} opened", path);

    let led_normal = output_pin("normal", config.pins.led_normal)?;
    let led_alert = output_pin("alert", config.pins.led_alert)?;

    let sampler = Adc121c021::new(MutexDevice::new(bus), config.bus.adc_address);
    let panel = Ssd1306Panel::init(MutexDevice::new(bus), config.bus.display_address);

    Ok(Hardware {
        sampler,
        led_normal,
        led_alert,
        panel,
    })
}
