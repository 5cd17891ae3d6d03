//! Local display rendering
//!
//! Screens are drawn into a [`MonoFrameBuffer`] inside a
//! [`Display::draw_frame`] scope; the frame is handed to the [`Panel`] when
//! the scope ends, so a drawn frame is always presented.

use core::convert::Infallible;
use core::fmt::{Debug, Write};

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use heapless::String;
use thiserror_no_std::Error;

use crate::config::BAR_FULL_SCALE;
use crate::framebuffer::MonoFrameBuffer;
use crate::metrics::Measurement;

const TITLE: &str = "Alcohol Meter";

const TITLE_Y: i32 = 0;
const STATUS_Y: i32 = 16;
const CONCENTRATION_X: i32 = 60;
const BAR_Y: i32 = 32;
const FOOTER_Y: i32 = 48;

/// Outline width of the diff bar; a full bar fills all of it
pub const BAR_WIDTH_PX: u32 = 120;
const BAR_HEIGHT_PX: u32 = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    #[error("panel rejected frame: {details}")]
    Present { details: &'static str },
}

/// Physical panel that shows a finished frame
pub trait Panel {
    type Error: Debug;

    fn present(&mut self, frame: &mut MonoFrameBuffer) -> Result<(), Self::Error>;
}

/// Placeholder panel type for code paths that run without a display
pub enum NoPanel {}

impl Panel for NoPanel {
    type Error = Infallible;

    fn present(&mut self, _frame: &mut MonoFrameBuffer) -> Result<(), Self::Error> {
        match *self {}
    }
}

pub struct Display<P> {
    panel: P,
    frame: MonoFrameBuffer,
}

impl<P: Panel> Display<P> {
    pub fn new(panel: P) -> Self {
        Self {
            panel,
            frame: MonoFrameBuffer::new(),
        }
    }

    /// Draw one frame from scratch and present it.
    pub fn draw_frame<F>(&mut self, draw: F) -> Result<(), DisplayError>
    where
        F: FnOnce(&mut MonoFrameBuffer) -> Result<(), Infallible>,
    {
        let Ok(()) = self.frame.clear(BinaryColor::Off);
        let Ok(()) = draw(&mut self.frame);
        self.panel.present(&mut self.frame).map_err(|e| {
            log::debug!("Panel present failed: {:?}", e);
            DisplayError::Present {
                details: "panel I/O error",
            }
        })
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    pub fn frame(&self) -> &MonoFrameBuffer {
        &self.frame
    }
}

/// Filled width of the diff bar, clamped at [`BAR_FULL_SCALE`]
pub fn bar_fill_width(diff: u16) -> u32 {
    let clamped = diff.min(BAR_FULL_SCALE) as u32;
    clamped * BAR_WIDTH_PX / BAR_FULL_SCALE as u32
}

fn text_style() -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyle::new(&FONT_6X10, BinaryColor::On)
}

fn draw_bar<D>(target: &mut D, diff: u16, y: i32) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    Rectangle::new(Point::new(0, y), Size::new(BAR_WIDTH_PX, BAR_HEIGHT_PX))
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(target)?;

    let fill = bar_fill_width(diff);
    if fill > 0 {
        Rectangle::new(Point::new(0, y), Size::new(fill, BAR_HEIGHT_PX))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(target)?;
    }
    Ok(())
}

/// Live reading screen: title, status, concentration, diff bar and footer.
pub fn draw_dashboard<D>(target: &mut D, measurement: &Measurement, footer: &str) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = text_style();
    Text::with_baseline(TITLE, Point::new(0, TITLE_Y), style, Baseline::Top).draw(target)?;
    Text::with_baseline(
        measurement.status().label(),
        Point::new(0, STATUS_Y),
        style,
        Baseline::Top,
    )
    .draw(target)?;

    let mut concentration: String<24> = String::new();
    // 24 bytes always fits "<f32 with 2 decimals> mg/L" for physical values
    let _ = write!(concentration, "{:.2} mg/L", measurement.concentration());
    Text::with_baseline(
        &concentration,
        Point::new(CONCENTRATION_X, STATUS_Y),
        style,
        Baseline::Top,
    )
    .draw(target)?;

    draw_bar(target, measurement.diff(), BAR_Y)?;
    Text::with_baseline(footer, Point::new(0, FOOTER_Y), style, Baseline::Top).draw(target)?;
    Ok(())
}

/// Shown while the calibrator collects its baseline window.
pub fn draw_calibrating<D>(target: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = text_style();
    Text::with_baseline("CALIBRATING...", Point::new(10, 20), style, Baseline::Top)
        .draw(target)?;
    Text::with_baseline("Do not blow", Point::new(10, 40), style, Baseline::Top).draw(target)?;
    Ok(())
}
