//! RAM framebuffer for the monochrome panel with change detection.
//!
//! All drawing targets this buffer instead of the panel. When a frame is
//! presented, only the rectangle containing changed pixels is pushed to the
//! hardware, which keeps I2C traffic (and time spent holding the bus) small.

use alloc::vec;
use alloc::vec::Vec;
use core::convert::Infallible;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use log::trace;

pub const DISPLAY_WIDTH_PX: u32 = 128;
pub const DISPLAY_HEIGHT_PX: u32 = 64;

const PIXEL_COUNT: usize = DISPLAY_WIDTH_PX as usize * DISPLAY_HEIGHT_PX as usize;

/// Bounding box of pixels that have changed since the last flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirtyRect {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl DirtyRect {
    fn expand(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn from_point(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }
}

/// 128x64 one-bit framebuffer implementing `DrawTarget<Color = BinaryColor>`.
pub struct MonoFrameBuffer {
    pixels: Vec<BinaryColor>,
    dirty: Option<DirtyRect>,
}

impl Default for MonoFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MonoFrameBuffer {
    /// Allocate a framebuffer with every pixel off.
    pub fn new() -> Self {
        Self {
            pixels: vec![BinaryColor::Off; PIXEL_COUNT],
            dirty: None,
        }
    }

    #[inline]
    fn set_pixel(&mut self, x: usize, y: usize, color: BinaryColor) {
        let idx = y * DISPLAY_WIDTH_PX as usize + x;
        if self.pixels[idx] != color {
            self.pixels[idx] = color;
            match &mut self.dirty {
                Some(rect) => rect.expand(x, y),
                None => self.dirty = Some(DirtyRect::from_point(x, y)),
            }
        }
    }

    /// Color at `(x, y)`, or `None` outside the panel
    pub fn pixel(&self, x: u32, y: u32) -> Option<BinaryColor> {
        if x < DISPLAY_WIDTH_PX && y < DISPLAY_HEIGHT_PX {
            Some(self.pixels[(y * DISPLAY_WIDTH_PX + x) as usize])
        } else {
            None
        }
    }

    /// Number of pixels currently on
    pub fn lit_pixels(&self) -> usize {
        self.pixels.iter().filter(|p| p.is_on()).count()
    }

    /// Whether anything changed since the last flush
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Flush the dirty region to a panel, then reset the dirty state.
    ///
    /// If nothing changed, this is a no-op.
    pub fn flush<D>(&mut self, display: &mut D) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = BinaryColor>,
    {
        let Some(rect) = self.dirty.take() else {
            return Ok(());
        };

        let width = rect.max_x - rect.min_x + 1;
        let height = rect.max_y - rect.min_y + 1;

        trace!(
            "Flushing {}x{} dirty region at ({}, {})",
            width, height, rect.min_x, rect.min_y
        );

        let area = Rectangle::new(
            Point::new(rect.min_x as i32, rect.min_y as i32),
            Size::new(width as u32, height as u32),
        );

        let pixels = &self.pixels;
        let stride = DISPLAY_WIDTH_PX as usize;
        let pixel_iter = (rect.min_y..=rect.max_y).flat_map(move |y| {
            let row_start = y * stride + rect.min_x;
            pixels[row_start..row_start + width].iter().copied()
        });

        display.fill_contiguous(&area, pixel_iter)
    }
}

impl OriginDimensions for MonoFrameBuffer {
    fn size(&self) -> Size {
        Size::new(DISPLAY_WIDTH_PX, DISPLAY_HEIGHT_PX)
    }
}

impl DrawTarget for MonoFrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let w = DISPLAY_WIDTH_PX as i32;
        let h = DISPLAY_HEIGHT_PX as i32;

        for Pixel(coord, color) in pixels {
            if (0..w).contains(&coord.x) && (0..h).contains(&coord.y) {
                self.set_pixel(coord.x as usize, coord.y as usize, color);
            }
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        let Some(bottom_right) = area.bottom_right() else {
            return Ok(());
        };

        for y in area.top_left.y..=bottom_right.y {
            for x in area.top_left.x..=bottom_right.x {
                self.set_pixel(x as usize, y as usize, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        for y in 0..DISPLAY_HEIGHT_PX as usize {
            for x in 0..DISPLAY_WIDTH_PX as usize {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::mock_display::MockDisplay;
    use embedded_graphics::primitives::PrimitiveStyle;

    #[test]
    fn test_new_buffer_is_blank_and_clean() {
        let fb = MonoFrameBuffer::new();
        assert_eq!(fb.lit_pixels(), 0);
        assert!(!fb.is_dirty());
    }

    #[test]
    fn test_out_of_bounds_pixels_are_dropped() {
        let mut fb = MonoFrameBuffer::new();
        Pixel(Point::new(-1, 5), BinaryColor::On).draw(&mut fb).unwrap();
        Pixel(Point::new(128, 5), BinaryColor::On).draw(&mut fb).unwrap();
        assert_eq!(fb.lit_pixels(), 0);
        assert_eq!(fb.pixel(128, 0), None);
    }

    #[test]
    fn test_fill_solid_clips_to_panel() {
        let mut fb = MonoFrameBuffer::new();
        Rectangle::new(Point::new(120, 60), Size::new(20, 20))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(&mut fb)
            .unwrap();
        assert_eq!(fb.lit_pixels(), 8 * 4);
        assert_eq!(fb.pixel(127, 63), Some(BinaryColor::On));
    }

    #[test]
    fn test_flush_sends_only_dirty_region() {
        let mut fb = MonoFrameBuffer::new();
        Rectangle::new(Point::new(2, 3), Size::new(4, 2))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(&mut fb)
            .unwrap();
        assert!(fb.is_dirty());

        let mut panel: MockDisplay<BinaryColor> = MockDisplay::new();
        fb.flush(&mut panel).unwrap();
        assert!(!fb.is_dirty());
        assert_eq!(
            panel.affected_area(),
            Rectangle::new(Point::new(2, 3), Size::new(4, 2))
        );

        // Nothing changed, so a second flush touches nothing.
        let mut untouched: MockDisplay<BinaryColor> = MockDisplay::new();
        fb.flush(&mut untouched).unwrap();
        assert_eq!(untouched.affected_area().size, Size::zero());
    }
}
