/*
 *  graphics/canvas.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Runtime-sized RGB canvas packed into surface pixel formats
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use core::convert::Infallible;

use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;

use crate::surface::types::PixelFormat;

/// A runtime-sized RGB canvas for embedded-graphics.
#[derive(Debug, Clone)]
pub struct Canvas {
    buf: Vec<Rgb888>,
    w: usize,
    h: usize,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self {
            buf: vec![Rgb888::BLACK; w * h],
            w,
            h,
        }
    }

    pub fn as_slice(&self) -> &[Rgb888] {
        &self.buf
    }

    /// Map (x,y) to linear index; returns None if out of bounds
    #[inline]
    fn idx(&self, p: Point) -> Option<usize> {
        if p.x >= 0 && p.y >= 0 {
            let (x, y) = (p.x as usize, p.y as usize);
            if x < self.w && y < self.h {
                return Some(y * self.w + x);
            }
        }
        None
    }

    /// Pack the canvas in the byte order a surface expects.
    ///
    /// Alpha formats are written fully opaque.
    pub fn to_bytes(&self, format: PixelFormat) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.buf.len() * format.bytes_per_pixel());
        for px in &self.buf {
            match format {
                PixelFormat::Rgb => bytes.extend_from_slice(&[px.r(), px.g(), px.b()]),
                PixelFormat::Rgba => bytes.extend_from_slice(&[px.r(), px.g(), px.b(), 0xff]),
                PixelFormat::Bgr => bytes.extend_from_slice(&[px.b(), px.g(), px.r()]),
                PixelFormat::Bgra => bytes.extend_from_slice(&[px.b(), px.g(), px.r(), 0xff]),
            }
        }
        bytes
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.w as u32, self.h as u32)
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(p, c) in pixels {
            if let Some(i) = self.idx(p) {
                self.buf[i] = c;
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.buf.fill(color);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

    #[test]
    fn test_pack_orders() {
        let mut canvas = Canvas::new(2, 1);
        Pixel(Point::new(0, 0), Rgb888::new(1, 2, 3))
            .draw(&mut canvas)
            .unwrap();

        assert_eq!(canvas.to_bytes(PixelFormat::Rgb), vec![1, 2, 3, 0, 0, 0]);
        assert_eq!(canvas.to_bytes(PixelFormat::Bgr), vec![3, 2, 1, 0, 0, 0]);
        assert_eq!(
            canvas.to_bytes(PixelFormat::Bgra),
            vec![3, 2, 1, 0xff, 0, 0, 0, 0xff]
        );
    }

    #[test]
    fn test_out_of_bounds_is_clipped() {
        let mut canvas = Canvas::new(4, 4);
        Rectangle::new(Point::new(2, 2), Size::new(10, 10))
            .into_styled(PrimitiveStyle::with_fill(Rgb888::WHITE))
            .draw(&mut canvas)
            .unwrap();
        let lit = canvas.as_slice().iter().filter(|c| **c == Rgb888::WHITE).count();
        assert_eq!(lit, 4);
    }
}
