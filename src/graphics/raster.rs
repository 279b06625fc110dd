/*
 *  graphics/raster.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Default card and keypad renderer using embedded-graphics mono fonts
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

use embedded_graphics::{
    mono_font::{
        MonoFont, MonoTextStyle,
        ascii::{FONT_6X10, FONT_9X15, FONT_10X20},
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{PrimitiveStyleBuilder, Rectangle},
};
use embedded_text::{
    TextBox,
    alignment::{HorizontalAlignment, VerticalAlignment},
    style::TextBoxStyleBuilder,
};

use super::canvas::Canvas;
use super::{HostCardGenerator, LockingGraphicsGenerator};
use crate::surface::error::SurfaceError;
use crate::surface::types::{BitmapConfig, PixelFormat};

const ACCENT: Rgb888 = Rgb888::new(0xd5, 0x00, 0x2c);

/// Largest font whose glyph fits `max_height`
fn font_for(max_height: u32) -> &'static MonoFont<'static> {
    [&FONT_10X20, &FONT_9X15]
        .into_iter()
        .find(|font| font.character_size.height <= max_height)
        .unwrap_or(&FONT_6X10)
}

fn check_size(width: u32, height: u32) -> Result<(), SurfaceError> {
    if width == 0 || height == 0 {
        return Err(SurfaceError::Graphics(format!(
            "cannot render a {}x{} bitmap",
            width, height
        )));
    }
    Ok(())
}

fn draw_text_box(
    canvas: &mut Canvas,
    text: &str,
    area: Rectangle,
    font: &MonoFont,
    color: Rgb888,
    align: HorizontalAlignment,
) {
    let character_style = MonoTextStyle::new(font, color);
    let textbox_style = TextBoxStyleBuilder::new()
        .alignment(align)
        .vertical_alignment(VerticalAlignment::Middle)
        .build();
    // canvas drawing is infallible
    let _ = TextBox::with_textbox_style(text, area, character_style, textbox_style).draw(canvas);
}

/// Renders cards and keypad glyphs as white text on black
#[derive(Debug, Clone, Default)]
pub struct RasterGraphics {
    /// Title shown on the basic card
    pub title: String,
}

impl RasterGraphics {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    fn centered(&self, width: u32, height: u32, text: &str, color: Rgb888) -> Canvas {
        let mut canvas = Canvas::new(width, height);
        let font = font_for(height * 2 / 3);
        draw_text_box(
            &mut canvas,
            text,
            Rectangle::new(Point::zero(), Size::new(width, height)),
            font,
            color,
            HorizontalAlignment::Center,
        );
        canvas
    }
}

impl LockingGraphicsGenerator for RasterGraphics {
    fn generate_pincode_char(
        &self,
        bitmap: &BitmapConfig,
        glyph: &str,
    ) -> Result<Vec<u8>, SurfaceError> {
        check_size(bitmap.w, bitmap.h)?;
        Ok(self
            .centered(bitmap.w, bitmap.h, glyph, Rgb888::WHITE)
            .to_bytes(bitmap.pixel_format()))
    }

    fn generate_pincode_value(
        &self,
        bitmap: &BitmapConfig,
        char_count: usize,
    ) -> Result<Vec<u8>, SurfaceError> {
        check_size(bitmap.w, bitmap.h)?;
        let text = if char_count == 0 {
            "PIN".to_string()
        } else {
            "*".repeat(char_count)
        };
        Ok(self
            .centered(bitmap.w, bitmap.h, &text, Rgb888::WHITE)
            .to_bytes(bitmap.pixel_format()))
    }
}

impl HostCardGenerator for RasterGraphics {
    fn basic_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        remote_ip: &str,
        status: &str,
    ) -> Result<Vec<u8>, SurfaceError> {
        check_size(width, height)?;
        let mut canvas = Canvas::new(width, height);

        // title band across the top third
        let band = (height / 3).max(1);
        let _ = Rectangle::new(Point::zero(), Size::new(width, band))
            .into_styled(PrimitiveStyleBuilder::new().fill_color(ACCENT).build())
            .draw(&mut canvas);
        draw_text_box(
            &mut canvas,
            &self.title,
            Rectangle::new(Point::zero(), Size::new(width, band)),
            font_for(band),
            Rgb888::WHITE,
            HorizontalAlignment::Center,
        );

        let body = format!("{}\n{}", remote_ip, status);
        draw_text_box(
            &mut canvas,
            &body,
            Rectangle::new(Point::new(0, band as i32), Size::new(width, height - band)),
            &FONT_6X10,
            Rgb888::WHITE,
            HorizontalAlignment::Center,
        );
        Ok(canvas.to_bytes(format))
    }

    fn lcd_strip_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        remote_ip: &str,
        status: &str,
    ) -> Result<Vec<u8>, SurfaceError> {
        check_size(width, height)?;
        let mut canvas = Canvas::new(width, height);
        draw_text_box(
            &mut canvas,
            &format!("{} - {}", remote_ip, status),
            Rectangle::new(Point::new(4, 0), Size::new(width.saturating_sub(4), height)),
            font_for(height),
            Rgb888::WHITE,
            HorizontalAlignment::Left,
        );
        Ok(canvas.to_bytes(format))
    }

    fn logo_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, SurfaceError> {
        check_size(width, height)?;
        Ok(self.centered(width, height, "LyS", ACCENT).to_bytes(format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::{CardGenerator, ScopedCardGenerator};
    use std::sync::Arc;

    #[test]
    fn test_glyph_sizes_match_bitmap() {
        let gfx = RasterGraphics::new("LySurface");
        let bitmap = BitmapConfig::new(72, 72, PixelFormat::Bgra);

        let digit = gfx.generate_pincode_char(&bitmap, "7").unwrap();
        assert_eq!(digit.len(), bitmap.byte_len());
        assert!(digit.chunks(4).any(|px| px[0] != 0), "glyph should draw pixels");

        let mask = gfx.generate_pincode_value(&bitmap, 4).unwrap();
        assert_eq!(mask.len(), 72 * 72 * 4);
    }

    #[test]
    fn test_zero_sized_bitmap_fails() {
        let gfx = RasterGraphics::default();
        let bitmap = BitmapConfig::new(0, 10, PixelFormat::Rgb);
        assert!(matches!(
            gfx.generate_pincode_char(&bitmap, "1"),
            Err(SurfaceError::Graphics(_))
        ));
    }

    #[test]
    fn test_scoped_cards() {
        let scoped = ScopedCardGenerator::new(
            Arc::new(RasterGraphics::new("LySurface")),
            "10.0.0.2",
            "Connecting",
        );
        assert_eq!(scoped.status(), "Connecting");
        assert_eq!(scoped.basic_card(96, 96, PixelFormat::Rgb).unwrap().len(), 96 * 96 * 3);
        assert_eq!(
            scoped.lcd_strip_card(800, 100, PixelFormat::Rgba).unwrap().len(),
            800 * 100 * 4
        );
        assert_eq!(scoped.logo_card(32, 32, PixelFormat::Bgr).unwrap().len(), 32 * 32 * 3);
    }
}
