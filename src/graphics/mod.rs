/*
 *  graphics/mod.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Card and pincode glyph generator contracts
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

//! Raster generators used for status cards and the pincode keypad.
//!
//! Every generator returns a bitmap of exactly `w * h * bytes_per_pixel`
//! bytes in the requested [`PixelFormat`].

pub mod canvas;
pub mod raster;

use std::sync::Arc;

use crate::surface::error::SurfaceError;
use crate::surface::types::{BitmapConfig, PixelFormat};

pub use raster::RasterGraphics;

/// Glyphs for the pincode keypad
pub trait LockingGraphicsGenerator: Send + Sync {
    /// One keypad character, a digit or `+`
    fn generate_pincode_char(
        &self,
        bitmap: &BitmapConfig,
        glyph: &str,
    ) -> Result<Vec<u8>, SurfaceError>;

    /// Masked entry showing `char_count` characters
    fn generate_pincode_value(
        &self,
        bitmap: &BitmapConfig,
        char_count: usize,
    ) -> Result<Vec<u8>, SurfaceError>;
}

/// Host status cards, parameterised with the host address and message
pub trait HostCardGenerator: Send + Sync {
    fn basic_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        remote_ip: &str,
        status: &str,
    ) -> Result<Vec<u8>, SurfaceError>;

    fn lcd_strip_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        remote_ip: &str,
        status: &str,
    ) -> Result<Vec<u8>, SurfaceError>;

    fn logo_card(&self, width: u32, height: u32, format: PixelFormat)
    -> Result<Vec<u8>, SurfaceError>;
}

/// Card generator handed to a surface driver
pub trait CardGenerator: Send + Sync {
    fn basic_card(&self, width: u32, height: u32, format: PixelFormat)
    -> Result<Vec<u8>, SurfaceError>;

    fn lcd_strip_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, SurfaceError>;

    fn logo_card(&self, width: u32, height: u32, format: PixelFormat)
    -> Result<Vec<u8>, SurfaceError>;
}

/// Generators shared by every surface of a host
#[derive(Clone)]
pub struct HostGraphics {
    pub cards: Arc<dyn HostCardGenerator>,
    pub locking: Arc<dyn LockingGraphicsGenerator>,
}

impl HostGraphics {
    /// Use one renderer for both cards and keypad glyphs
    pub fn new<G>(generator: Arc<G>) -> Self
    where
        G: HostCardGenerator + LockingGraphicsGenerator + 'static,
    {
        Self {
            cards: generator.clone(),
            locking: generator,
        }
    }
}

/// Binds a host card generator to one label and status message
pub struct ScopedCardGenerator {
    host: Arc<dyn HostCardGenerator>,
    remote_ip: String,
    status: String,
}

impl ScopedCardGenerator {
    pub fn new(
        host: Arc<dyn HostCardGenerator>,
        remote_ip: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            host,
            remote_ip: remote_ip.into(),
            status: status.into(),
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

impl CardGenerator for ScopedCardGenerator {
    fn basic_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, SurfaceError> {
        self.host
            .basic_card(width, height, format, &self.remote_ip, &self.status)
    }

    fn lcd_strip_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, SurfaceError> {
        self.host
            .lcd_strip_card(width, height, format, &self.remote_ip, &self.status)
    }

    fn logo_card(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, SurfaceError> {
        self.host.logo_card(width, height, format)
    }
}
