/*
 *  surface/traits.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Surface driver abstraction
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

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::firmware::FirmwareUpdateCache;
use crate::graphics::CardGenerator;
use crate::surface::error::SurfaceError;
use crate::surface::types::{DrawProps, FirmwareCheck};

/// Device level operations - every surface driver implements this trait
///
/// Calls come from the surface's job queue one at a time, so drivers only
/// need interior mutability for state shared with their own input readers.
/// Long running draws should watch the cancellation token and return
/// [`SurfaceError::Cancelled`] once it fires.
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// Unique id, typically the serial number
    fn surface_id(&self) -> &str;

    /// User friendly product name
    fn product_name(&self) -> &str;

    /// Prepare the device, called once after open
    async fn init(&self) -> Result<(), SurfaceError>;

    /// Release the device
    async fn close(&self) -> Result<(), SurfaceError>;

    /// The surface is about to start drawing
    async fn ready(&self) -> Result<(), SurfaceError>;

    /// Brightness in percent, 0-100
    async fn set_brightness(&self, percent: u8) -> Result<(), SurfaceError>;

    /// Turn every control off
    async fn blank(&self) -> Result<(), SurfaceError>;

    /// Draw one control
    async fn draw(&self, token: &CancellationToken, props: &DrawProps)
    -> Result<(), SurfaceError>;

    /// Replace normal operation with a status screen
    async fn show_status(
        &self,
        token: &CancellationToken,
        cards: &dyn CardGenerator,
        status: &str,
    ) -> Result<(), SurfaceError>;

    /// Output variable pushed from the host
    fn on_variable_value(&self, name: &str, value: &Value) -> Result<(), SurfaceError> {
        let _ = (name, value);
        Err(SurfaceError::UnsupportedOperation)
    }

    /// Lock indicator for surfaces with their own pincode display
    fn show_locked_status(&self, locked: bool, character_count: usize) {
        let _ = (locked, character_count);
    }

    /// Compare published firmware against the device.
    ///
    /// Only report [`FirmwareCheck::Changed`] when the result differs from
    /// what this driver reported last time.
    async fn check_for_firmware_updates(
        &self,
        cache: &dyn FirmwareUpdateCache,
    ) -> Result<FirmwareCheck, SurfaceError> {
        let _ = cache;
        Ok(FirmwareCheck::Unchanged)
    }
}
