/*
 *  plugin/traits.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Surface plugin and detection contracts
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

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::surface::context::SurfaceContext;
use crate::surface::error::SurfaceError;
use crate::surface::traits::SurfaceDriver;
use crate::surface::types::{SurfaceId, SurfaceLayout, SurfaceRegisterProps, TransferVariable};

/// A surface found by a scan or by detection, not yet opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredSurfaceInfo {
    pub surface_id: SurfaceId,
    pub description: String,
    /// Whatever the plugin needs to open the surface later
    #[serde(default)]
    pub plugin_info: Value,
}

impl DiscoveredSurfaceInfo {
    pub fn summary(&self) -> CheckDeviceResult {
        CheckDeviceResult {
            surface_id: self.surface_id.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDeviceResult {
    pub surface_id: SurfaceId,
    pub description: String,
}

/// Reported to the host once a surface is open
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenDeviceResult {
    pub surface_id: SurfaceId,
    pub description: String,
    pub supports_brightness: bool,
    pub surface_layout: SurfaceLayout,
    pub transfer_variables: Option<Vec<TransferVariable>>,
    /// Network address of remote surfaces, `None` for local ones
    pub location: Option<String>,
}

/// What a plugin hands back from `open_surface`
pub struct OpenSurfaceResult {
    pub surface: Arc<dyn SurfaceDriver>,
    pub register_props: SurfaceRegisterProps,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PluginFeatures {
    pub supports_detection: bool,
    pub supports_hid: bool,
    pub supports_scan: bool,
}

/// USB HID device as enumerated by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub interface: i32,
    #[serde(default)]
    pub usage_page: Option<u16>,
    #[serde(default)]
    pub usage: Option<u16>,
}

/// Pushed by plugins with their own detection mechanism
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
    SurfacesAdded(Vec<DiscoveredSurfaceInfo>),
    SurfacesRemoved(Vec<SurfaceId>),
}

/// Built-in detection, for plugins that cannot use host scanning
#[async_trait]
pub trait SurfaceDetection: Send + Sync {
    /// User requested rescan; results arrive as events
    async fn trigger_scan(&self) -> Result<(), SurfaceError>;

    /// The host declined a discovered surface, release anything held for it
    fn reject_surface(&self, info: &DiscoveredSurfaceInfo);

    /// Event stream, taken once by the host during init. Events sent before
    /// then are buffered.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DetectionEvent>>;
}

/// A family of surfaces - every surface plugin implements this trait
#[async_trait]
pub trait SurfacePlugin: Send + Sync {
    /// Plugin name, used in logs
    fn name(&self) -> &str;

    /// Push detection, when the plugin does its own discovery
    fn detection(&self) -> Option<Arc<dyn SurfaceDetection>> {
        None
    }

    /// Called once before any other use
    async fn init(&self) -> Result<(), SurfaceError>;

    /// Called once before unloading; open surfaces are already closed
    async fn destroy(&self) -> Result<(), SurfaceError>;

    fn supports_hid(&self) -> bool {
        false
    }

    /// Whether a HID device belongs to this plugin. Must not open it.
    fn check_supports_hid_device(&self, device: &HidDevice) -> Option<DiscoveredSurfaceInfo> {
        let _ = device;
        None
    }

    fn supports_scan(&self) -> bool {
        false
    }

    /// Look for surfaces without opening them
    async fn scan_for_surfaces(&self) -> Result<Vec<DiscoveredSurfaceInfo>, SurfaceError> {
        Err(SurfaceError::UnsupportedOperation)
    }

    /// Open a surface. May be called for several surfaces in parallel.
    async fn open_surface(
        &self,
        surface_id: &str,
        plugin_info: &Value,
        context: SurfaceContext,
    ) -> Result<OpenSurfaceResult, SurfaceError>;
}
