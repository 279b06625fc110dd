/*
 *  plugin/host.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Plugin host - opens, tracks and closes the surfaces of one plugin
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

//! Surface lifecycle for one plugin.
//!
//! Opens reserve the surface id before any async work, so a second open of
//! the same id fails instead of racing. Per-surface operations reject ids
//! that are missing or still being opened.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use super::events::{HostPolicy, SurfaceEvents};
use super::registry::SurfaceRegistry;
use super::traits::{
    CheckDeviceResult, DetectionEvent, DiscoveredSurfaceInfo, HidDevice, OpenDeviceResult,
    PluginFeatures, SurfacePlugin,
};
use crate::firmware::{FirmwareSettings, FirmwareUpdateChecker, JsonFetcher};
use crate::graphics::HostGraphics;
use crate::logging::ModuleLogger;
use crate::surface::context::{DisconnectFn, SurfaceContext};
use crate::surface::error::SurfaceError;
use crate::surface::proxy::SurfaceProxy;
use crate::surface::types::DrawProps;

/// Everything the host application provides to a plugin host
#[derive(Clone)]
pub struct HostContext {
    pub events: Arc<dyn SurfaceEvents>,
    pub policy: Arc<dyn HostPolicy>,
    pub graphics: HostGraphics,
}

struct HostInner {
    plugin: Arc<dyn SurfacePlugin>,
    host: HostContext,
    registry: SurfaceRegistry,
    firmware: FirmwareUpdateChecker,
    last_scan: Mutex<Vec<DiscoveredSurfaceInfo>>,
    detection_task: Mutex<Option<JoinHandle<()>>>,
    logger: ModuleLogger,
}

#[derive(Clone)]
pub struct PluginHost {
    inner: Arc<HostInner>,
}

impl PluginHost {
    pub fn new(
        plugin: Arc<dyn SurfacePlugin>,
        host: HostContext,
        fetcher: Arc<dyn JsonFetcher>,
        firmware: FirmwareSettings,
    ) -> Self {
        let registry = SurfaceRegistry::new();
        let firmware =
            FirmwareUpdateChecker::new(firmware, registry.clone(), Arc::clone(&host.events), fetcher);
        let logger = ModuleLogger::new(format!("PluginHost/{}", plugin.name()));

        Self {
            inner: Arc::new(HostInner {
                plugin,
                host,
                registry,
                firmware,
                last_scan: Mutex::new(Vec::new()),
                detection_task: Mutex::new(None),
                logger,
            }),
        }
    }

    pub fn features(&self) -> PluginFeatures {
        PluginFeatures {
            supports_detection: self.inner.plugin.detection().is_some(),
            supports_hid: self.inner.plugin.supports_hid(),
            supports_scan: self.inner.plugin.supports_scan(),
        }
    }

    pub fn registry(&self) -> &SurfaceRegistry {
        &self.inner.registry
    }

    pub fn firmware_checker(&self) -> &FirmwareUpdateChecker {
        &self.inner.firmware
    }

    /// Wire up detection, initialise the plugin and start update polling
    pub async fn init(&self) -> Result<(), SurfaceError> {
        match self.inner.plugin.detection() {
            Some(detection) => {
                self.inner
                    .logger
                    .info(format_args!("Initialising plugin for surface detection"));
                if let Some(events) = detection.take_events() {
                    let task = tokio::spawn(run_detection(Arc::downgrade(&self.inner), events));
                    *self.inner.detection_task.lock() = Some(task);
                }
            }
            None => self.inner.logger.info(format_args!("Initialising plugin")),
        }

        self.inner.plugin.init().await?;

        self.inner.firmware.start();
        Ok(())
    }

    /// Stop polling, close every surface and destroy the plugin
    pub async fn destroy(&self) -> Result<(), SurfaceError> {
        self.inner.firmware.stop();
        if let Some(task) = self.inner.detection_task.lock().take() {
            task.abort();
        }

        let mut closing = JoinSet::new();
        for surface in self.inner.registry.clear() {
            closing.spawn(async move {
                let result = surface.close().await;
                (surface.surface_id().to_string(), result)
            });
        }
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((surface_id, Err(e))) => self
                    .inner
                    .logger
                    .error(format_args!("Error closing surface {}: {}", surface_id, e)),
                Err(e) => self
                    .inner
                    .logger
                    .error(format_args!("Error closing surface: {}", e)),
            }
        }

        self.inner.plugin.destroy().await
    }

    /// Whether this plugin would handle a HID device.
    /// Disabled for plugins with their own detection.
    pub fn check_hid_device(&self, device: &HidDevice) -> Option<CheckDeviceResult> {
        self.hid_info(device).map(|info| info.summary())
    }

    pub async fn open_hid_device(
        &self,
        device: &HidDevice,
    ) -> Result<Option<OpenDeviceResult>, SurfaceError> {
        match self.hid_info(device) {
            Some(info) => self.open_device(&info).await.map(Some),
            None => Ok(None),
        }
    }

    fn hid_info(&self, device: &HidDevice) -> Option<DiscoveredSurfaceInfo> {
        let plugin = &self.inner.plugin;
        if plugin.detection().is_some() || !plugin.supports_hid() {
            return None;
        }
        plugin.check_supports_hid_device(device)
    }

    /// Scan for surfaces. Only the latest results can be opened afterwards.
    pub async fn scan_for_devices(&self) -> Result<Vec<CheckDeviceResult>, SurfaceError> {
        if let Some(detection) = self.inner.plugin.detection() {
            self.inner
                .logger
                .info(format_args!("Triggering detection scan"));
            detection.trigger_scan().await?;
            // detection reports through its own events
            return Ok(Vec::new());
        }

        if !self.inner.plugin.supports_scan() {
            return Ok(Vec::new());
        }

        self.inner.logger.info(format_args!("Triggering surface scan"));
        let results = self.inner.plugin.scan_for_surfaces().await?;
        let summaries = results.iter().map(DiscoveredSurfaceInfo::summary).collect();
        *self.inner.last_scan.lock() = results;

        Ok(summaries)
    }

    /// Open a device from the latest scan
    pub async fn open_scanned_device(
        &self,
        device: &CheckDeviceResult,
    ) -> Result<Option<OpenDeviceResult>, SurfaceError> {
        if self.inner.plugin.detection().is_some() {
            return Ok(None);
        }

        let cached = self
            .inner
            .last_scan
            .lock()
            .iter()
            .find(|info| info.surface_id == device.surface_id)
            .cloned();

        let Some(info) = cached else {
            self.inner.logger.warn(format_args!(
                "Failed to find cached surface info for scanned device {}",
                device.surface_id
            ));
            return Err(SurfaceError::UnknownScannedDevice(device.surface_id.clone()));
        };

        self.inner
            .logger
            .info(format_args!("Opening scanned device {}", device.surface_id));
        self.open_device(&info).await.map(Some)
    }

    /// Reserve, open, init and register a surface
    pub async fn open_device(
        &self,
        info: &DiscoveredSurfaceInfo,
    ) -> Result<OpenDeviceResult, SurfaceError> {
        let surface_id = info.surface_id.as_str();
        self.inner.registry.reserve(surface_id)?;

        let context = SurfaceContext::new(
            surface_id,
            Arc::clone(&self.inner.host.events),
            self.disconnect_handler(surface_id),
        );

        let opened = match self
            .inner
            .plugin
            .open_surface(surface_id, &info.plugin_info, context.clone())
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                self.inner.registry.remove(surface_id);
                return Err(SurfaceError::lifecycle(surface_id, e));
            }
        };

        let wrapped = match opened.surface.init().await {
            Ok(()) => SurfaceProxy::new(
                Arc::clone(&opened.surface),
                context,
                opened.register_props.clone(),
                self.inner.host.graphics.clone(),
            ),
            Err(e) => Err(e),
        };
        let proxy = match wrapped {
            Ok(proxy) => Arc::new(proxy),
            Err(e) => {
                self.inner.registry.remove(surface_id);
                if let Err(close_err) = opened.surface.close().await {
                    self.inner.logger.debug(format_args!(
                        "Ignoring close error for {}: {}",
                        surface_id, close_err
                    ));
                }
                return Err(SurfaceError::lifecycle(surface_id, e));
            }
        };

        if let Err(e) = self.inner.registry.install(Arc::clone(&proxy)) {
            // reservation dropped by destroy while opening
            self.inner.logger.warn(format_args!(
                "Open of {} cancelled, closing surface",
                surface_id
            ));
            if let Err(close_err) = proxy.close().await {
                self.inner.logger.debug(format_args!(
                    "Ignoring close error for {}: {}",
                    surface_id, close_err
                ));
            }
            return Err(SurfaceError::lifecycle(surface_id, e));
        }
        self.inner.firmware.trigger_check_surface(proxy);

        let props = &opened.register_props;
        Ok(OpenDeviceResult {
            surface_id: info.surface_id.clone(),
            description: info.description.clone(),
            supports_brightness: props.brightness,
            surface_layout: props.surface_layout.clone(),
            transfer_variables: Some(props.transfer_variables.clone()),
            location: None,
        })
    }

    /// Offer a detected surface to the host and open it if accepted
    async fn offer_open_device(&self, info: DiscoveredSurfaceInfo) -> Result<(), SurfaceError> {
        if self.inner.registry.contains(&info.surface_id) {
            // already open, detection reported it twice
            return Ok(());
        }

        let should_open = self
            .inner
            .host
            .policy
            .should_open_discovered_surface(&info.summary())
            .await;
        self.inner.logger.info(format_args!(
            "Discovered surface: {}, {} (should_open={})",
            info.surface_id, info.description, should_open
        ));
        if !should_open {
            self.reject(&info);
            return Ok(());
        }

        let opened = self.open_device(&info).await?;
        self.inner
            .logger
            .info(format_args!("Opened discovered surface: {}", opened.surface_id));

        if let Err(e) = self
            .inner
            .host
            .policy
            .notify_opened_discovered_surface(&opened)
            .await
        {
            self.inner.logger.error(format_args!(
                "Error reporting opened discovered surface: {}",
                e
            ));
            if let Some(proxy) = self.inner.registry.remove_open(&info.surface_id) {
                if let Err(e) = proxy.close().await {
                    self.inner
                        .logger
                        .debug(format_args!("Ignoring close error for {}: {}", info.surface_id, e));
                }
            }
            self.reject(&info);
        }
        Ok(())
    }

    fn reject(&self, info: &DiscoveredSurfaceInfo) {
        if let Some(detection) = self.inner.plugin.detection() {
            detection.reject_surface(info);
        }
    }

    fn disconnect_handler(&self, surface_id: &str) -> DisconnectFn {
        let host = Arc::downgrade(&self.inner);
        let surface_id = surface_id.to_string();
        Arc::new(move |error: SurfaceError| {
            let Some(inner) = host.upgrade() else { return };
            inner
                .logger
                .error(format_args!("Surface error: {}", error));
            PluginHost { inner }.cleanup_surface_by_id(&surface_id);
        })
    }

    /// Forget an open surface, tell the host it is gone and close it in the
    /// background. Opens still in flight are left alone.
    pub fn cleanup_surface_by_id(&self, surface_id: &str) {
        let Some(proxy) = self.inner.registry.remove_open(surface_id) else {
            return;
        };
        self.inner.host.events.disconnected(surface_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = proxy.close().await;
                });
            }
            Err(_) => self.inner.logger.warn(format_args!(
                "No runtime to close surface {}",
                surface_id
            )),
        }
    }

    /// Close a surface and remove it from the registry
    pub async fn close_surface(&self, surface_id: &str) -> Result<(), SurfaceError> {
        let proxy = self
            .inner
            .registry
            .remove_open(surface_id)
            .ok_or_else(|| SurfaceError::SurfaceNotOpen(surface_id.to_string()))?;
        proxy.close().await
    }

    pub fn surface(&self, surface_id: &str) -> Result<Arc<SurfaceProxy>, SurfaceError> {
        self.inner.registry.get_open(surface_id)
    }

    /// Re-initialise a surface and show a status card
    pub async fn init_surface(
        &self,
        surface_id: &str,
        display_host: &str,
        status: &str,
    ) -> Result<(), SurfaceError> {
        self.surface(surface_id)?.init(display_host, status).await
    }

    /// Ignored for surfaces without brightness control
    pub async fn set_brightness(&self, surface_id: &str, percent: u8) -> Result<(), SurfaceError> {
        let surface = self.surface(surface_id)?;
        if !surface.register_props().brightness {
            return Ok(());
        }
        surface.set_brightness(percent).await
    }

    pub fn blank_surface(&self, surface_id: &str) -> Result<(), SurfaceError> {
        self.surface(surface_id)?.blank();
        Ok(())
    }

    pub async fn ready_surface(&self, surface_id: &str) -> Result<(), SurfaceError> {
        self.surface(surface_id)?.ready().await
    }

    /// Queue draws; stops at the first control the layout doesn't declare
    pub fn draw(&self, surface_id: &str, draws: &[DrawProps]) -> Result<(), SurfaceError> {
        let surface = self.surface(surface_id)?;
        for props in draws {
            if !surface
                .register_props()
                .surface_layout
                .has_control(&props.control_id)
            {
                return Err(SurfaceError::UnknownControl {
                    surface_id: surface_id.to_string(),
                    control_id: props.control_id.clone(),
                });
            }
            surface.draw(props.clone());
        }
        Ok(())
    }

    pub fn on_variable_value(
        &self,
        surface_id: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), SurfaceError> {
        self.surface(surface_id)?.on_variable_value(name, value)
    }

    pub fn show_locked_status(
        &self,
        surface_id: &str,
        locked: bool,
        character_count: usize,
    ) -> Result<(), SurfaceError> {
        self.surface(surface_id)?
            .show_locked_status(locked, character_count);
        Ok(())
    }

    pub fn show_status(
        &self,
        surface_id: &str,
        display_host: &str,
        status: &str,
    ) -> Result<(), SurfaceError> {
        self.surface(surface_id)?.show_status(display_host, status);
        Ok(())
    }
}

async fn run_detection(host: Weak<HostInner>, mut events: mpsc::UnboundedReceiver<DetectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = host.upgrade() else { break };
        let host = PluginHost { inner };

        match event {
            DetectionEvent::SurfacesRemoved(surface_ids) => {
                for surface_id in surface_ids {
                    host.cleanup_surface_by_id(&surface_id);
                }
            }
            DetectionEvent::SurfacesAdded(infos) => {
                for info in infos {
                    let host = host.clone();
                    tokio::spawn(async move {
                        if let Err(e) = host.offer_open_device(info).await {
                            host.inner
                                .logger
                                .error(format_args!("Error opening discovered device: {}", e));
                        }
                    });
                }
            }
        }
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        self.firmware.stop();
        if let Some(task) = self.detection_task.get_mut().take() {
            task.abort();
        }
    }
}
