/*
 *  drivers/virtual_surface.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Virtual surface driver for testing without hardware
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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::firmware::FirmwareUpdateCache;
use crate::graphics::CardGenerator;
use crate::logging::ModuleLogger;
use crate::plugin::traits::{
    DetectionEvent, DiscoveredSurfaceInfo, OpenSurfaceResult, SurfaceDetection, SurfacePlugin,
};
use crate::surface::context::SurfaceContext;
use crate::surface::error::SurfaceError;
use crate::surface::pincode::PincodeMap;
use crate::surface::traits::SurfaceDriver;
use crate::surface::types::{
    BitmapConfig, DrawProps, FirmwareCheck, FirmwareUpdateInfo, SurfaceLayout,
    SurfaceRegisterProps, TransferDirection, TransferVariable,
};

/// One virtual surface, as read from the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualSurfaceConfig {
    pub surface_id: String,
    pub description: String,
    pub rows: u32,
    pub columns: u32,

    /// Per-button bitmap; `None` gives colour and text buttons
    pub bitmap: Option<BitmapConfig>,

    pub brightness: bool,
    pub pincode: Option<PincodeMap>,
    pub transfer_variables: Vec<TransferVariable>,

    /// JSON document with `latest_version` and `update_url`
    pub firmware_url: Option<String>,
    pub firmware_version: String,

    /// Simulated I/O time per draw
    pub draw_delay_ms: u64,
    /// Simulated device handshake before open returns
    pub open_delay_ms: u64,

    /// Simulate failures (for error testing)
    pub simulate_open_failure: bool,
    pub simulate_init_failure: bool,
}

impl Default for VirtualSurfaceConfig {
    fn default() -> Self {
        Self {
            surface_id: "virtual".to_string(),
            description: "Virtual Surface".to_string(),
            rows: 3,
            columns: 5,
            bitmap: None,
            brightness: true,
            pincode: None,
            transfer_variables: Vec::new(),
            firmware_url: None,
            firmware_version: "1.0.0".to_string(),
            draw_delay_ms: 0,
            open_delay_ms: 0,
            simulate_open_failure: false,
            simulate_init_failure: false,
        }
    }
}

impl VirtualSurfaceConfig {
    pub fn layout(&self) -> SurfaceLayout {
        SurfaceLayout::grid(self.rows, self.columns, self.bitmap)
    }

    fn discovered(&self) -> Result<DiscoveredSurfaceInfo, SurfaceError> {
        Ok(DiscoveredSurfaceInfo {
            surface_id: self.surface_id.clone(),
            description: self.description.clone(),
            plugin_info: serde_json::to_value(self)?,
        })
    }
}

/// Everything the virtual device saw (shared for inspection in tests)
#[derive(Debug, Clone, Default)]
pub struct VirtualSurfaceState {
    pub init_count: usize,
    pub close_count: usize,
    pub ready_count: usize,
    pub blank_count: usize,
    pub last_brightness: Option<u8>,

    /// Control ids in draw order
    pub draw_log: Vec<String>,
    /// Latest draw per control
    pub drawn: HashMap<String, DrawProps>,

    pub status_log: Vec<String>,
    /// Size of the last status card, when the surface has a bitmap
    pub status_card_len: Option<usize>,

    pub lock_status: Option<(bool, usize)>,
    pub variables: HashMap<String, Value>,

    pub firmware_checks: usize,
    /// What the last firmware check reported
    pub reported_update: Option<FirmwareUpdateInfo>,

    pub simulate_draw_failure: bool,
}

/// Driver for a surface that exists only in memory
pub struct VirtualSurface {
    config: VirtualSurfaceConfig,
    context: SurfaceContext,
    state: Arc<Mutex<VirtualSurfaceState>>,
    logger: ModuleLogger,
}

impl VirtualSurface {
    /// Create the driver and the props it registers with
    pub fn open(
        config: &VirtualSurfaceConfig,
        context: SurfaceContext,
    ) -> (VirtualSurface, SurfaceRegisterProps) {
        let props = SurfaceRegisterProps {
            brightness: config.brightness,
            surface_layout: config.layout(),
            transfer_variables: config.transfer_variables.clone(),
            pincode_map: config.pincode.clone(),
        };
        let surface = VirtualSurface {
            config: config.clone(),
            context,
            state: Arc::new(Mutex::new(VirtualSurfaceState::default())),
            logger: ModuleLogger::new(format!("VirtualSurface/{}", config.surface_id)),
        };
        (surface, props)
    }

    /// Input side, for feeding presses into the host
    pub fn context(&self) -> &SurfaceContext {
        &self.context
    }

    /// Snapshot of the recorded state
    pub fn state(&self) -> VirtualSurfaceState {
        self.state.lock().clone()
    }

    pub fn update_state(&self, f: impl FnOnce(&mut VirtualSurfaceState)) {
        f(&mut self.state.lock());
    }

    /// Forget recorded draws and status cards (useful between test steps)
    pub fn reset_log(&self) {
        let mut state = self.state.lock();
        state.draw_log.clear();
        state.drawn.clear();
        state.status_log.clear();
    }

    /// Pretend the device went away
    pub fn unplug(&self) {
        self.logger.info(format_args!("Unplugged"));
        self.context
            .disconnect(SurfaceError::Driver("device unplugged".to_string()));
    }

    fn accepts_variable(&self, name: &str) -> bool {
        self.config
            .transfer_variables
            .iter()
            .any(|v| v.id == name && v.direction == TransferDirection::Output)
    }
}

#[async_trait]
impl SurfaceDriver for VirtualSurface {
    fn surface_id(&self) -> &str {
        &self.config.surface_id
    }

    fn product_name(&self) -> &str {
        &self.config.description
    }

    async fn init(&self) -> Result<(), SurfaceError> {
        if self.config.simulate_init_failure {
            return Err(SurfaceError::Driver("Simulated init failure".to_string()));
        }
        self.state.lock().init_count += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), SurfaceError> {
        self.state.lock().close_count += 1;
        Ok(())
    }

    async fn ready(&self) -> Result<(), SurfaceError> {
        self.state.lock().ready_count += 1;
        Ok(())
    }

    async fn set_brightness(&self, percent: u8) -> Result<(), SurfaceError> {
        self.state.lock().last_brightness = Some(percent);
        Ok(())
    }

    async fn blank(&self) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        state.blank_count += 1;
        state.drawn.clear();
        Ok(())
    }

    async fn draw(&self, token: &CancellationToken, props: &DrawProps) -> Result<(), SurfaceError> {
        if self.config.draw_delay_ms > 0 {
            tokio::select! {
                _ = token.cancelled() => return Err(SurfaceError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(self.config.draw_delay_ms)) => {}
            }
        }

        if let (Some(image), Some(bitmap)) = (&props.image, &self.config.bitmap) {
            if image.len() != bitmap.byte_len() {
                return Err(SurfaceError::Driver(format!(
                    "Bitmap for {} is {} bytes, expected {}",
                    props.control_id,
                    image.len(),
                    bitmap.byte_len()
                )));
            }
        }

        let mut state = self.state.lock();
        if state.simulate_draw_failure {
            return Err(SurfaceError::Driver("Simulated draw failure".to_string()));
        }
        state.draw_log.push(props.control_id.clone());
        state.drawn.insert(props.control_id.clone(), props.clone());
        Ok(())
    }

    async fn show_status(
        &self,
        token: &CancellationToken,
        cards: &dyn CardGenerator,
        status: &str,
    ) -> Result<(), SurfaceError> {
        let card = match &self.config.bitmap {
            Some(bitmap) => Some(cards.basic_card(bitmap.w, bitmap.h, bitmap.pixel_format())?),
            None => None,
        };
        if token.is_cancelled() {
            return Err(SurfaceError::Cancelled);
        }

        let mut state = self.state.lock();
        state.status_card_len = card.map(|c| c.len());
        state.status_log.push(status.to_string());
        Ok(())
    }

    fn on_variable_value(&self, name: &str, value: &Value) -> Result<(), SurfaceError> {
        if !self.accepts_variable(name) {
            return Err(SurfaceError::UnsupportedOperation);
        }
        self.state
            .lock()
            .variables
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn show_locked_status(&self, locked: bool, character_count: usize) {
        self.state.lock().lock_status = Some((locked, character_count));
    }

    async fn check_for_firmware_updates(
        &self,
        cache: &dyn FirmwareUpdateCache,
    ) -> Result<FirmwareCheck, SurfaceError> {
        let Some(url) = &self.config.firmware_url else {
            return Ok(FirmwareCheck::Unchanged);
        };
        self.state.lock().firmware_checks += 1;

        let payload = cache
            .fetch_json(url)
            .await
            .ok_or_else(|| SurfaceError::Fetch(format!("no firmware metadata at {}", url)))?;

        let latest = payload.get("latest_version").and_then(Value::as_str);
        let update = match (latest, payload.get("update_url").and_then(Value::as_str)) {
            (Some(latest), Some(update_url)) if latest != self.config.firmware_version => {
                Some(FirmwareUpdateInfo {
                    update_url: update_url.to_string(),
                })
            }
            _ => None,
        };

        let mut state = self.state.lock();
        if state.reported_update == update {
            return Ok(FirmwareCheck::Unchanged);
        }
        state.reported_update = update.clone();
        Ok(FirmwareCheck::Changed(update))
    }
}

/// Push detection for virtual surfaces; `trigger_scan` announces every
/// configured surface.
pub struct VirtualDetection {
    configs: Vec<VirtualSurfaceConfig>,
    tx: mpsc::UnboundedSender<DetectionEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DetectionEvent>>>,
    rejected: Mutex<Vec<String>>,
}

impl VirtualDetection {
    pub fn new(configs: Vec<VirtualSurfaceConfig>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            configs,
            tx,
            rx: Mutex::new(Some(rx)),
            rejected: Mutex::new(Vec::new()),
        }
    }

    pub fn announce(&self, configs: &[VirtualSurfaceConfig]) -> Result<(), SurfaceError> {
        let infos = configs
            .iter()
            .map(VirtualSurfaceConfig::discovered)
            .collect::<Result<Vec<_>, _>>()?;
        self.send(DetectionEvent::SurfacesAdded(infos))
    }

    pub fn remove(&self, surface_ids: &[&str]) -> Result<(), SurfaceError> {
        let ids = surface_ids.iter().map(|id| id.to_string()).collect();
        self.send(DetectionEvent::SurfacesRemoved(ids))
    }

    /// Ids the host declined, oldest first
    pub fn rejected(&self) -> Vec<String> {
        self.rejected.lock().clone()
    }

    fn send(&self, event: DetectionEvent) -> Result<(), SurfaceError> {
        self.tx
            .send(event)
            .map_err(|_| SurfaceError::Driver("detection listener has gone".to_string()))
    }
}

#[async_trait]
impl SurfaceDetection for VirtualDetection {
    async fn trigger_scan(&self) -> Result<(), SurfaceError> {
        self.announce(&self.configs)
    }

    fn reject_surface(&self, info: &DiscoveredSurfaceInfo) {
        self.rejected.lock().push(info.surface_id.clone());
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DetectionEvent>> {
        self.rx.lock().take()
    }
}

/// Plugin serving the virtual surfaces from the config, either by scan or
/// by push detection
pub struct VirtualSurfacePlugin {
    configs: Mutex<Vec<VirtualSurfaceConfig>>,
    detection: Option<Arc<VirtualDetection>>,
    /// Drivers stay here after close, until `destroy`, so their recorded
    /// state can still be inspected. A closed driver is no longer reachable
    /// from the host.
    opened: Mutex<HashMap<String, Arc<VirtualSurface>>>,
    logger: ModuleLogger,
}

impl VirtualSurfacePlugin {
    /// Surfaces are found with `scan_for_surfaces`
    pub fn scanning(configs: Vec<VirtualSurfaceConfig>) -> Self {
        Self {
            configs: Mutex::new(configs),
            detection: None,
            opened: Mutex::new(HashMap::new()),
            logger: ModuleLogger::new("VirtualSurfacePlugin"),
        }
    }

    /// Surfaces are announced through detection events
    pub fn detecting(configs: Vec<VirtualSurfaceConfig>) -> Self {
        let detection = Arc::new(VirtualDetection::new(configs.clone()));
        Self {
            detection: Some(detection),
            ..Self::scanning(configs)
        }
    }

    pub fn virtual_detection(&self) -> Option<&Arc<VirtualDetection>> {
        self.detection.as_ref()
    }

    /// Change what the next scan finds
    pub fn set_configs(&self, configs: Vec<VirtualSurfaceConfig>) {
        *self.configs.lock() = configs;
    }

    /// The most recently opened driver for `surface_id`, closed or not
    pub fn surface(&self, surface_id: &str) -> Option<Arc<VirtualSurface>> {
        self.opened.lock().get(surface_id).cloned()
    }
}

#[async_trait]
impl SurfacePlugin for VirtualSurfacePlugin {
    fn name(&self) -> &str {
        "virtual"
    }

    fn detection(&self) -> Option<Arc<dyn SurfaceDetection>> {
        self.detection
            .as_ref()
            .map(|d| Arc::clone(d) as Arc<dyn SurfaceDetection>)
    }

    async fn init(&self) -> Result<(), SurfaceError> {
        self.logger.info(format_args!(
            "{} virtual surfaces configured",
            self.configs.lock().len()
        ));
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SurfaceError> {
        self.opened.lock().clear();
        Ok(())
    }

    fn supports_scan(&self) -> bool {
        true
    }

    async fn scan_for_surfaces(&self) -> Result<Vec<DiscoveredSurfaceInfo>, SurfaceError> {
        self.configs
            .lock()
            .iter()
            .map(VirtualSurfaceConfig::discovered)
            .collect()
    }

    async fn open_surface(
        &self,
        surface_id: &str,
        plugin_info: &Value,
        context: SurfaceContext,
    ) -> Result<OpenSurfaceResult, SurfaceError> {
        let config: VirtualSurfaceConfig = serde_json::from_value(plugin_info.clone())?;
        if config.surface_id != surface_id {
            return Err(SurfaceError::Driver(format!(
                "plugin info is for {}, not {}",
                config.surface_id, surface_id
            )));
        }
        if config.simulate_open_failure {
            return Err(SurfaceError::Driver("Simulated open failure".to_string()));
        }
        if config.open_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.open_delay_ms)).await;
        }

        let (surface, register_props) = VirtualSurface::open(&config, context);
        let surface = Arc::new(surface);
        self.opened
            .lock()
            .insert(surface_id.to_string(), Arc::clone(&surface));

        self.logger
            .debug(format_args!("Opened virtual surface {}", surface_id));
        Ok(OpenSurfaceResult {
            surface,
            register_props,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::events::RecordingEvents;
    use crate::surface::types::PixelFormat;
    use serde_json::json;

    struct StaticCache(Value);

    #[async_trait]
    impl FirmwareUpdateCache for StaticCache {
        async fn fetch_json(&self, _url: &str) -> Option<Arc<Value>> {
            Some(Arc::new(self.0.clone()))
        }
    }

    fn surface(config: VirtualSurfaceConfig) -> VirtualSurface {
        let context = SurfaceContext::new(
            config.surface_id.clone(),
            Arc::new(RecordingEvents::new()),
            Arc::new(|_err: SurfaceError| {}),
        );
        VirtualSurface::open(&config, context).0
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
surface_id: desk-1
rows: 2
columns: 8
bitmap: { w: 72, h: 72, format: bgra }
pincode:
  type: single-page
  pincode: "0/0"
  digits: { 1: "0/1", 2: "0/2" }
"#;
        let config: VirtualSurfaceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.surface_id, "desk-1");
        assert_eq!(config.layout().controls.len(), 16);
        assert_eq!(config.bitmap.map(|b| b.pixel_format()), Some(PixelFormat::Bgra));
        assert!(config.brightness);
        assert!(matches!(config.pincode, Some(PincodeMap::SinglePage { .. })));
    }

    #[tokio::test]
    async fn test_draw_rejects_wrong_bitmap_size() {
        let surface = surface(VirtualSurfaceConfig {
            bitmap: Some(BitmapConfig::new(4, 4, PixelFormat::Rgb)),
            ..Default::default()
        });
        let token = CancellationToken::new();

        let bad = DrawProps::new("0/0").with_image(vec![0; 10]);
        assert!(surface.draw(&token, &bad).await.is_err());

        let good = DrawProps::new("0/0").with_image(vec![0; 48]);
        surface.draw(&token, &good).await.unwrap();
        assert_eq!(surface.state().draw_log, vec!["0/0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_draw_observes_cancellation() {
        let surface = surface(VirtualSurfaceConfig {
            draw_delay_ms: 1000,
            ..Default::default()
        });
        let token = CancellationToken::new();
        token.cancel();

        let result = surface.draw(&token, &DrawProps::new("0/0")).await;
        assert!(matches!(result, Err(SurfaceError::Cancelled)));
        assert!(surface.state().draw_log.is_empty());
    }

    #[tokio::test]
    async fn test_firmware_check_reports_changes_only() {
        let surface = surface(VirtualSurfaceConfig {
            firmware_url: Some("https://example.invalid/fw.json".into()),
            firmware_version: "1.0.0".into(),
            ..Default::default()
        });
        let newer = StaticCache(json!({
            "latest_version": "1.1.0",
            "update_url": "https://example.invalid/fw-1.1.0.bin"
        }));

        let first = surface.check_for_firmware_updates(&newer).await.unwrap();
        assert!(matches!(first, FirmwareCheck::Changed(Some(_))));
        let again = surface.check_for_firmware_updates(&newer).await.unwrap();
        assert_eq!(again, FirmwareCheck::Unchanged);

        let current = StaticCache(json!({ "latest_version": "1.0.0", "update_url": "x" }));
        let cleared = surface.check_for_firmware_updates(&current).await.unwrap();
        assert_eq!(cleared, FirmwareCheck::Changed(None));
    }

    #[test]
    fn test_output_variables_only() {
        let surface = surface(VirtualSurfaceConfig {
            transfer_variables: vec![TransferVariable {
                id: "leds".into(),
                direction: TransferDirection::Output,
                name: "LEDs".into(),
                description: None,
            }],
            ..Default::default()
        });

        surface.on_variable_value("leds", &json!([1, 0, 1])).unwrap();
        assert!(matches!(
            surface.on_variable_value("tbar", &json!(12)),
            Err(SurfaceError::UnsupportedOperation)
        ));
        assert_eq!(surface.state().variables["leds"], json!([1, 0, 1]));
    }

    #[tokio::test]
    async fn test_detection_events_taken_once() {
        let plugin = VirtualSurfacePlugin::detecting(vec![VirtualSurfaceConfig::default()]);
        let detection = plugin.detection().expect("detecting plugin");

        let mut events = detection.take_events().expect("first take");
        assert!(detection.take_events().is_none());

        detection.trigger_scan().await.unwrap();
        match events.recv().await {
            Some(DetectionEvent::SurfacesAdded(infos)) => {
                assert_eq!(infos.len(), 1);
                assert_eq!(infos[0].surface_id, "virtual");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
