/*
 *  surface/proxy.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Wraps an opened surface driver with draw scheduling and pincode locking
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

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::context::SurfaceContext;
use super::drawing_state::{BeforeRunHook, DrawState, DrawingState, before_run};
use super::error::SurfaceError;
use super::pincode::{PincodeDraw, PincodeGlyph};
use super::traits::SurfaceDriver;
use super::types::{DrawProps, FirmwareCheck, SurfaceLayout, SurfaceRegisterProps};
use crate::firmware::FirmwareUpdateCache;
use crate::graphics::{HostGraphics, LockingGraphicsGenerator, ScopedCardGenerator};
use crate::logging::ModuleLogger;

/// Queues keypad draws for one surface.
///
/// Holds the driver weakly; drivers keep their context, which owns this.
#[derive(Clone)]
pub struct PincodeRenderer {
    driver: Weak<dyn SurfaceDriver>,
    drawing: DrawingState,
    layout: Arc<SurfaceLayout>,
    graphics: Arc<dyn LockingGraphicsGenerator>,
    logger: ModuleLogger,
}

impl PincodeRenderer {
    /// Runtime the surface's jobs are spawned on
    pub fn runtime(&self) -> &Handle {
        self.drawing.runtime()
    }

    pub fn render(&self, draws: Vec<PincodeDraw>) {
        for draw in draws {
            self.render_one(draw);
        }
    }

    fn render_one(&self, draw: PincodeDraw) {
        let PincodeDraw { control_id, glyph } = draw;

        // keypad maps may name controls the layout lacks
        let Some(control) = self.layout.control(&control_id) else {
            return;
        };
        let bitmap = self.layout.style_for(control).and_then(|style| style.bitmap);

        let Some(driver) = self.driver.upgrade() else {
            return;
        };
        let graphics = Arc::clone(&self.graphics);
        let key = control_id.clone();

        let queued = self.drawing.queue_job(key, move |token: CancellationToken| async move {
            if token.is_cancelled() {
                return Err(SurfaceError::Cancelled);
            }

            let image = match bitmap {
                None => None,
                Some(bitmap) => Some(match &glyph {
                    PincodeGlyph::Digit(digit) => {
                        graphics.generate_pincode_char(&bitmap, &digit.to_string())?
                    }
                    PincodeGlyph::NextPage => graphics.generate_pincode_char(&bitmap, "+")?,
                    PincodeGlyph::Mask(count) => graphics.generate_pincode_value(&bitmap, *count)?,
                    PincodeGlyph::Clear => bitmap.blank_bitmap(),
                }),
            };

            if token.is_cancelled() {
                return Err(SurfaceError::Cancelled);
            }

            let props = DrawProps {
                control_id,
                image: image.map(Arc::from),
                color: Some(glyph.color().to_string()),
                text: Some(glyph.text()),
            };
            driver.draw(&token, &props).await
        });

        if let Err(e) = queued {
            self.logger
                .warn(format_args!("Failed to queue pincode draw: {}", e));
        }
    }
}

/// One open surface: driver, drawing state machine and lock state
pub struct SurfaceProxy {
    surface_id: String,
    driver: Arc<dyn SurfaceDriver>,
    context: SurfaceContext,
    props: SurfaceRegisterProps,
    drawing: DrawingState,
    renderer: PincodeRenderer,
    graphics: HostGraphics,
    logger: ModuleLogger,
}

impl SurfaceProxy {
    /// Wrap an opened driver. Attaches the layout and pincode map to
    /// `context`, which fails if the context already belongs to a surface.
    /// Must be called on a tokio runtime; its handle runs every later job,
    /// so input and draws may arrive from driver threads.
    pub fn new(
        driver: Arc<dyn SurfaceDriver>,
        context: SurfaceContext,
        props: SurfaceRegisterProps,
        graphics: HostGraphics,
    ) -> Result<Self, SurfaceError> {
        if let Some(map) = &props.pincode_map {
            map.validate()?;
        }

        let runtime = Handle::try_current().map_err(|_| SurfaceError::NoRuntime)?;
        let surface_id = driver.surface_id().to_string();
        let drawing = DrawingState::new(
            ModuleLogger::new(format!("DrawingState/{}", surface_id)),
            DrawState::PreInit,
            runtime,
        );
        let logger = ModuleLogger::new(format!("SurfaceProxy/{}", surface_id));
        let layout = Arc::new(props.surface_layout.clone());

        let renderer = PincodeRenderer {
            driver: Arc::downgrade(&driver),
            drawing: drawing.clone(),
            layout: Arc::clone(&layout),
            graphics: Arc::clone(&graphics.locking),
            logger: logger.clone(),
        };
        context.attach(layout, props.pincode_map.clone(), renderer.clone())?;

        Ok(Self {
            surface_id,
            driver,
            context,
            props,
            drawing,
            renderer,
            graphics,
            logger,
        })
    }

    pub fn surface_id(&self) -> &str {
        &self.surface_id
    }

    pub fn product_name(&self) -> &str {
        self.driver.product_name()
    }

    pub fn register_props(&self) -> &SurfaceRegisterProps {
        &self.props
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.context
    }

    pub fn draw_state(&self) -> DrawState {
        self.drawing.state()
    }

    /// Number of queue drains this surface went through
    pub fn drain_count(&self) -> u64 {
        self.drawing.drain_count()
    }

    /// Wait for pending transitions and queued jobs to finish
    pub async fn settled(&self) {
        self.drawing.settled().await;
    }

    /// Force the lock off, initialise the device and show the status card
    pub async fn init(&self, display_host: &str, status: &str) -> Result<(), SurfaceError> {
        self.context.set_locked(false, 0);

        self.logger
            .info(format_args!("Initialising {}", self.surface_id));
        self.driver.init().await?;

        self.show_status(display_host, status);
        Ok(())
    }

    pub async fn close(&self) -> Result<(), SurfaceError> {
        self.drawing.transition(DrawState::Closed, None);
        self.driver.close().await
    }

    /// Discard pending draws and tell the driver drawing is about to start
    pub async fn ready(&self) -> Result<(), SurfaceError> {
        self.drawing.transition(DrawState::Reinit, None);
        self.driver.ready().await
    }

    pub async fn set_brightness(&self, percent: u8) -> Result<(), SurfaceError> {
        self.driver.set_brightness(percent.min(100)).await
    }

    pub fn blank(&self) {
        if !self.drawing.transition_if_changed(DrawState::Blank, None) {
            return;
        }

        let driver = Arc::clone(&self.driver);
        self.queue("blank", move |token| async move {
            if token.is_cancelled() {
                return Err(SurfaceError::Cancelled);
            }
            driver.blank().await
        });
    }

    /// Queue a control draw. Ignored while locked.
    pub fn draw(&self, props: DrawProps) {
        if self.context.is_locked() {
            return;
        }

        self.drawing
            .transition_if_changed(DrawState::Draw, Some(self.blank_hook()));

        let driver = Arc::clone(&self.driver);
        let surface_id = self.surface_id.clone();
        let known = self.props.surface_layout.has_control(&props.control_id);
        let key = props.control_id.clone();

        self.queue(key, move |token| async move {
            if token.is_cancelled() {
                return Err(SurfaceError::Cancelled);
            }
            if !known {
                return Err(SurfaceError::UnknownControl {
                    surface_id,
                    control_id: props.control_id,
                });
            }
            driver.draw(&token, &props).await
        });
    }

    pub fn on_variable_value(&self, name: &str, value: &Value) -> Result<(), SurfaceError> {
        match self.driver.on_variable_value(name, value) {
            Err(SurfaceError::UnsupportedOperation) => {
                self.logger.warn(format_args!(
                    "Variable value not supported: {}",
                    self.surface_id
                ));
                Ok(())
            }
            other => other,
        }
    }

    /// Apply the host's lock state and redraw the keypad as needed
    pub fn show_locked_status(&self, locked: bool, character_count: usize) {
        let update = self.context.set_locked(locked, character_count);

        if update.newly_locked {
            self.drawing
                .transition(DrawState::LockedPendingDraw, Some(self.blank_hook()));
        }

        if !self.context.has_pincode_map() {
            self.logger.warn(format_args!(
                "Pincode layout not supported: {}",
                self.surface_id
            ));
            return;
        }

        self.renderer.render(update.draws);
        self.driver.show_locked_status(locked, character_count);
    }

    /// Replace whatever is showing with a status card
    pub fn show_status(&self, display_host: &str, status: &str) {
        self.drawing.transition(DrawState::Status, None);

        let driver = Arc::clone(&self.driver);
        let cards = ScopedCardGenerator::new(Arc::clone(&self.graphics.cards), display_host, status);

        self.queue("status", move |token| async move {
            if token.is_cancelled() {
                return Err(SurfaceError::Cancelled);
            }
            let status = cards.status().to_string();
            driver.show_status(&token, &cards, &status).await
        });
    }

    pub async fn check_for_firmware_updates(
        &self,
        cache: &dyn FirmwareUpdateCache,
    ) -> Result<FirmwareCheck, SurfaceError> {
        self.driver.check_for_firmware_updates(cache).await
    }

    fn blank_hook(&self) -> BeforeRunHook {
        let driver = Arc::clone(&self.driver);
        before_run(move || async move { driver.blank().await })
    }

    fn queue<F, Fut>(&self, key: impl Into<String>, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), SurfaceError>> + Send + 'static,
    {
        if let Err(e) = self.drawing.queue_job(key, f) {
            self.logger.warn(format_args!("Failed to queue job: {}", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::virtual_surface::{VirtualSurface, VirtualSurfaceConfig};
    use crate::graphics::RasterGraphics;
    use crate::plugin::events::{HostEvent, RecordingEvents};
    use crate::surface::pincode::PincodeMap;
    use crate::surface::types::{BitmapConfig, PixelFormat};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn keypad_config() -> VirtualSurfaceConfig {
        let mut digits = BTreeMap::new();
        for digit in 0..10u8 {
            digits.insert(digit, format!("{}/{}", 1 + digit / 5, digit % 5));
        }
        VirtualSurfaceConfig {
            surface_id: "virtual-1".into(),
            rows: 3,
            columns: 5,
            bitmap: Some(BitmapConfig::new(16, 16, PixelFormat::Rgb)),
            pincode: Some(PincodeMap::SinglePage {
                pincode: Some("0/0".into()),
                digits,
            }),
            ..Default::default()
        }
    }

    fn open(config: VirtualSurfaceConfig) -> (SurfaceProxy, Arc<VirtualSurface>, RecordingEvents) {
        let events = RecordingEvents::new();
        let context = SurfaceContext::new(
            config.surface_id.clone(),
            Arc::new(events.clone()),
            Arc::new(|_err: SurfaceError| {}),
        );
        let (driver, props) = VirtualSurface::open(&config, context.clone());
        let driver = Arc::new(driver);
        let graphics = HostGraphics::new(Arc::new(RasterGraphics::new("LySurface")));
        let proxy = SurfaceProxy::new(driver.clone(), context, props, graphics).expect("proxy");
        (proxy, driver, events)
    }

    #[tokio::test]
    async fn test_blank_is_idempotent() {
        let (proxy, driver, _) = open(keypad_config());

        proxy.blank();
        proxy.settled().await;
        proxy.blank();
        proxy.settled().await;

        assert_eq!(proxy.draw_state(), DrawState::Blank);
        assert_eq!(proxy.drain_count(), 1);
        assert_eq!(driver.state().blank_count, 1);
    }

    #[tokio::test]
    async fn test_draw_blanks_once_then_streams() {
        let (proxy, driver, _) = open(keypad_config());

        proxy.draw(DrawProps::new("0/1").with_color("#ff0000"));
        proxy.draw(DrawProps::new("0/2").with_color("#00ff00"));
        proxy.draw(DrawProps::new("9/9").with_color("#0000ff"));
        proxy.settled().await;

        let state = driver.state();
        assert_eq!(proxy.draw_state(), DrawState::Draw);
        assert_eq!(state.blank_count, 1);
        assert_eq!(state.draw_log, vec!["0/1", "0/2"]);
        assert_eq!(proxy.drain_count(), 1);
    }

    #[tokio::test]
    async fn test_lock_scenario() {
        let (proxy, driver, events) = open(keypad_config());

        proxy.show_locked_status(true, 0);
        proxy.settled().await;
        {
            let state = driver.state();
            assert_eq!(proxy.draw_state(), DrawState::LockedPendingDraw);
            assert_eq!(state.blank_count, 1);
            // mask + ten digits
            assert_eq!(state.draw_log.len(), 11);
            assert_eq!(state.drawn["0/0"].text.as_deref(), Some(""));
            assert_eq!(state.drawn["1/2"].text.as_deref(), Some("2"));
            assert_eq!(state.lock_status, Some((true, 0)));
        }

        driver.reset_log();
        proxy.show_locked_status(true, 3);
        proxy.settled().await;
        assert_eq!(driver.state().draw_log, vec!["0/0"]);
        assert_eq!(driver.state().drawn["0/0"].text.as_deref(), Some("***"));

        // draws are ignored while locked
        proxy.draw(DrawProps::new("0/1").with_color("#ff0000"));
        proxy.settled().await;
        assert_eq!(driver.state().draw_log, vec!["0/0"]);

        // keypad press goes to the host as a digit
        proxy.context().key_down("1/2");
        proxy.context().key_down("0/4");
        assert_eq!(
            events.take(),
            vec![HostEvent::PincodeEntry {
                surface_id: "virtual-1".into(),
                digit: 2
            }]
        );

        proxy.show_locked_status(false, 0);
        proxy.context().key_down("0/4");
        assert_eq!(events.take().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_up_release_suppressed_by_lock() {
        let (proxy, _driver, events) = open(keypad_config());

        proxy.context().key_down_up("0/3");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(events.take().len(), 2);

        proxy.context().key_down_up("0/3");
        proxy.show_locked_status(true, 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            events.take(),
            vec![HostEvent::Press {
                surface_id: "virtual-1".into(),
                control_id: "0/3".into(),
                pressed: true
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_input_dropped() {
        let (proxy, _driver, events) = open(keypad_config());
        proxy.context().key_down("nope");
        proxy.context().rotate_left("nope");
        proxy.context().rotate_right("2/4");
        assert_eq!(
            events.take(),
            vec![HostEvent::Rotate {
                surface_id: "virtual-1".into(),
                control_id: "2/4".into(),
                delta: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_status_always_supersedes() {
        let (proxy, driver, _) = open(keypad_config());

        proxy.show_status("10.0.0.2", "Connecting");
        proxy.show_status("10.0.0.2", "Connected");
        proxy.settled().await;

        assert_eq!(proxy.draw_state(), DrawState::Status);
        assert_eq!(driver.state().status_log, vec!["Connected"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_discards_pending_draws() {
        let (proxy, driver, _) = open(VirtualSurfaceConfig {
            draw_delay_ms: 1000,
            ..keypad_config()
        });

        proxy.draw(DrawProps::new("0/1").with_color("#ff0000"));
        proxy.draw(DrawProps::new("0/2").with_color("#00ff00"));
        // first draw is now sleeping inside the driver
        tokio::time::sleep(Duration::from_millis(10)).await;

        proxy.ready().await.unwrap();
        assert_eq!(proxy.draw_state(), DrawState::Reinit);
        proxy.settled().await;

        let state = driver.state();
        assert_eq!(state.ready_count, 1);
        assert_eq!(state.blank_count, 1);
        assert!(state.draw_log.is_empty());
        assert_eq!(proxy.draw_state(), DrawState::Reinit);
        assert_eq!(proxy.drain_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_draws_and_closes_driver() {
        let (proxy, driver, _) = open(VirtualSurfaceConfig {
            draw_delay_ms: 1000,
            ..keypad_config()
        });

        proxy.draw(DrawProps::new("0/1").with_color("#ff0000"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        proxy.close().await.unwrap();
        proxy.settled().await;

        let state = driver.state();
        assert_eq!(proxy.draw_state(), DrawState::Closed);
        assert_eq!(state.close_count, 1);
        assert!(state.draw_log.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_input_from_driver_thread() {
        let (proxy, driver, events) = open(VirtualSurfaceConfig {
            pincode: Some(PincodeMap::MultiplePage {
                pincode: "0/0".into(),
                next_page: "0/4".into(),
                pages: vec![
                    BTreeMap::from([(1, "1/0".to_string()), (2, "1/1".to_string())]),
                    BTreeMap::from([(3, "1/0".to_string())]),
                ],
            }),
            ..keypad_config()
        });

        let context = proxy.context().clone();
        std::thread::spawn(move || context.key_down_up("0/3"))
            .join()
            .expect("reader thread must not panic");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.take().len(), 2);

        proxy.show_locked_status(true, 0);
        proxy.settled().await;
        driver.reset_log();

        // next page press redraws the keypad from the reader thread
        let context = proxy.context().clone();
        std::thread::spawn(move || context.key_down("0/4"))
            .join()
            .expect("reader thread must not panic");
        proxy.settled().await;
        assert!(driver.state().draw_log.contains(&"1/0".to_string()));
    }

    #[test]
    fn test_proxy_needs_runtime() {
        let config = keypad_config();
        let context = SurfaceContext::new(
            config.surface_id.clone(),
            Arc::new(RecordingEvents::new()),
            Arc::new(|_err: SurfaceError| {}),
        );
        let (driver, props) = VirtualSurface::open(&config, context.clone());
        let graphics = HostGraphics::new(Arc::new(RasterGraphics::default()));
        let proxy = SurfaceProxy::new(Arc::new(driver), context, props, graphics);
        assert!(matches!(proxy, Err(SurfaceError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_context_attaches_once() {
        let (proxy, driver, _) = open(keypad_config());
        let graphics = HostGraphics::new(Arc::new(RasterGraphics::default()));
        let again = SurfaceProxy::new(
            driver,
            proxy.context().clone(),
            proxy.register_props().clone(),
            graphics,
        );
        assert!(matches!(again, Err(SurfaceError::AlreadyAttached(_))));
    }
}
