/*
 *  surface/context.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Input facade handed to a surface driver when it is opened
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

//! The driver side of a surface reports input through [`SurfaceContext`].
//!
//! While the surface is locked only keypad presses are routed, to the
//! pincode controller. Otherwise control ids are checked against the layout
//! and forwarded to the host as press, rotate and variable events.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use super::error::SurfaceError;
use super::pincode::{LockUpdate, PincodeLock, PincodeMap, PincodePress};
use super::proxy::PincodeRenderer;
use super::types::SurfaceLayout;
use crate::logging::ModuleLogger;
use crate::plugin::events::SurfaceEvents;

/// Delay between the press and release of a combined down-up gesture
pub const KEY_DOWN_UP_RELEASE: Duration = Duration::from_millis(20);

/// Called when the driver loses its device
pub type DisconnectFn = Arc<dyn Fn(SurfaceError) + Send + Sync>;

struct Attachment {
    layout: Arc<SurfaceLayout>,
    renderer: PincodeRenderer,
}

struct ContextInner {
    surface_id: String,
    events: Arc<dyn SurfaceEvents>,
    on_disconnect: DisconnectFn,
    lock: Mutex<PincodeLock>,
    attachment: OnceLock<Attachment>,
    logger: ModuleLogger,
}

/// Cheaply cloneable; all clones share one surface
#[derive(Clone)]
pub struct SurfaceContext {
    inner: Arc<ContextInner>,
}

impl SurfaceContext {
    pub fn new(
        surface_id: impl Into<String>,
        events: Arc<dyn SurfaceEvents>,
        on_disconnect: DisconnectFn,
    ) -> Self {
        let surface_id = surface_id.into();
        Self {
            inner: Arc::new(ContextInner {
                logger: ModuleLogger::new(format!("SurfaceContext/{}", surface_id)),
                surface_id,
                events,
                on_disconnect,
                lock: Mutex::new(PincodeLock::default()),
                attachment: OnceLock::new(),
            }),
        }
    }

    pub fn surface_id(&self) -> &str {
        &self.inner.surface_id
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock.lock().is_locked()
    }

    /// The driver lost its device; the host will clean the surface up
    pub fn disconnect(&self, error: SurfaceError) {
        (self.inner.on_disconnect)(error);
    }

    /// Bind the layout and keypad renderer of the opened surface.
    /// Only one attach is allowed per context.
    pub(crate) fn attach(
        &self,
        layout: Arc<SurfaceLayout>,
        pincode_map: Option<PincodeMap>,
        renderer: PincodeRenderer,
    ) -> Result<(), SurfaceError> {
        self.inner
            .attachment
            .set(Attachment { layout, renderer })
            .map_err(|_| SurfaceError::AlreadyAttached(self.inner.surface_id.clone()))?;
        *self.inner.lock.lock() = PincodeLock::new(pincode_map);
        Ok(())
    }

    pub(crate) fn set_locked(&self, locked: bool, character_count: usize) -> LockUpdate {
        self.inner.lock.lock().set_locked(locked, character_count)
    }

    pub(crate) fn has_pincode_map(&self) -> bool {
        self.inner.lock.lock().map().is_some()
    }

    pub fn key_down(&self, control_id: &str) {
        if self.is_locked() {
            self.pincode_press(control_id);
            return;
        }
        if self.known_control(control_id, "key_down").is_some() {
            self.inner
                .events
                .input_press(&self.inner.surface_id, control_id, true);
        }
    }

    pub fn key_up(&self, control_id: &str) {
        if self.is_locked() {
            return;
        }
        if self.known_control(control_id, "key_up").is_some() {
            self.inner
                .events
                .input_press(&self.inner.surface_id, control_id, false);
        }
    }

    /// Press now, release shortly after unless the surface locks meanwhile
    pub fn key_down_up(&self, control_id: &str) {
        if self.is_locked() {
            self.pincode_press(control_id);
            return;
        }
        let Some(attachment) = self.known_control(control_id, "key_down_up") else {
            return;
        };

        self.inner
            .events
            .input_press(&self.inner.surface_id, control_id, true);

        let context = self.clone();
        let control_id = control_id.to_string();
        // driver reader threads are not runtime threads
        attachment.renderer.runtime().spawn(async move {
            tokio::time::sleep(KEY_DOWN_UP_RELEASE).await;
            if !context.is_locked() {
                context
                    .inner
                    .events
                    .input_press(&context.inner.surface_id, &control_id, false);
            }
        });
    }

    pub fn rotate_left(&self, control_id: &str) {
        self.rotate(control_id, -1);
    }

    pub fn rotate_right(&self, control_id: &str) {
        self.rotate(control_id, 1);
    }

    pub fn send_variable_value(&self, name: &str, value: Value) {
        if self.is_locked() {
            return;
        }
        self.inner
            .events
            .set_variable_value(&self.inner.surface_id, name, &value);
    }

    fn rotate(&self, control_id: &str, delta: i8) {
        if self.is_locked() {
            return;
        }
        if self.known_control(control_id, "rotate").is_some() {
            self.inner
                .events
                .input_rotate(&self.inner.surface_id, control_id, delta);
        }
    }

    /// The attachment, when `control_id` is in the attached layout
    fn known_control(&self, control_id: &str, action: &str) -> Option<&Attachment> {
        let Some(attachment) = self.inner.attachment.get() else {
            self.inner.logger.warn(format_args!(
                "Input {} for {} before the surface was attached",
                action, control_id
            ));
            return None;
        };
        if !attachment.layout.has_control(control_id) {
            self.inner.logger.info(format_args!(
                "Surface {} control {} not found in {}",
                self.inner.surface_id, control_id, action
            ));
            return None;
        }
        Some(attachment)
    }

    fn pincode_press(&self, control_id: &str) {
        let press = self.inner.lock.lock().press(control_id);
        match press {
            PincodePress::Digit(digit) => {
                self.inner.events.pincode_entry(&self.inner.surface_id, digit);
            }
            PincodePress::PageChanged(draws) => {
                if let Some(attachment) = self.inner.attachment.get() {
                    attachment.renderer.render(draws);
                }
            }
            PincodePress::Ignored => {}
        }
    }
}
