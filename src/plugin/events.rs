/*
 *  plugin/events.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Events and policy decisions flowing from surfaces to the host application
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
use parking_lot::Mutex;
use serde_json::Value;

use super::traits::{CheckDeviceResult, OpenDeviceResult};
use crate::surface::error::SurfaceError;
use crate::surface::types::FirmwareUpdateInfo;

/// Sink for everything a surface reports back to the host
pub trait SurfaceEvents: Send + Sync {
    fn disconnected(&self, surface_id: &str);

    fn input_press(&self, surface_id: &str, control_id: &str, pressed: bool);

    /// `delta` is -1 for left and 1 for right
    fn input_rotate(&self, surface_id: &str, control_id: &str, delta: i8);

    fn set_variable_value(&self, surface_id: &str, name: &str, value: &Value);

    fn pincode_entry(&self, surface_id: &str, digit: u8);

    /// `None` clears a previously reported update
    fn firmware_update_info(&self, surface_id: &str, info: Option<&FirmwareUpdateInfo>);
}

/// Host decisions about surfaces found by push detection
#[async_trait]
pub trait HostPolicy: Send + Sync {
    async fn should_open_discovered_surface(&self, info: &CheckDeviceResult) -> bool;

    /// Report a surface opened from detection. An error closes and rejects it.
    async fn notify_opened_discovered_surface(
        &self,
        info: &OpenDeviceResult,
    ) -> Result<(), SurfaceError>;
}

/// Opens everything offered and accepts every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllPolicy;

#[async_trait]
impl HostPolicy for AcceptAllPolicy {
    async fn should_open_discovered_surface(&self, _info: &CheckDeviceResult) -> bool {
        true
    }

    async fn notify_opened_discovered_surface(
        &self,
        _info: &OpenDeviceResult,
    ) -> Result<(), SurfaceError> {
        Ok(())
    }
}

/// One recorded host event
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Disconnected(String),
    Press {
        surface_id: String,
        control_id: String,
        pressed: bool,
    },
    Rotate {
        surface_id: String,
        control_id: String,
        delta: i8,
    },
    Variable {
        surface_id: String,
        name: String,
        value: Value,
    },
    PincodeEntry {
        surface_id: String,
        digit: u8,
    },
    FirmwareUpdate {
        surface_id: String,
        info: Option<FirmwareUpdateInfo>,
    },
}

/// Keeps every event in memory, for the demo log and for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    events: Arc<Mutex<Vec<HostEvent>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<HostEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn push(&self, event: HostEvent) {
        self.events.lock().push(event);
    }
}

impl SurfaceEvents for RecordingEvents {
    fn disconnected(&self, surface_id: &str) {
        self.push(HostEvent::Disconnected(surface_id.to_string()));
    }

    fn input_press(&self, surface_id: &str, control_id: &str, pressed: bool) {
        self.push(HostEvent::Press {
            surface_id: surface_id.to_string(),
            control_id: control_id.to_string(),
            pressed,
        });
    }

    fn input_rotate(&self, surface_id: &str, control_id: &str, delta: i8) {
        self.push(HostEvent::Rotate {
            surface_id: surface_id.to_string(),
            control_id: control_id.to_string(),
            delta,
        });
    }

    fn set_variable_value(&self, surface_id: &str, name: &str, value: &Value) {
        self.push(HostEvent::Variable {
            surface_id: surface_id.to_string(),
            name: name.to_string(),
            value: value.clone(),
        });
    }

    fn pincode_entry(&self, surface_id: &str, digit: u8) {
        self.push(HostEvent::PincodeEntry {
            surface_id: surface_id.to_string(),
            digit,
        });
    }

    fn firmware_update_info(&self, surface_id: &str, info: Option<&FirmwareUpdateInfo>) {
        self.push(HostEvent::FirmwareUpdate {
            surface_id: surface_id.to_string(),
            info: info.cloned(),
        });
    }
}
