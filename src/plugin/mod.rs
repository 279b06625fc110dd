/*
 *  plugin/mod.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Plugin side of the surface host
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

pub mod events;
pub mod host;
pub mod registry;
pub mod traits;

pub use events::{AcceptAllPolicy, HostEvent, HostPolicy, RecordingEvents, SurfaceEvents};
pub use host::{HostContext, PluginHost};
pub use registry::SurfaceRegistry;
pub use traits::{
    CheckDeviceResult, DetectionEvent, DiscoveredSurfaceInfo, HidDevice, OpenDeviceResult,
    OpenSurfaceResult, PluginFeatures, SurfaceDetection, SurfacePlugin,
};
