/*
 *  surface/mod.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Per-surface draw scheduling, pincode locking and input routing
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

//! Surface layer
//!
//! ```text
//! PluginHost -> SurfaceProxy -> DrawingState -> JobQueue -> SurfaceDriver
//!                    |
//!              SurfaceContext <- driver input
//!                    |
//!               PincodeLock -> SurfaceEvents (host)
//! ```

pub mod context;
pub mod drawing_state;
pub mod error;
pub mod job_queue;
pub mod pincode;
pub mod proxy;
pub mod traits;
pub mod types;

pub use context::SurfaceContext;
pub use drawing_state::{DrawState, DrawingState};
pub use error::SurfaceError;
pub use job_queue::JobQueue;
pub use pincode::{PincodeLock, PincodeMap};
pub use proxy::SurfaceProxy;
pub use traits::SurfaceDriver;
pub use types::{
    BitmapConfig, ControlDefinition, ControlId, DrawProps, FirmwareCheck, FirmwareUpdateInfo,
    PixelFormat, StylePreset, SurfaceId, SurfaceLayout, SurfaceRegisterProps, TransferDirection,
    TransferVariable,
};
