/*
 *  lib.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Library root
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

//! Host side of a control surface system.
//!
//! A [`plugin::PluginHost`] opens the surfaces of one [`plugin::SurfacePlugin`],
//! wraps each in a [`surface::SurfaceProxy`] that schedules draws and handles
//! the pincode lock, and polls for firmware updates in the background.

pub mod config;
pub mod drivers;
pub mod firmware;
pub mod graphics;
pub mod logging;
pub mod plugin;
pub mod surface;
