/*
 *  plugin/registry.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Open surface registry with reservations for opens in flight
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
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::surface::error::SurfaceError;
use crate::surface::proxy::SurfaceProxy;
use crate::surface::types::SurfaceId;

pub enum RegistryEntry {
    /// Open in progress
    Reserved,
    Open(Arc<SurfaceProxy>),
}

/// Shared map of surface id to open surface or reservation
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    entries: Arc<Mutex<HashMap<SurfaceId, RegistryEntry>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `surface_id` for an open. Fails if it is open or reserved.
    pub fn reserve(&self, surface_id: &str) -> Result<(), SurfaceError> {
        match self.entries.lock().entry(surface_id.to_string()) {
            Entry::Occupied(_) => Err(SurfaceError::SurfaceAlreadyOpen(surface_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(RegistryEntry::Reserved);
                Ok(())
            }
        }
    }

    /// Replace the reservation with the opened surface.
    /// Fails with `Cancelled` once the reservation has been dropped.
    pub fn install(&self, proxy: Arc<SurfaceProxy>) -> Result<(), SurfaceError> {
        let mut entries = self.entries.lock();
        match entries.get_mut(proxy.surface_id()) {
            Some(entry @ RegistryEntry::Reserved) => {
                *entry = RegistryEntry::Open(proxy);
                Ok(())
            }
            _ => Err(SurfaceError::Cancelled),
        }
    }

    pub fn remove(&self, surface_id: &str) -> Option<RegistryEntry> {
        self.entries.lock().remove(surface_id)
    }

    /// Remove only an opened surface, leaving reservations alone
    pub fn remove_open(&self, surface_id: &str) -> Option<Arc<SurfaceProxy>> {
        let mut entries = self.entries.lock();
        if !matches!(entries.get(surface_id), Some(RegistryEntry::Open(_))) {
            return None;
        }
        match entries.remove(surface_id) {
            Some(RegistryEntry::Open(proxy)) => Some(proxy),
            _ => None,
        }
    }

    /// The opened surface; reserved ids count as not open
    pub fn get_open(&self, surface_id: &str) -> Result<Arc<SurfaceProxy>, SurfaceError> {
        match self.entries.lock().get(surface_id) {
            Some(RegistryEntry::Open(proxy)) => Ok(Arc::clone(proxy)),
            Some(RegistryEntry::Reserved) | None => {
                Err(SurfaceError::SurfaceNotOpen(surface_id.to_string()))
            }
        }
    }

    pub fn contains(&self, surface_id: &str) -> bool {
        self.entries.lock().contains_key(surface_id)
    }

    pub fn is_reserved(&self, surface_id: &str) -> bool {
        matches!(
            self.entries.lock().get(surface_id),
            Some(RegistryEntry::Reserved)
        )
    }

    pub fn open_surfaces(&self) -> Vec<Arc<SurfaceProxy>> {
        self.entries
            .lock()
            .values()
            .filter_map(|entry| match entry {
                RegistryEntry::Open(proxy) => Some(Arc::clone(proxy)),
                RegistryEntry::Reserved => None,
            })
            .collect()
    }

    /// Entries including reservations
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Empty the registry, returning the surfaces that were open
    pub fn clear(&self) -> Vec<Arc<SurfaceProxy>> {
        self.entries
            .lock()
            .drain()
            .filter_map(|(_, entry)| match entry {
                RegistryEntry::Open(proxy) => Some(proxy),
                RegistryEntry::Reserved => None,
            })
            .collect()
    }
}
