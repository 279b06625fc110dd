/*
 *  firmware/check.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  Periodic and on-demand firmware update checks for open surfaces
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
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use super::cache::UpdateCacheGeneration;
use super::fetch::JsonFetcher;
use crate::logging::ModuleLogger;
use crate::plugin::events::SurfaceEvents;
use crate::plugin::registry::SurfaceRegistry;
use crate::surface::proxy::SurfaceProxy;
use crate::surface::types::FirmwareCheck;

/// Poll timing and cache lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSettings {
    pub poll_interval: Duration,
    pub initial_delay: Duration,
    /// Sweeps start a new cache generation after this long
    pub cache_ttl: Duration,
    /// On-demand checks tolerate generations up to this age
    pub cache_max_ttl: Duration,
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(24 * 60 * 60),
            initial_delay: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(4 * 60 * 60),
            cache_max_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

struct CheckerInner {
    settings: FirmwareSettings,
    registry: SurfaceRegistry,
    events: Arc<dyn SurfaceEvents>,
    fetcher: Arc<dyn JsonFetcher>,
    generation: Mutex<Option<Arc<UpdateCacheGeneration>>>,
    token: CancellationToken,
    logger: ModuleLogger,
}

#[derive(Clone)]
pub struct FirmwareUpdateChecker {
    inner: Arc<CheckerInner>,
}

impl FirmwareUpdateChecker {
    pub fn new(
        settings: FirmwareSettings,
        registry: SurfaceRegistry,
        events: Arc<dyn SurfaceEvents>,
        fetcher: Arc<dyn JsonFetcher>,
    ) -> Self {
        Self {
            inner: Arc::new(CheckerInner {
                settings,
                registry,
                events,
                fetcher,
                generation: Mutex::new(None),
                token: CancellationToken::new(),
                logger: ModuleLogger::new("FirmwareUpdateCheck"),
            }),
        }
    }

    /// Sweep shortly after startup, then on every poll interval until stopped
    pub fn start(&self) {
        let checker = self.clone();
        let token = self.inner.token.clone();
        let settings = self.inner.settings;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(settings.initial_delay) => {}
            }
            checker.check_all_surfaces().await;

            let mut ticker = interval_at(Instant::now() + settings.poll_interval, settings.poll_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => checker.check_all_surfaces().await,
                }
            }
            checker.inner.logger.debug(format_args!("Update checks stopped"));
        });
    }

    pub fn stop(&self) {
        self.inner.token.cancel();
    }

    /// The generation currently shared by checks, if any
    pub fn current_generation(&self) -> Option<Arc<UpdateCacheGeneration>> {
        self.inner.generation.lock().clone()
    }

    /// Check every open surface concurrently. Skipped when none are open.
    pub async fn check_all_surfaces(&self) {
        let surfaces = self.inner.registry.open_surfaces();
        if surfaces.is_empty() {
            return;
        }

        self.inner.logger.debug(format_args!(
            "Checking for firmware updates for {} surfaces",
            surfaces.len()
        ));

        let cache = self.generation_within(self.inner.settings.cache_ttl);
        let mut checks = JoinSet::new();
        for surface in surfaces {
            let checker = self.clone();
            let cache = Arc::clone(&cache);
            checks.spawn(async move { checker.perform_for_surface(&surface, &cache).await });
        }

        while let Some(result) = checks.join_next().await {
            if let Err(e) = result {
                self.inner
                    .logger
                    .warn(format_args!("Failed to check for firmware updates: {}", e));
            }
        }
    }

    /// Fire-and-forget check of one surface, reusing the current
    /// generation unless it is older than the max TTL
    pub fn trigger_check_surface(&self, surface: Arc<SurfaceProxy>) {
        let checker = self.clone();
        tokio::spawn(async move {
            let cache = checker.generation_within(checker.inner.settings.cache_max_ttl);
            checker.perform_for_surface(&surface, &cache).await;
        });
    }

    fn generation_within(&self, ttl: Duration) -> Arc<UpdateCacheGeneration> {
        let mut generation = self.inner.generation.lock();
        match generation.as_ref() {
            Some(current) if !current.is_older_than(ttl) => Arc::clone(current),
            _ => {
                let fresh = Arc::new(UpdateCacheGeneration::new(
                    Arc::clone(&self.inner.fetcher),
                    self.inner.logger.child("cache"),
                ));
                *generation = Some(Arc::clone(&fresh));
                fresh
            }
        }
    }

    async fn perform_for_surface(&self, surface: &SurfaceProxy, cache: &UpdateCacheGeneration) {
        match surface.check_for_firmware_updates(cache).await {
            Ok(FirmwareCheck::Unchanged) => {}
            Ok(FirmwareCheck::Changed(info)) => {
                self.inner.logger.info(format_args!(
                    "Firmware updates change for surface \"{}\"",
                    surface.surface_id()
                ));
                self.inner
                    .events
                    .firmware_update_info(surface.surface_id(), info.as_ref());
            }
            Err(e) => {
                self.inner.logger.warn(format_args!(
                    "Failed to check for firmware updates for surface \"{}\": {}",
                    surface.surface_id(),
                    e
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::events::RecordingEvents;
    use crate::surface::error::SurfaceError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoFetch;

    #[async_trait]
    impl JsonFetcher for NoFetch {
        async fn fetch_json(&self, _url: &str) -> Result<Value, SurfaceError> {
            Err(SurfaceError::Fetch("offline".into()))
        }
    }

    fn checker() -> FirmwareUpdateChecker {
        FirmwareUpdateChecker::new(
            FirmwareSettings::default(),
            SurfaceRegistry::new(),
            Arc::new(RecordingEvents::new()),
            Arc::new(NoFetch),
        )
    }

    #[tokio::test]
    async fn test_sweep_skipped_without_surfaces() {
        let checker = checker();
        checker.check_all_surfaces().await;
        assert!(checker.current_generation().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_recycling() {
        let checker = checker();
        let settings = FirmwareSettings::default();

        let first = checker.generation_within(settings.cache_ttl);
        let same = checker.generation_within(settings.cache_ttl);
        assert!(Arc::ptr_eq(&first, &same));

        // past the sweep TTL, still inside the on-demand TTL
        tokio::time::advance(settings.cache_ttl + Duration::from_secs(1)).await;
        let on_demand = checker.generation_within(settings.cache_max_ttl);
        assert!(Arc::ptr_eq(&first, &on_demand));

        let sweep = checker.generation_within(settings.cache_ttl);
        assert!(!Arc::ptr_eq(&first, &sweep));
        assert!(Arc::ptr_eq(&checker.current_generation().unwrap(), &sweep));
    }
}
