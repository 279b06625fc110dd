/*
 *  firmware/cache.rs
 *
 *  LySurface - control surface host
 *  (c) 2020-26 Stuart Hunter
 *
 *  One generation of the shared firmware metadata cache
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

//! Request-coalescing JSON cache.
//!
//! A generation never evicts entries. The update checker throws the whole
//! generation away once it is older than its TTL and starts a new one.
//! Concurrent requests for one URL share a single fetch; failures resolve
//! every waiter with `None` and are not cached.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use super::fetch::JsonFetcher;
use crate::logging::ModuleLogger;

/// Cache handed to surface drivers during an update check
#[async_trait]
pub trait FirmwareUpdateCache: Send + Sync {
    /// Fetch a JSON document, shared between all surfaces.
    /// `None` when it could not be fetched.
    async fn fetch_json(&self, url: &str) -> Option<Arc<Value>>;
}

/// `None` while the fetch is running
type InFlight = watch::Receiver<Option<Option<Arc<Value>>>>;

struct PayloadEntry {
    fetched_at: DateTime<Utc>,
    payload: Arc<Value>,
}

#[derive(Default)]
struct GenerationState {
    payloads: HashMap<String, PayloadEntry>,
    in_flight: HashMap<String, InFlight>,
}

pub struct UpdateCacheGeneration {
    created: Instant,
    created_at: DateTime<Utc>,
    state: Arc<Mutex<GenerationState>>,
    fetcher: Arc<dyn JsonFetcher>,
    logger: ModuleLogger,
}

impl UpdateCacheGeneration {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, logger: ModuleLogger) -> Self {
        Self {
            created: Instant::now(),
            created_at: Utc::now(),
            state: Arc::new(Mutex::new(GenerationState::default())),
            fetcher,
            logger,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_older_than(&self, ttl: Duration) -> bool {
        self.created.elapsed() > ttl
    }

    /// When the payload for `url` was stored, if it is cached
    pub fn cached_at(&self, url: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .payloads
            .get(&cache_key(url))
            .map(|entry| entry.fetched_at)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn spawn_fetch(&self, key: String, url: String, tx: watch::Sender<Option<Option<Arc<Value>>>>) {
        let state = Arc::clone(&self.state);
        let fetcher = Arc::clone(&self.fetcher);
        let logger = self.logger.clone();

        tokio::spawn(async move {
            let payload = match fetcher.fetch_json(&url).await {
                Ok(Value::Null) => None,
                Ok(value) => Some(Arc::new(value)),
                Err(e) => {
                    logger.warn(format_args!(
                        "Failed to fetch firmware update payload from \"{}\": {}",
                        url, e
                    ));
                    None
                }
            };

            {
                let mut state = state.lock();
                if let Some(payload) = &payload {
                    state.payloads.insert(
                        key.clone(),
                        PayloadEntry {
                            fetched_at: Utc::now(),
                            payload: Arc::clone(payload),
                        },
                    );
                }
                state.in_flight.remove(&key);
            }
            tx.send_replace(Some(payload));
        });
    }
}

fn cache_key(url: &str) -> String {
    format!("json::{}", url)
}

#[async_trait]
impl FirmwareUpdateCache for UpdateCacheGeneration {
    async fn fetch_json(&self, url: &str) -> Option<Arc<Value>> {
        let key = cache_key(url);

        let mut pending = {
            let mut state = self.state.lock();
            if let Some(entry) = state.payloads.get(&key) {
                return Some(Arc::clone(&entry.payload));
            }

            match state.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx.clone());
                    self.spawn_fetch(key, url.to_string(), tx);
                    rx
                }
            }
        };

        match pending.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().flatten(),
            // fetch task died before reporting
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::error::SurfaceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct GatedFetcher {
        calls: AtomicUsize,
        gate: Notify,
        fail: bool,
    }

    impl GatedFetcher {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Notify::new(),
                fail,
            })
        }
    }

    #[async_trait]
    impl JsonFetcher for GatedFetcher {
        async fn fetch_json(&self, url: &str) -> Result<Value, SurfaceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail {
                Err(SurfaceError::Fetch("connection refused".into()))
            } else {
                Ok(serde_json::json!({ "url": url, "latest": "1.2.0" }))
            }
        }
    }

    fn generation(fetcher: &Arc<GatedFetcher>) -> Arc<UpdateCacheGeneration> {
        let fetcher: Arc<dyn JsonFetcher> = fetcher.clone();
        Arc::new(UpdateCacheGeneration::new(fetcher, ModuleLogger::new("FirmwareUpdateCheck")))
    }

    async fn wait_for_calls(fetcher: &GatedFetcher, calls: usize) {
        while fetcher.calls.load(Ordering::SeqCst) < calls {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_concurrent_fetches_coalesce() {
        let fetcher = GatedFetcher::new(false);
        let cache = generation(&fetcher);

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.fetch_json("https://fw.example/sd.json").await })
            })
            .collect();

        wait_for_calls(&fetcher, 1).await;
        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        // let every waiter register before the fetch resolves
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        fetcher.gate.notify_one();

        for waiter in waiters {
            let value = waiter.await.unwrap().expect("payload");
            assert_eq!(value["latest"], "1.2.0");
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(cache.cached_at("https://fw.example/sd.json").is_some());

        // served from cache now
        let again = cache.fetch_json("https://fw.example/sd.json").await;
        assert!(again.is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let fetcher = GatedFetcher::new(true);
        let cache = generation(&fetcher);

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.fetch_json("https://fw.example/x.json").await })
        };
        let second = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.fetch_json("https://fw.example/x.json").await })
        };
        wait_for_calls(&fetcher, 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        fetcher.gate.notify_one();

        assert!(first.await.unwrap().is_none());
        assert!(second.await.unwrap().is_none());
        assert!(cache.cached_at("https://fw.example/x.json").is_none());
        assert_eq!(cache.in_flight(), 0);

        // next call retries
        let retry = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.fetch_json("https://fw.example/x.json").await })
        };
        wait_for_calls(&fetcher, 2).await;
        fetcher.gate.notify_one();
        assert!(retry.await.unwrap().is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_age() {
        let fetcher = GatedFetcher::new(false);
        let cache = generation(&fetcher);
        assert!(!cache.is_older_than(Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.is_older_than(Duration::from_secs(60)));
        assert!(cache.created_at() <= Utc::now());
    }
}
