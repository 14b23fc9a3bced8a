//! Frequency → station resolution with a TTL cache.
//!
//! Cache keys are derived from the frequency itself, never from call order,
//! so a slow lookup for an old frequency can only ever fill that
//! frequency's slot.  A lookup that straddles a `force_refresh()` is not
//! cached at all.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cache::ClientCache;
use crate::error::{Result, TunerError};
use crate::frequency::Frequency;
use crate::model::{NewStation, Station};
use crate::signal::UpdateSignal;

pub const FOUND_TTL: Duration = Duration::from_secs(5 * 60);
pub const EMPTY_TTL: Duration = Duration::from_secs(30);

const KEY_PREFIX: &str = "station:";

/// Where stations live.  At most one station per frequency is the
/// directory's job to enforce.
#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn station_for_frequency(&self, frequency: Frequency) -> anyhow::Result<Option<Station>>;

    async fn create_station(&self, station: NewStation) -> anyhow::Result<Station>;
}

#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    pub found_ttl: Duration,
    pub empty_ttl: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            found_ttl: FOUND_TTL,
            empty_ttl: EMPTY_TTL,
        }
    }
}

impl SyncPolicy {
    fn ttl_for(&self, station: &Option<Station>) -> Duration {
        if station.is_some() {
            self.found_ttl
        } else {
            self.empty_ttl
        }
    }
}

pub fn cache_key(frequency: Frequency) -> String {
    format!("{KEY_PREFIX}{frequency}")
}

pub struct StationSync {
    directory: Arc<dyn StationDirectory>,
    signal: Option<Arc<dyn UpdateSignal>>,
    cache: Mutex<ClientCache<Option<Station>>>,
    policy: SyncPolicy,
    last_sync: watch::Sender<u64>,
    lookups: AtomicU64,
}

impl StationSync {
    pub fn new(directory: Arc<dyn StationDirectory>, policy: SyncPolicy) -> Self {
        let (last_sync, _) = watch::channel(0);
        Self {
            directory,
            signal: None,
            cache: Mutex::new(ClientCache::new()),
            policy,
            last_sync,
            lookups: AtomicU64::new(0),
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn UpdateSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn directory(&self) -> Arc<dyn StationDirectory> {
        Arc::clone(&self.directory)
    }

    /// Validate, then answer from cache or the directory.  `Ok(None)` means
    /// "confirmed: nothing on this frequency".
    pub async fn resolve(&self, mhz: f64) -> Result<Option<Station>> {
        let frequency = Frequency::new(mhz)?;
        self.resolve_frequency(frequency).await
    }

    pub async fn resolve_frequency(&self, frequency: Frequency) -> Result<Option<Station>> {
        let key = cache_key(frequency);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!("sync: cache hit {} → {:?}", frequency, hit.as_ref().map(|s| &s.name));
            return Ok(hit);
        }

        let generation = *self.last_sync.borrow();
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let station = match self.directory.station_for_frequency(frequency).await {
            Ok(station) => station,
            Err(e) => {
                warn!("sync: lookup for {} failed: {:#}", frequency, e);
                return Err(TunerError::Lookup {
                    frequency: frequency.to_string(),
                    message: format!("{e:#}"),
                });
            }
        };

        if *self.last_sync.borrow() == generation {
            let ttl = self.policy.ttl_for(&station);
            self.cache.lock().await.set(key, station.clone(), ttl);
            debug!("sync: cached {} for {:?}", frequency, ttl);
        } else {
            debug!("sync: refresh happened during lookup for {}, not caching", frequency);
        }
        Ok(station)
    }

    /// Drop every cached station and bump the last-sync counter.
    pub async fn force_refresh(&self) {
        let dropped = self.cache.lock().await.invalidate_prefix(KEY_PREFIX);
        self.last_sync.send_modify(|rev| *rev += 1);
        info!(
            "sync: force refresh #{} ({} cached entries dropped)",
            self.last_sync(),
            dropped
        );
    }

    /// Broadcast "stations changed" to other instances.
    pub async fn notify_updated(&self) -> anyhow::Result<()> {
        match &self.signal {
            Some(signal) => signal.touch().await,
            None => {
                debug!("sync: no update signal configured");
                Ok(())
            }
        }
    }

    pub fn last_sync(&self) -> u64 {
        *self.last_sync.borrow()
    }

    /// Receives the last-sync counter every time it is bumped.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.last_sync.subscribe()
    }

    /// Number of directory calls made so far.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}
