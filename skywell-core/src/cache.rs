//! Time-bounded forecast cache
//!
//! Entries expire a fixed horizon after they are computed; an expired entry is
//! treated as absent. Each key owns its own slot lock, so concurrent callers
//! for one key wait for a single computation while unrelated keys proceed in
//! parallel. The outer map lock is only held to look up or insert a slot.
//!
//! Time comes from an injected `Clock` so expiry can be driven by tests.

use crate::grid::GridGeometry;
use crate::harmonize::HarmonizedGridSet;
use crate::profile::{ProfileKey, UserProfile};
use crate::variable::Variable;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::debug;

/// Source of the current time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exact inputs that determine a cached result
///
/// Target geometry is fingerprinted by the bit patterns of its extent and
/// resolution; assessments also carry the harmonized grid's content hash, and
/// profile identity includes weights, overrides and threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    pub steps: usize,
    pub geometry: [u64; 5],
    pub variables: Vec<Variable>,
    pub grid: Option<u64>,
    pub profile: Option<ProfileKey>,
}

impl CacheKey {
    pub fn for_target(target: &GridGeometry, variables: impl IntoIterator<Item = Variable>) -> Self {
        let axis = target.time_axis();
        let first_day = axis.first().map_or(NaiveDate::MIN, |t| t.date_naive());
        let last_day = axis.last().map_or(NaiveDate::MIN, |t| t.date_naive());
        let extent = target.extent();
        let mut variables: Vec<Variable> = variables.into_iter().collect();
        variables.sort();
        variables.dedup();
        CacheKey {
            first_day,
            last_day,
            steps: axis.len(),
            geometry: [
                extent.north.to_bits(),
                extent.south.to_bits(),
                extent.east.to_bits(),
                extent.west.to_bits(),
                target.resolution().to_bits(),
            ],
            variables,
            grid: None,
            profile: None,
        }
    }

    /// Key for results derived from `grid`'s harmonized values
    pub fn for_grid(grid: &HarmonizedGridSet) -> Self {
        let mut key = CacheKey::for_target(grid.target(), grid.variables());
        key.grid = Some(grid.fingerprint());
        key
    }

    pub fn with_profile(mut self, profile: &UserProfile) -> Self {
        self.profile = Some(profile.cache_key());
        self
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

/// Single-flight cache with a fixed expiry horizon
#[derive(Debug)]
pub struct ForecastCache<K, V> {
    horizon: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> ForecastCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(horizon: Duration) -> Self {
        ForecastCache::with_clock(horizon, Arc::new(SystemClock))
    }

    pub fn with_clock(horizon: Duration, clock: Arc<dyn Clock>) -> Self {
        ForecastCache {
            horizon,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Return the live entry for `key`, computing it on a miss
    ///
    /// Callers for the same key are serialized on the key's slot: the first
    /// computes, the rest observe its result. A failed computation leaves the
    /// slot empty and the error is returned to that caller only.
    pub fn get_or_compute<E, F>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(&key);
        let mut entry = lock(&slot);

        if let Some(existing) = entry.as_ref() {
            if self.clock.now() < existing.expires_at {
                debug!(key = ?key, "forecast cache hit");
                return Ok(existing.value.clone());
            }
            debug!(key = ?key, "forecast cache entry expired");
            *entry = None;
        } else {
            debug!(key = ?key, "forecast cache miss");
        }

        let value = compute()?;
        *entry = Some(Entry {
            value: value.clone(),
            expires_at: self.clock.now() + self.horizon,
        });
        Ok(value)
    }

    /// Drop the entry for `key`
    ///
    /// A computation already in flight for the key finishes into a detached
    /// slot; later callers recompute.
    pub fn invalidate(&self, key: &K) -> bool {
        lock(&self.slots).remove(key).is_some()
    }

    pub fn invalidate_all(&self) {
        lock(&self.slots).clear();
    }

    /// Remove expired or empty slots, skipping keys with a computation in flight
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => entry.as_ref().is_some_and(|e| now < e.expires_at),
            Err(TryLockError::Poisoned(poisoned)) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|e| now < e.expires_at),
            Err(TryLockError::WouldBlock) => true,
        });
        before - slots.len()
    }

    /// Number of tracked keys, including expired entries not yet purged
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
