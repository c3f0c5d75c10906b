//! # Ratelimit Registry
//!
//! Per-bucket cooldowns. A bucket maps a key (actor, room, channel or a global constant, depending
//! on the scope) to the instant its cooldown expires. Expired entries are dropped lazily on the
//! next lookup; there is no background sweep.
//!
//! Each bucket has its own lock, so unrelated commands never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::config::RatelimitScope;
use crate::domain::types::Origin;

const GLOBAL_KEY: &str = "*";

struct Bucket {
    window: Duration,
    expiries: Mutex<HashMap<String, Instant>>,
}

impl Bucket {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.expiries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remaining(expiries: &mut HashMap<String, Instant>, key: &str, now: Instant) -> Option<Duration> {
        match expiries.get(key) {
            Some(expiry) if *expiry > now => Some(*expiry - now),
            Some(_) => {
                expiries.remove(key);
                None
            }
            None => None,
        }
    }
}

/// The cooldown a command is subject to, after config overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ratelimit {
    pub bucket: String,
    pub window: Duration,
    pub scope: RatelimitScope,
}

impl Ratelimit {
    /// Key inside the bucket for an invocation from `origin`.
    pub fn key_for(&self, origin: &Origin) -> String {
        match self.scope {
            RatelimitScope::Actor => origin.actor.clone(),
            RatelimitScope::Room => origin.room.clone(),
            RatelimitScope::Channel => origin.channel.clone(),
            RatelimitScope::Global => GLOBAL_KEY.to_string(),
        }
    }
}

/// A use admitted by [`RatelimitRegistry::try_acquire`], needed to refund it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    bucket: String,
    key: String,
    expires: Instant,
}

#[derive(Default)]
pub struct RatelimitRegistry {
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
}

impl RatelimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or resize) a bucket. Existing entries keep their expiry.
    pub fn configure(&self, bucket: &str, window: Duration) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = buckets
            .remove(bucket)
            .map(|b| {
                let entries = b.lock().clone();
                entries
            })
            .unwrap_or_default();
        buckets.insert(
            bucket.to_string(),
            Arc::new(Bucket {
                window,
                expiries: Mutex::new(entries),
            }),
        );
    }

    fn bucket(&self, bucket: &str) -> Option<Arc<Bucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .cloned()
    }

    pub fn window(&self, bucket: &str) -> Option<Duration> {
        self.bucket(bucket).map(|b| b.window)
    }

    /// Remaining cooldown, or `None` when not limited.
    pub fn check(&self, bucket: &str, key: &str) -> Option<Duration> {
        let bucket = self.bucket(bucket)?;
        let mut expiries = bucket.lock();
        Bucket::remaining(&mut expiries, key, Instant::now())
    }

    /// Start a cooldown for `key` now. Returns `false` for an unknown bucket.
    pub fn register(&self, bucket: &str, key: &str) -> bool {
        let Some(b) = self.bucket(bucket) else {
            tracing::warn!(bucket, "Ratelimit registered against unknown bucket");
            return false;
        };
        b.lock().insert(key.to_string(), Instant::now() + b.window);
        true
    }

    /// Check and register in one step under the bucket lock. An unknown bucket admits without a
    /// reservation.
    ///
    /// # Errors
    ///
    /// Returns the remaining cooldown when `key` is still limited.
    pub fn try_acquire(&self, bucket: &str, key: &str) -> Result<Option<Reservation>, Duration> {
        let Some(b) = self.bucket(bucket) else {
            return Ok(None);
        };
        let now = Instant::now();
        let mut expiries = b.lock();
        if let Some(remaining) = Bucket::remaining(&mut expiries, key, now) {
            return Err(remaining);
        }
        let expires = now + b.window;
        expiries.insert(key.to_string(), expires);
        Ok(Some(Reservation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expires,
        }))
    }

    /// Refund a use so it no longer counts. A newer use of the same key is left alone.
    pub fn release(&self, reservation: &Reservation) {
        let Some(b) = self.bucket(&reservation.bucket) else {
            return;
        };
        let mut expiries = b.lock();
        if expiries.get(&reservation.key) == Some(&reservation.expires) {
            expiries.remove(&reservation.key);
        }
    }
}
