//! Response cache keyed by idempotency key
//!
//! Each stored result schedules its own eviction after the TTL, so memory
//! stays bounded even for keys that are never read again. A generation
//! number guards against an older eviction removing a newer entry stored
//! under the same key.
//!
//! Outside a tokio runtime no eviction task can be spawned; expired entries
//! are then dropped on read instead.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::types::{SendRequest, SendResult};

/// Width of the time bucket mixed into derived keys
const KEY_BUCKET_SECS: u64 = 60;

#[derive(Debug)]
struct CacheEntry {
    result: SendResult,
    generation: u64,
    /// `None` when the TTL reaches past what an `Instant` can hold
    expires_at: Option<Instant>,
}

type Entries = DashMap<String, CacheEntry, ahash::RandomState>;

/// Maps idempotency keys to the result first produced for them
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: Arc<Entries>,
    ttl: Duration,
    generation: AtomicU64,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Cache `result` under `key`, replacing any previous entry
    pub fn store_response(&self, key: &str, result: SendResult) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now().checked_add(self.ttl);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                result,
                generation,
                expires_at,
            },
        );

        if expires_at.is_none() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let entries = Arc::downgrade(&self.entries);
            let key = key.to_string();
            let ttl = self.ttl;
            handle.spawn(async move {
                tokio::time::sleep(ttl).await;
                evict(&entries, &key, generation);
            });
        }
    }

    /// The cached result for `key`, if one has not yet expired
    pub fn get_response(&self, key: &str) -> Option<SendResult> {
        let expired = {
            let entry = self.entries.get(key)?;
            if entry.expires_at.is_none_or(|at| at > Instant::now()) {
                return Some(entry.result.clone());
            }
            entry.generation
        };

        self.entries
            .remove_if(key, |_, entry| entry.generation == expired);
        None
    }

    /// Number of cached results
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached result
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn evict(entries: &Weak<Entries>, key: &str, generation: u64) {
    if let Some(entries) = entries.upgrade() {
        entries.remove_if(key, |_, entry| entry.generation == generation);
    }
}

/// Derive a key for a request that arrived without one
///
/// Hashes recipient, subject, body and a 60 second time bucket, so identical
/// submissions made close together collapse onto one key.
#[must_use]
pub fn derive_key(request: &SendRequest, now: SystemTime) -> String {
    let bucket = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / KEY_BUCKET_SECS;

    let mut hasher = Sha256::new();
    hasher.update(request.to.as_bytes());
    hasher.update([0]);
    hasher.update(request.subject.as_bytes());
    hasher.update([0]);
    hasher.update(request.body.as_bytes());
    hasher.update([0]);
    hasher.update(bucket.to_be_bytes());

    hex::encode(hasher.finalize())
}
