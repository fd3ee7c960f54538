use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::models::Slot;

struct CachedListing {
    version: u64,
    stored_at: Instant,
    slots: Vec<Slot>,
}

/// Read-through cache for slot listings.
///
/// Entries are tagged with the version token current when their read began.
/// Any capacity or slot change bumps the token, so a stale entry is never
/// served after a committed write even if its TTL has not run out.
pub struct ListingCache {
    ttl: Duration,
    version: AtomicU64,
    entries: RwLock<HashMap<String, CachedListing>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            version: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_ttl_seconds(seconds: u64) -> Self {
        Self::new(Duration::from_secs(seconds))
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Invalidate every cached listing. Returns the new token.
    pub fn bump(&self) -> u64 {
        let next = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Listing cache version bumped to {}", next);
        next
    }

    pub fn listing_key(tenant_id: Uuid, professional_id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}:{}",
            tenant_id,
            professional_id,
            from.timestamp(),
            to.timestamp()
        )
    }

    pub fn get(&self, key: &str) -> Option<Vec<Slot>> {
        if !self.is_enabled() {
            return None;
        }

        let current = self.version();
        let entries = self.read_entries();
        let entry = entries.get(key)?;

        if entry.version != current || entry.stored_at.elapsed() > self.ttl {
            return None;
        }

        Some(entry.slots.clone())
    }

    /// Store a listing read under `version`. Dropped if the token moved
    /// while the read was in flight.
    pub fn put(&self, key: String, version: u64, slots: Vec<Slot>) {
        if !self.is_enabled() || version != self.version() {
            return;
        }

        let mut entries = self.write_entries();
        entries.retain(|_, entry| entry.version == version);
        entries.insert(
            key,
            CachedListing {
                version,
                stored_at: Instant::now(),
                slots,
            },
        );
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, CachedListing>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, CachedListing>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> String {
        let now = Utc::now();
        ListingCache::listing_key(Uuid::new_v4(), Uuid::new_v4(), now, now)
    }

    #[test]
    fn test_hit_until_version_bumped() {
        let cache = ListingCache::from_ttl_seconds(30);
        let key = key();

        let version = cache.version();
        cache.put(key.clone(), version, Vec::new());
        assert!(cache.get(&key).is_some());

        cache.bump();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_put_with_stale_version_is_dropped() {
        let cache = ListingCache::from_ttl_seconds(30);
        let key = key();

        let version = cache.version();
        cache.bump();
        cache.put(key.clone(), version, Vec::new());

        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = ListingCache::from_ttl_seconds(0);
        let key = key();

        cache.put(key.clone(), cache.version(), Vec::new());
        assert!(cache.get(&key).is_none());
    }
}
