//! In-process fetch cache
//!
//! Avoids refetching a series within `cache_ttl_seconds`. Entries are
//! keyed by indicator code plus the requested range and dropped lazily
//! on read, plus eagerly by the maintenance sweep.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::normalize::RawPoint;
use crate::sources::DateRange;

struct CacheEntry {
    points: Vec<RawPoint>,
    expires_at: Instant,
}

/// TTL cache for raw provider payloads
pub struct FetchCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl FetchCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn key(indicator_code: &str, range: DateRange) -> String {
        format!("{indicator_code}:{range}")
    }

    pub fn get(&self, key: &str) -> Option<Vec<RawPoint>> {
        // The read guard must be dropped before the remove below, or
        // the shard lock would be taken twice.
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.points.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: &str, points: Vec<RawPoint>) {
        self.set_with_ttl(key, points, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: &str, points: Vec<RawPoint>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                points,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange {
            start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
        }
    }

    fn points() -> Vec<RawPoint> {
        vec![RawPoint {
            date: "2025-06-01".to_string(),
            value: "10,65".to_string(),
        }]
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = FetchCache::new(Duration::from_secs(60));
        let key = FetchCache::key("selic", range());
        cache.set(&key, points());
        assert_eq!(cache.get(&key), Some(points()));
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = FetchCache::new(Duration::from_secs(60));
        let key = FetchCache::key("selic", range());
        cache.set_with_ttl(&key, points(), Duration::ZERO);
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_distinguishes_ranges() {
        let other = DateRange {
            start: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
        };
        assert_ne!(FetchCache::key("selic", range()), FetchCache::key("selic", other));
        assert_ne!(
            FetchCache::key("selic", range()),
            FetchCache::key("ipca", range())
        );
    }

    #[test]
    fn test_purge_expired_counts() {
        let cache = FetchCache::new(Duration::from_secs(60));
        cache.set_with_ttl("a", points(), Duration::ZERO);
        cache.set("b", points());
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
