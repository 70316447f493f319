//! TTL cache shared by the object and transaction lookups.
//!
//! Entries expire passively: `get` checks the deadline, nothing is evicted in the background.
//! Batch reads follow an all-or-refresh rule: when every requested key is fresh the cache
//! answers alone, otherwise one fetch is issued for the whole batch so the cached members get
//! refreshed in the same round trip.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Lifetime of cached remote objects and transactions.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent key -> (value, expiry) map. Sharded, so unrelated keys never contend.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Value for `key` if present and not yet expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        (Instant::now() < entry.expires_at).then(|| entry.value.clone())
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Serve `keys` from cache when all are fresh; otherwise call `fetch` once with every key.
    ///
    /// Fetched values are stored with the cache TTL. Keys the fetch did not return are served
    /// from cache if still fresh and are otherwise absent from the result.
    pub async fn get_or_fetch_batch<F, Fut, E>(&self, keys: &[K], fetch: F) -> Result<HashMap<K, V>, E>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, V>, E>>,
    {
        let cached: HashMap<K, V> = keys
            .iter()
            .filter_map(|k| self.get(k).map(|v| (k.clone(), v)))
            .collect();
        if cached.len() == unique_len(keys) {
            return Ok(cached);
        }
        let mut fetched = self.fetch_batch(keys, fetch).await?;
        for (k, v) in cached {
            fetched.entry(k).or_insert(v);
        }
        Ok(fetched)
    }

    /// Always call `fetch` for `keys` and store what comes back.
    pub async fn fetch_batch<F, Fut, E>(&self, keys: &[K], fetch: F) -> Result<HashMap<K, V>, E>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, V>, E>>,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let fetched = fetch(keys.to_vec()).await?;
        for (k, v) in &fetched {
            self.put(k.clone(), v.clone(), self.ttl);
        }
        Ok(fetched)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unique_len<K: Eq + Hash>(keys: &[K]) -> usize {
    keys.iter().collect::<std::collections::HashSet<_>>().len()
}
