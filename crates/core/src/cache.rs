use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Time-boxed memoization. Entries expire only by age; there is no explicit invalidation.
/// Expired entries are dropped on every insert, so the map never outgrows the live key
/// set. A zero TTL disables caching.
///
/// The lock is not held while a missing value is computed, so concurrent misses on the
/// same key may each compute it; the last insert wins.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some(e) if e.inserted_at.elapsed() < self.ttl => Some(e.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let mut guard = self.entries.lock().await;
        let ttl = self.ttl;
        guard.retain(|_, e| e.inserted_at.elapsed() < ttl);
        guard.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn get_or_insert_with<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(v) = self.get(&key).await {
            return v;
        }
        let value = compute().await;
        self.insert(key, value.clone()).await;
        value
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with); errors are returned and
    /// never cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(&key).await {
            return Ok(v);
        }
        let value = compute().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
