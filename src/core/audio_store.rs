//! In-memory store for synthesized audio artifacts served by URL.
//!
//! When audio is not inlined into the `response` envelope, the payload is
//! parked here under a fresh identifier and fetched via `GET /audio/{id}`.
//! Entries expire on a TTL; clients are expected to fetch promptly after
//! receiving the response that references them.

use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;
use uuid::Uuid;

/// Cap on total cached audio (bytes) before old entries are evicted.
const MAX_STORE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AudioStore {
    cache: Cache<String, Bytes>,
}

impl AudioStore {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .weigher(|_key: &String, value: &Bytes| value.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(MAX_STORE_BYTES)
            .build();
        Self { cache }
    }

    /// Park an audio payload and return its artifact identifier.
    pub async fn insert(&self, audio: Bytes) -> String {
        let id = Uuid::new_v4().to_string();
        self.cache.insert(id.clone(), audio).await;
        id
    }

    /// Fetch a previously parked payload, if it has not expired.
    pub async fn get(&self, id: &str) -> Option<Bytes> {
        self.cache.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_then_get_round_trip() {
        let store = AudioStore::new(Duration::from_secs(60));
        let id = store.insert(Bytes::from_static(b"mp3-bytes")).await;
        let fetched = store.get(&id).await.expect("artifact should be present");
        assert_eq!(fetched, Bytes::from_static(b"mp3-bytes"));
    }

    #[tokio::test]
    async fn test_unknown_id_is_absent() {
        let store = AudioStore::new(Duration::from_secs(60));
        assert!(store.get("no-such-artifact").await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = AudioStore::new(Duration::from_secs(60));
        let a = store.insert(Bytes::from_static(b"a")).await;
        let b = store.insert(Bytes::from_static(b"b")).await;
        assert_ne!(a, b);
    }
}
