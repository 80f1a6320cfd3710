use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{RedisClient, Result};

/// Durable key → JSON document store. Writes overwrite unconditionally and
/// entries never expire.
#[async_trait]
pub trait BlobCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()>;
}

/// Read a typed document. A stored document that no longer matches `T` is
/// reported as absent so the stage that owns it gets recomputed.
pub async fn read_json<T: DeserializeOwned>(cache: &dyn BlobCache, key: &str) -> Result<Option<T>> {
    let Some(value) = cache.get(key).await? else {
        return Ok(None);
    };

    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            warn!("Ignoring unreadable cache entry {}: {}", key, e);
            Ok(None)
        }
    }
}

pub async fn write_json<T: Serialize + ?Sized>(
    cache: &dyn BlobCache,
    key: &str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value)?;
    cache.put(key, &value).await
}

/// Blob cache kept in Redis as plain string values
#[derive(Clone)]
pub struct RedisBlobCache {
    redis: RedisClient,
}

impl RedisBlobCache {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl BlobCache for RedisBlobCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let Some(body) = self.redis.get_blob(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Cache entry {} is not valid JSON: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(value)?;
        self.redis.put_blob(key, &body).await
    }
}

/// Process-local blob cache for tests and single-process runs
#[derive(Default)]
pub struct MemoryBlobCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobCache for MemoryBlobCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(body) => Ok(Some(serde_json::from_str(body)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        // Stored serialized so readers never share state with writers
        let body = serde_json::to_string(value)?;
        debug!("Stored blob {} ({} bytes) in memory", key, body.len());
        self.entries.write().await.insert(key.to_string(), body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let cache = MemoryBlobCache::new();
        assert!(cache.get("nope.json").await.unwrap().is_none());
        assert!(read_json::<Doc>(&cache, "nope.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = MemoryBlobCache::new();
        write_json(&cache, "a.json", &Doc { name: "first".into(), count: 1 })
            .await
            .unwrap();
        write_json(&cache, "a.json", &Doc { name: "second".into(), count: 2 })
            .await
            .unwrap();

        let doc: Doc = read_json(&cache, "a.json").await.unwrap().unwrap();
        assert_eq!(doc, Doc { name: "second".into(), count: 2 });
        assert_eq!(cache.keys().await, vec!["a.json".to_string()]);
    }

    #[tokio::test]
    async fn test_mismatched_shape_reads_as_absent() {
        let cache = MemoryBlobCache::new();
        cache.put("a.json", &json!(["not", "a", "doc"])).await.unwrap();

        assert!(cache.contains("a.json").await);
        assert!(read_json::<Doc>(&cache, "a.json").await.unwrap().is_none());
    }
}
