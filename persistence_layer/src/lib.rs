use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod analysis_lock;
pub mod blob_cache;
pub mod cache_keys;

pub use analysis_lock::{AnalysisLock, LocalAnalysisLock, RedisAnalysisLock};
pub use blob_cache::{read_json, write_json, BlobCache, MemoryBlobCache, RedisBlobCache};
pub use cache_keys::CacheKeys;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Lock acquisition failed")]
    LockFailed,
    #[error("Lock not found")]
    LockNotFound,
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Proof of lock ownership; the value must match for release to succeed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHandle {
    pub key: String,
    pub value: String,
    pub ttl_seconds: u64,
}

/// Where a frame client asked to receive notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameNotificationDetails {
    pub url: String,
    pub token: String,
}

#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;

        let redis = Self { connection };
        let pong = redis.ping().await?;
        debug!("Redis answered {}", pong);

        Ok(redis)
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<String> {
        let mut conn = self.connection();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }

    // =====================================
    // Blob storage
    // =====================================

    /// Read a stored blob (plain GET, no expiry semantics)
    pub async fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// Store a blob permanently, overwriting any previous value
    pub async fn put_blob(&self, key: &str, body: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.set(key, body).await?;
        debug!("Stored blob {} ({} bytes)", key, body.len());
        Ok(())
    }

    // =====================================
    // Distributed Lock Management
    // =====================================

    /// Acquire a distributed lock; `SET NX EX` makes acquisition and expiry one step
    pub async fn acquire_lock(&self, lock_name: &str, ttl_seconds: u64) -> Result<LockHandle> {
        let key = format!("lock:{}", lock_name);
        let value = format!("{}:{}", std::process::id(), uuid::Uuid::new_v4());

        let mut conn = self.connection();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Err(PersistenceError::LockFailed);
        }

        info!("Acquired lock: {}", lock_name);
        Ok(LockHandle {
            key,
            value,
            ttl_seconds,
        })
    }

    /// Release a distributed lock
    pub async fn release_lock(&self, handle: &LockHandle) -> Result<()> {
        // Only the holder may delete the key
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;

        let mut conn = self.connection();
        let result: i32 = redis::Script::new(script)
            .key(&handle.key)
            .arg(&handle.value)
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            info!("Released lock: {}", handle.key);
            Ok(())
        } else {
            warn!("Lock was already expired or held by another process: {}", handle.key);
            Err(PersistenceError::LockNotFound)
        }
    }

    /// Push the lock's expiry out by its full TTL. `false` when the key has
    /// expired or now belongs to another holder.
    pub async fn extend_lock(&self, handle: &LockHandle) -> Result<bool> {
        let script = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("PEXPIRE", KEYS[1], ARGV[2])
            else
                return 0
            end
        "#;

        let mut conn = self.connection();
        let result: i32 = redis::Script::new(script)
            .key(&handle.key)
            .arg(&handle.value)
            .arg(handle.ttl_seconds.saturating_mul(1000))
            .invoke_async(&mut conn)
            .await?;

        Ok(result == 1)
    }

    /// Whether anyone currently holds the named lock
    pub async fn is_locked(&self, lock_name: &str) -> Result<bool> {
        let mut conn = self.connection();
        let exists: bool = conn.exists(format!("lock:{}", lock_name)).await?;
        Ok(exists)
    }

    // =====================================
    // Frame notification subscribers
    // =====================================

    /// Look up the notification endpoint a frame user registered
    pub async fn get_notification_details(
        &self,
        fid: u64,
    ) -> Result<Option<FrameNotificationDetails>> {
        let mut conn = self.connection();
        let raw: Option<String> = conn.get(notification_details_key(fid)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn notification_details_key(fid: u64) -> String {
    format!("frames-v2-demo:user:{}", fid)
}
