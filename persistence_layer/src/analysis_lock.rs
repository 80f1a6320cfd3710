use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{LockHandle, PersistenceError, RedisClient, Result};

/// Per-address execution lock.
///
/// `try_acquire` is an atomic test-and-set: of any number of concurrent
/// callers for the same address, exactly one receives a handle.
#[async_trait]
pub trait AnalysisLock: Send + Sync {
    /// `None` when another holder already owns the address
    async fn try_acquire(&self, address: &str) -> Result<Option<LockHandle>>;

    async fn release(&self, handle: &LockHandle) -> Result<()>;

    /// Renew the holder's expiry. `false` means the lock was lost and another
    /// run may already own the address.
    async fn refresh(&self, handle: &LockHandle) -> Result<bool>;

    async fn is_held(&self, address: &str) -> Result<bool>;
}

/// In-process active-analysis set
#[derive(Default)]
pub struct LocalAnalysisLock {
    holders: Mutex<HashMap<String, String>>,
}

impl LocalAnalysisLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.holders.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AnalysisLock for LocalAnalysisLock {
    async fn try_acquire(&self, address: &str) -> Result<Option<LockHandle>> {
        // A poisoned map is still structurally valid
        let mut holders = self.holders.lock().unwrap_or_else(|p| p.into_inner());
        if holders.contains_key(address) {
            debug!("Analysis already active for {}", address);
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        holders.insert(address.to_string(), token.clone());
        Ok(Some(LockHandle {
            key: address.to_string(),
            value: token,
            ttl_seconds: 0,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let mut holders = self.holders.lock().unwrap_or_else(|p| p.into_inner());
        match holders.get(&handle.key) {
            Some(token) if *token == handle.value => {
                holders.remove(&handle.key);
                debug!("Released analysis lock for {}", handle.key);
                Ok(())
            }
            _ => {
                warn!("Analysis lock for {} was not held by this handle", handle.key);
                Err(PersistenceError::LockNotFound)
            }
        }
    }

    /// Local holds never expire; this only confirms ownership
    async fn refresh(&self, handle: &LockHandle) -> Result<bool> {
        let holders = self.holders.lock().unwrap_or_else(|p| p.into_inner());
        Ok(holders.get(&handle.key) == Some(&handle.value))
    }

    async fn is_held(&self, address: &str) -> Result<bool> {
        let holders = self.holders.lock().unwrap_or_else(|p| p.into_inner());
        Ok(holders.contains_key(address))
    }
}

/// Lock shared by every process talking to the same Redis. A holder that
/// dies keeps the address locked for at most `ttl_seconds`; a live holder
/// must keep calling `refresh` well inside that window.
#[derive(Clone)]
pub struct RedisAnalysisLock {
    redis: RedisClient,
    ttl_seconds: u64,
}

impl RedisAnalysisLock {
    pub fn new(redis: RedisClient, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    fn lock_name(address: &str) -> String {
        format!("analysis:{}", address)
    }
}

#[async_trait]
impl AnalysisLock for RedisAnalysisLock {
    async fn try_acquire(&self, address: &str) -> Result<Option<LockHandle>> {
        match self
            .redis
            .acquire_lock(&Self::lock_name(address), self.ttl_seconds)
            .await
        {
            Ok(handle) => Ok(Some(handle)),
            Err(PersistenceError::LockFailed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        self.redis.release_lock(handle).await
    }

    async fn refresh(&self, handle: &LockHandle) -> Result<bool> {
        self.redis.extend_lock(handle).await
    }

    async fn is_held(&self, address: &str) -> Result<bool> {
        self.redis.is_locked(&Self::lock_name(address)).await
    }
}
