//! Short-lived store of payment responses keyed by client idempotency keys.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Value held while the first request for a key is still being processed.
const PENDING_MARKER: &str = "__pending__";

/// How long a reservation survives a crashed request.
pub const PENDING_TTL_SECONDS: u64 = 60;

/// Store key for a payment idempotency key, scoped to one invoice.
pub fn payment_key(invoice_id: Uuid, idempotency_key: &str) -> String {
    format!("idempotency:payment:{}:{}", invoice_id, idempotency_key)
}

/// Response produced by the first request for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyEntry {
    Pending,
    Completed(CachedResponse),
}

impl IdempotencyEntry {
    fn decode(raw: &str) -> Result<Self, anyhow::Error> {
        if raw == PENDING_MARKER {
            return Ok(IdempotencyEntry::Pending);
        }
        let response = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Corrupt idempotency entry: {}", e))?;
        Ok(IdempotencyEntry::Completed(response))
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyEntry>, anyhow::Error>;

    /// Mark `key` as in flight. Returns false when the key already exists.
    async fn try_reserve(&self, key: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error>;

    /// Store the final response, replacing any reservation.
    async fn put(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error>;

    async fn release(&self, key: &str) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisIdempotencyStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyEntry>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read idempotency key: {}", e))?;

        raw.as_deref().map(IdempotencyEntry::decode).transpose()
    }

    async fn try_reserve(&self, key: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        // SET NX replies nil when the key exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(PENDING_MARKER)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reserve idempotency key: {}", e))?;

        Ok(reply.is_some())
    }

    async fn put(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let value = serde_json::to_string(response)?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store idempotent response: {}", e))
    }

    async fn release(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to release idempotency key: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// Process-local store for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expires_at(ttl_seconds: u64) -> Instant {
        Instant::now() + Duration::from_secs(ttl_seconds)
    }

    /// Drop every entry whose TTL has run out.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyEntry>, anyhow::Error> {
        let now = Instant::now();
        let raw = match self.entries.get(key) {
            Some(entry) if entry.1 > now => Some(entry.0.clone()),
            _ => None,
        };
        // The read guard is gone here; removing under it would deadlock.
        if raw.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        raw.as_deref().map(IdempotencyEntry::decode).transpose()
    }

    async fn try_reserve(&self, key: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error> {
        let value = (PENDING_MARKER.to_string(), Self::expires_at(ttl_seconds));
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > Instant::now() {
                    return Ok(false);
                }
                entry.insert(value);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(true)
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        response: &CachedResponse,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let value = serde_json::to_string(response)?;
        self.purge_expired();
        self.entries
            .insert(key.to_string(), (value, Self::expires_at(ttl_seconds)));
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
