use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Namespaced cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// `token:<access token>`, holding a user session.
    pub fn token(access_token: &str) -> Self {
        Self(format!("token:{}", access_token))
    }

    /// `apiKey:<key>`, holding a tenant session.
    pub fn api_key(key: &str) -> Self {
        Self(format!("apiKey:{}", key))
    }

    /// `refresh:<jti>`, marking a consumed refresh token.
    pub fn refresh(jti: &str) -> Self {
        Self(format!("refresh:{}", jti))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys embed bearer credentials; only the namespace is printable.
        let namespace = self.0.split(':').next().unwrap_or_default();
        write!(f, "{}:<redacted>", namespace)
    }
}

/// TTL-capable key/value store for serialized sessions.
///
/// Values are always written whole; there is no partial update.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn put(&self, key: &SessionKey, value: &str, ttl: Duration) -> Result<(), anyhow::Error>;

    async fn get(&self, key: &SessionKey) -> Result<Option<String>, anyhow::Error>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn put_if_absent(
        &self,
        key: &SessionKey,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[derive(Clone)]
pub struct RedisSessionCache {
    manager: ConnectionManager,
}

impl RedisSessionCache {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own after a dropped connection.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn put(&self, key: &SessionKey, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", key, e))
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", key, e))
    }

    async fn put_if_absent(
        &self,
        key: &SessionKey,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", key, e))?;
        Ok(reply.is_some())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process cache honouring TTLs, with switches to simulate an outage.
#[derive(Default)]
pub struct MockSessionCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl MockSessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a raw value bypassing the trait, e.g. to plant a corrupt payload.
    pub fn insert_raw(&self, key: &SessionKey, value: &str, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.as_str().to_string(),
                (value.to_string(), Instant::now() + ttl),
            );
        }
    }

    pub fn raw(&self, key: &SessionKey) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key.as_str())
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(v, _)| v.clone())
    }

    /// Time left before the entry under `key` expires.
    pub fn time_to_live(&self, key: &SessionKey) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key.as_str())
            .and_then(|(_, expires)| expires.checked_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    pub fn remove(&self, key: &SessionKey) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(key.as_str()).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_available(&self) -> Result<(), anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("cache unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionCache for MockSessionCache {
    async fn put(&self, key: &SessionKey, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        self.ensure_available()?;
        self.insert_raw(key, value, ttl);
        Ok(())
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<String>, anyhow::Error> {
        self.ensure_available()?;
        Ok(self.raw(key))
    }

    async fn put_if_absent(
        &self,
        key: &SessionKey,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, anyhow::Error> {
        self.ensure_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("cache lock poisoned"))?;
        let now = Instant::now();
        if entries
            .get(key.as_str())
            .is_some_and(|(_, expires)| *expires > now)
        {
            return Ok(false);
        }
        entries.insert(key.as_str().to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.ensure_available()
    }
}
