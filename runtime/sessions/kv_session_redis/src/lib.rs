//! A [`KeyValueClient`] backed by Redis or a Redis-compatible database (e.g. Valkey).
use anyhow::Context;
use kv_session::client::{KeyValueClient, errors::EngineError};
use redis::{AsyncCommands, aio::ConnectionManager};

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how to reach the Redis server.
pub struct RedisClientConfig {
    /// The connection URL, e.g. `redis://localhost:6379`.
    pub url: String,
    /// How long to wait for the initial connection to be established.
    ///
    /// Default is 5 seconds.
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: std::time::Duration,
}

impl RedisClientConfig {
    /// Connect to the Redis server at `url`, with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

fn default_connection_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}

#[derive(Clone)]
/// A key-value client talking to Redis.
///
/// # Implementation details
///
/// It wraps a [`ConnectionManager`], which multiplexes commands over a single
/// connection and transparently reconnects if it drops.
/// Cloning the client is cheap: clones share the same connection.
pub struct RedisClient {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("conn", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisClient {
    /// Creates a new client on top of an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a connection to the Redis server described by `config`.
    pub async fn connect(config: &RedisClientConfig) -> Result<Self, anyhow::Error> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("`{}` is not a valid Redis connection URL", config.url))?;
        let conn = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to Redis within {:?}",
                    config.connection_timeout
                )
            })?
            .context("Failed to connect to Redis")?;
        Ok(Self::new(conn))
    }
}

#[async_trait::async_trait]
impl KeyValueClient for RedisClient {
    #[tracing::instrument(name = "Redis PING", level = tracing::Level::INFO, skip_all)]
    async fn ping(&self) -> Result<String, EngineError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(EngineError::unavailable)
    }

    #[tracing::instrument(name = "Redis GET", level = tracing::Level::INFO, skip_all)]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        self.conn
            .clone()
            .get(key)
            .await
            .map_err(EngineError::unavailable)
    }

    #[tracing::instrument(name = "Redis SETEX", level = tracing::Level::INFO, skip_all)]
    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), EngineError> {
        self.conn
            .clone()
            .set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(EngineError::unavailable)
    }

    #[tracing::instrument(name = "Redis DEL", level = tracing::Level::INFO, skip_all)]
    async fn del(&self, keys: &[String]) -> Result<u64, EngineError> {
        self.conn
            .clone()
            .del(keys.to_vec())
            .await
            .map_err(EngineError::unavailable)
    }

    #[tracing::instrument(name = "Redis SCAN", level = tracing::Level::INFO, skip_all)]
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), EngineError> {
        let mut conn = self.conn.clone();
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(EngineError::unavailable)
    }
}
