use std::future::Future;

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::{
    SessionId,
    client::{KeyValueClient, errors::EngineError},
    config::StoreConfig,
};
use errors::{InvalidIdError, LoadRecordError, SaveRecordError, SizeLimitExceededError};

/// Session records, as laid out in the key-value cache.
///
/// Every record lives under `<key_prefix><session id>` and holds the
/// serialized session values, with a time-to-live enforced by the engine.
/// This type owns the key layout, the size limit and the enumeration logic;
/// it knows nothing about cookies.
#[derive(Debug)]
pub struct SessionRecords {
    client: Box<dyn KeyValueClient>,
    key_prefix: String,
    max_length: usize,
    scan_count: usize,
    operation_timeout: Option<std::time::Duration>,
}

impl SessionRecords {
    /// Manage session records through `client`, laid out according to `config`.
    pub fn new<Client>(client: Client, config: &StoreConfig) -> Self
    where
        Client: KeyValueClient + 'static,
    {
        Self {
            client: Box::new(client),
            key_prefix: config.key_prefix.clone(),
            max_length: config.max_length,
            scan_count: config.scan_count.max(1),
            operation_timeout: config.operation_timeout,
        }
    }

    /// The cache key for the session with the given id.
    pub fn key(&self, id: &SessionId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// The prefix shared by all session keys.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub(crate) fn set_key_prefix(&mut self, key_prefix: String) {
        self.key_prefix = key_prefix;
    }

    /// The maximum size of a serialized record, in bytes. `0` means unbounded.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub(crate) fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    /// The underlying key-value client.
    pub fn client(&self) -> &dyn KeyValueClient {
        self.client.as_ref()
    }

    /// Fetch the payload stored for `id`.
    ///
    /// Returns `None` if there is no record for `id`, or if it has expired.
    #[tracing::instrument(name = "Load session record", level = tracing::Level::TRACE, skip_all)]
    pub async fn load(&self, id: &SessionId) -> Result<Option<Vec<u8>>, LoadRecordError> {
        if id.is_empty() {
            return Err(InvalidIdError.into());
        }
        let key = self.key(id);
        Ok(self.call(self.client.get(&key)).await?)
    }

    /// Store `payload` for `id`, replacing any existing record.
    ///
    /// The record expires after `ttl_seconds`. A non-positive TTL is handed to the
    /// engine as zero, which a Redis-compatible engine refuses.
    /// Nothing is written if `payload` exceeds the configured maximum length.
    #[tracing::instrument(name = "Save session record", level = tracing::Level::TRACE, skip_all)]
    pub async fn save(
        &self,
        id: &SessionId,
        payload: &[u8],
        ttl_seconds: i64,
    ) -> Result<(), SaveRecordError> {
        if id.is_empty() {
            return Err(InvalidIdError.into());
        }
        if self.max_length != 0 && payload.len() > self.max_length {
            return Err(SizeLimitExceededError {
                size: payload.len(),
                max_length: self.max_length,
            }
            .into());
        }
        let key = self.key(id);
        let ttl = u64::try_from(ttl_seconds).unwrap_or_default();
        self.call(self.client.set_ex(&key, payload, ttl)).await?;
        Ok(())
    }

    /// Remove the records stored under `keys` with a single round-trip.
    ///
    /// Keys are used verbatim: they must already carry the prefix.
    /// Missing keys are not an error.
    #[tracing::instrument(name = "Delete session records", level = tracing::Level::TRACE, skip_all, fields(n_keys = keys.len()))]
    pub async fn delete(&self, keys: &[String]) -> Result<(), EngineError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.call(self.client.del(keys)).await?;
        Ok(())
    }

    /// Enumerate every record under the prefix, lazily.
    ///
    /// The stream follows the `SCAN` cursor until the engine reports the end of
    /// the iteration, fetching each key as it goes. Keys that expire between the
    /// scan and the fetch are skipped. The first engine error is yielded and
    /// ends the enumeration.
    ///
    /// `SCAN` guarantees that every key present for the whole duration of the
    /// enumeration is returned, but a key may be returned more than once.
    pub fn scan_all(&self) -> BoxStream<'_, Result<(String, Vec<u8>), EngineError>> {
        let pattern = format!("{}*", escape_glob(&self.key_prefix));
        stream::try_unfold(Some(0u64), move |cursor| {
            let pattern = pattern.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok(None);
                };
                let (next, keys) = self
                    .call(self.client.scan(cursor, &pattern, self.scan_count))
                    .await?;
                let next = (next != 0).then_some(next);
                Ok::<_, EngineError>(Some((keys, next)))
            }
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok::<_, EngineError>)))
        .try_flatten()
        .try_filter_map(move |key: String| async move {
            let payload = self.call(self.client.get(&key)).await?;
            Ok::<_, EngineError>(payload.map(|payload| (key, payload)))
        })
        .boxed()
    }

    /// Ask the engine whether it's alive.
    ///
    /// Returns `true` if it replied with `PONG`.
    #[tracing::instrument(name = "Ping key-value cache", level = tracing::Level::TRACE, skip_all)]
    pub async fn ping(&self) -> Result<bool, EngineError> {
        let reply = self.call(self.client.ping()).await?;
        Ok(reply == "PONG")
    }

    async fn call<T, F>(&self, operation: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match self.operation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, operation)
                .await
                .map_err(|_| EngineError::Timeout(timeout))?,
            None => operation.await,
        }
    }
}

/// Escape the characters that have a special meaning in a `SCAN` pattern.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Errors that can occur when reading or writing session records.
pub mod errors {
    use crate::client::errors::EngineError;

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionRecords::load`][super::SessionRecords::load].
    pub enum LoadRecordError {
        #[error(transparent)]
        /// The session id is empty.
        InvalidId(#[from] InvalidIdError),
        #[error("Failed to load the session record.")]
        /// The key-value cache failed.
        Engine(#[from] EngineError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionRecords::save`][super::SessionRecords::save].
    pub enum SaveRecordError {
        #[error(transparent)]
        /// The session id is empty.
        InvalidId(#[from] InvalidIdError),
        #[error(transparent)]
        /// The serialized session is too large.
        SizeLimitExceeded(#[from] SizeLimitExceededError),
        #[error("Failed to save the session record.")]
        /// The key-value cache failed.
        Engine(#[from] EngineError),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The session id is empty.")]
    /// The session id is empty, so it can't be mapped to a record.
    pub struct InvalidIdError;

    #[derive(Debug, thiserror::Error)]
    #[error("The serialized session is {size} bytes long, the maximum allowed is {max_length} bytes.")]
    /// The serialized session exceeds the configured maximum length.
    pub struct SizeLimitExceededError {
        /// The size of the serialized session, in bytes.
        pub size: usize,
        /// The configured maximum length, in bytes.
        pub max_length: usize,
    }
}
