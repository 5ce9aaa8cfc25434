use errors::EngineError;

#[async_trait::async_trait]
/// The subset of a Redis-like key-value cache that session storage relies on.
///
/// Implementations are expected to be cheap to share: the store holds one
/// instance and issues concurrent calls through `&self`.
pub trait KeyValueClient: std::fmt::Debug + Send + Sync {
    /// Check that the engine is reachable.
    ///
    /// A healthy engine replies with `PONG`.
    async fn ping(&self) -> Result<String, EngineError>;

    /// Fetch the value stored under `key`.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError>;

    /// Store `value` under `key`, expiring after `ttl_seconds`.
    ///
    /// It overwrites any existing value.
    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), EngineError>;

    /// Remove all the given keys, returning how many of them existed.
    async fn del(&self, keys: &[String]) -> Result<u64, EngineError>;

    /// Return one page of keys matching `pattern`, starting at `cursor`.
    ///
    /// The returned cursor is `0` once the iteration is complete.
    /// `count` is a hint for the page size.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), EngineError>;
}

/// Errors that can occur when talking to the key-value cache.
pub mod errors {
    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The key-value cache could not serve a request.
    pub enum EngineError {
        /// The engine failed or could not be reached.
        #[error("The key-value cache failed to serve the request.")]
        Unavailable(#[source] anyhow::Error),
        /// The engine didn't reply within the configured operation timeout.
        #[error("The key-value cache didn't reply within {0:?}.")]
        Timeout(std::time::Duration),
    }

    impl EngineError {
        /// Wrap an arbitrary engine failure.
        pub fn unavailable<E>(e: E) -> Self
        where
            E: Into<anyhow::Error>,
        {
            Self::Unavailable(e.into())
        }
    }
}
