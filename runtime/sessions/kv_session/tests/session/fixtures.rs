use std::{sync::Arc, time::Duration};

use biscotti::{Key, RequestCookie, RequestCookies};
use kv_session::{
    SessionId, SessionStore,
    client::{KeyValueClient, errors::EngineError},
    codec::{CookieCodec, CookieKey, SecureCookieCodec},
    config::StoreConfig,
    state::SessionValues,
};
use kv_session_memory_store::InMemoryKeyValueClient;
use tokio::sync::Mutex;

/// The session name used throughout the test suite.
pub const SESSION_NAME: &str = "session";

/// The cookie names the test codec protects.
pub const COOKIE_NAMES: [&str; 2] = [SESSION_NAME, "cart"];

/// The key material behind [`codec`].
pub fn test_key() -> Key {
    Key::from(vec![0x42; 64])
}

/// The codec shared by every store built in the test suite.
///
/// It encrypts.
pub fn codec() -> SecureCookieCodec {
    SecureCookieCodec::new(COOKIE_NAMES, vec![CookieKey::encryption(test_key())]).unwrap()
}

/// An empty in-memory session store.
pub fn store() -> SessionStore {
    store_with(&StoreConfig::default())
}

/// An empty in-memory session store, using the given configuration.
pub fn store_with(config: &StoreConfig) -> SessionStore {
    SessionStore::new(InMemoryKeyValueClient::new(), config, codec())
}

/// An empty in-memory session store, alongside a handle to the
/// underlying client to inspect the cache directly.
pub fn store_and_client() -> (SessionStore, InMemoryKeyValueClient) {
    let client = InMemoryKeyValueClient::new();
    let store = SessionStore::new(client.clone(), &StoreConfig::default(), codec());
    (store, client)
}

/// An empty in-memory session store, with a mechanism to inspect
/// what commands were sent to it.
pub fn spy_store() -> (SessionStore, CallTracker) {
    spy_store_with(&StoreConfig::default())
}

pub fn spy_store_with(config: &StoreConfig) -> (SessionStore, CallTracker) {
    let spy_client = SpyClient::new(InMemoryKeyValueClient::new());
    let call_tracker = spy_client.call_tracker();
    (SessionStore::new(spy_client, config, codec()), call_tracker)
}

/// A helper to set up a pre-existing session.
pub struct SessionFixture {
    pub id: SessionId,
    pub values: SessionValues,
    /// If `None`, no record will be written: the cookie will point to a missing record.
    pub ttl: Option<i64>,
}

impl Default for SessionFixture {
    fn default() -> Self {
        Self {
            id: SessionId::random(),
            values: SessionValues::new(),
            ttl: Some(1000),
        }
    }
}

impl SessionFixture {
    /// Write the record (if any) and return the request cookies
    /// a client holding this session would send.
    pub async fn setup(&self, store: &SessionStore) -> RequestCookies<'static> {
        if let Some(ttl) = self.ttl {
            let payload = store.serializer().serialize(&self.values).unwrap();
            store
                .records()
                .save(&self.id, &payload, ttl)
                .await
                .expect("Failed to write the record for the session fixture");
        }
        let value = codec().encode(SESSION_NAME, self.id.as_str()).unwrap();
        let mut cookies = RequestCookies::new();
        cookies.append(RequestCookie::new(SESSION_NAME, value));
        cookies
    }

    pub fn key(&self) -> String {
        format!("session_{}", self.id)
    }
}

/// A wrapper that keeps track of which commands have been sent
/// to the underlying key-value client.
#[derive(Debug)]
pub struct SpyClient<C> {
    client: C,
    call_tracker: CallTracker,
}

impl<C> SpyClient<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            call_tracker: Default::default(),
        }
    }

    pub fn call_tracker(&self) -> CallTracker {
        self.call_tracker.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallTracker(Arc<Mutex<CallInformation>>);

impl CallTracker {
    pub async fn assert_store_was_untouched(&self) {
        let info = self.0.lock().await;
        assert!(
            info.oplog.is_empty(),
            "The key-value cache was supposed to be untouched, but at least one command has been sent to it. Operation log:\n  - {}",
            info.oplog.join("\n  - ")
        )
    }

    pub async fn assert_never_loaded(&self) {
        assert!(
            !self.0.lock().await.has_invoked_get,
            "The store tried to fetch a session record"
        )
    }

    pub async fn operation_log(&self) -> Vec<String> {
        self.0.lock().await.oplog.clone()
    }

    pub async fn reset(&self) {
        *self.0.lock().await = CallInformation::default();
    }

    async fn push_operation(&self, op: impl Into<String>) {
        self.0.lock().await.oplog.push(op.into());
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallInformation {
    has_invoked_get: bool,
    oplog: Vec<String>,
}

#[async_trait::async_trait]
impl<C: KeyValueClient> KeyValueClient for SpyClient<C> {
    async fn ping(&self) -> Result<String, EngineError> {
        self.call_tracker.push_operation("ping").await;
        self.client.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        self.call_tracker.push_operation(format!("get {key}")).await;
        self.call_tracker.0.lock().await.has_invoked_get = true;
        self.client.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), EngineError> {
        self.call_tracker
            .push_operation(format!("setex {key} {ttl_seconds}"))
            .await;
        self.client.set_ex(key, value, ttl_seconds).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, EngineError> {
        self.call_tracker
            .push_operation(format!("del {}", keys.join(" ")))
            .await;
        self.client.del(keys).await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), EngineError> {
        self.call_tracker
            .push_operation(format!("scan {cursor} {pattern} {count}"))
            .await;
        self.client.scan(cursor, pattern, count).await
    }
}

/// A key-value client whose every command fails.
///
/// If `ping_reply` is set, `PING` succeeds with that reply.
#[derive(Debug, Default)]
pub struct FailingClient {
    pub ping_reply: Option<String>,
}

impl FailingClient {
    fn failure() -> EngineError {
        EngineError::unavailable(anyhow::anyhow!("Connection refused"))
    }
}

#[async_trait::async_trait]
impl KeyValueClient for FailingClient {
    async fn ping(&self) -> Result<String, EngineError> {
        self.ping_reply.clone().ok_or_else(Self::failure)
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Err(Self::failure())
    }

    async fn set_ex(
        &self,
        _key: &str,
        _value: &[u8],
        _ttl_seconds: u64,
    ) -> Result<(), EngineError> {
        Err(Self::failure())
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, EngineError> {
        Err(Self::failure())
    }

    async fn scan(
        &self,
        _cursor: u64,
        _pattern: &str,
        _count: usize,
    ) -> Result<(u64, Vec<String>), EngineError> {
        Err(Self::failure())
    }
}

/// A key-value client whose `GET`s fail, while every other command
/// is forwarded to `client`.
#[derive(Debug, Default)]
pub struct UnreadableClient {
    pub client: InMemoryKeyValueClient,
}

#[async_trait::async_trait]
impl KeyValueClient for UnreadableClient {
    async fn ping(&self) -> Result<String, EngineError> {
        self.client.ping().await
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Err(FailingClient::failure())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), EngineError> {
        self.client.set_ex(key, value, ttl_seconds).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, EngineError> {
        self.client.del(keys).await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), EngineError> {
        self.client.scan(cursor, pattern, count).await
    }
}

/// A key-value client that takes `delay` to answer every command.
#[derive(Debug, Default)]
pub struct SlowClient {
    pub delay: Duration,
    pub client: InMemoryKeyValueClient,
}

#[async_trait::async_trait]
impl KeyValueClient for SlowClient {
    async fn ping(&self) -> Result<String, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.client.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.client.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), EngineError> {
        tokio::time::sleep(self.delay).await;
        self.client.set_ex(key, value, ttl_seconds).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.client.del(keys).await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), EngineError> {
        tokio::time::sleep(self.delay).await;
        self.client.scan(cursor, pattern, count).await
    }
}
