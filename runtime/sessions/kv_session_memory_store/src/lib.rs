//! An in-memory key-value cache for `kv_session`, geared towards testing and local development.
use jiff::Timestamp;
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;

use kv_session::client::{KeyValueClient, errors::EngineError};

#[derive(Clone, Default)]
/// An in-memory key-value cache.
///
/// It mimics the semantics of the Redis commands used by `kv_session`,
/// including key expiration and cursor-based `SCAN`.
///
/// # Limitations
///
/// This store won't persist data between server restarts.
/// It also won't synchronize data between multiple server instances.
/// It is primarily intended for testing and local development.
pub struct InMemoryKeyValueClient(Arc<Mutex<State>>);

impl std::fmt::Debug for InMemoryKeyValueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyValueClient")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, StoreEntry>,
    /// The last key visited by each in-flight `SCAN`, indexed by cursor.
    ///
    /// A `SCAN` resumes strictly after that key, so keys added or removed
    /// between two pages never shift the keys that are yet to be visited.
    cursors: HashMap<u64, String>,
    last_cursor: u64,
}

impl State {
    fn get_if_fresh(&mut self, key: &str) -> Option<&StoreEntry> {
        if self.entries.get(key).is_some_and(StoreEntry::is_stale) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn register_cursor(&mut self, last_visited: String) -> u64 {
        self.last_cursor += 1;
        self.cursors.insert(self.last_cursor, last_visited);
        self.last_cursor
    }
}

#[derive(Debug)]
struct StoreEntry {
    value: Vec<u8>,
    deadline: Timestamp,
}

impl StoreEntry {
    fn is_stale(&self) -> bool {
        self.deadline <= Timestamp::now()
    }
}

impl InMemoryKeyValueClient {
    /// Creates a new (empty) in-memory key-value cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The remaining time-to-live of `key`, if it exists.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut guard = self.0.lock().await;
        let entry = guard.get_if_fresh(key)?;
        (entry.deadline - Timestamp::now()).try_into().ok()
    }
}

#[async_trait::async_trait]
impl KeyValueClient for InMemoryKeyValueClient {
    async fn ping(&self) -> Result<String, EngineError> {
        Ok("PONG".into())
    }

    #[tracing::instrument(name = "GET", level = tracing::Level::TRACE, skip_all)]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let mut guard = self.0.lock().await;
        Ok(guard.get_if_fresh(key).map(|entry| entry.value.clone()))
    }

    #[tracing::instrument(name = "SETEX", level = tracing::Level::TRACE, skip_all)]
    async fn set_ex(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<(), EngineError> {
        if ttl_seconds == 0 {
            return Err(EngineError::unavailable(anyhow::anyhow!(
                "ERR invalid expire time in 'setex' command"
            )));
        }
        let mut guard = self.0.lock().await;
        guard.entries.insert(
            key.to_owned(),
            StoreEntry {
                value: value.to_vec(),
                deadline: Timestamp::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    #[tracing::instrument(name = "DEL", level = tracing::Level::TRACE, skip_all)]
    async fn del(&self, keys: &[String]) -> Result<u64, EngineError> {
        let mut guard = self.0.lock().await;
        let mut n_deleted = 0;
        for key in keys {
            if let Some(entry) = guard.entries.remove(key) {
                if !entry.is_stale() {
                    n_deleted += 1;
                }
            }
        }
        Ok(n_deleted)
    }

    #[tracing::instrument(name = "SCAN", level = tracing::Level::TRACE, skip_all)]
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), EngineError> {
        let mut guard = self.0.lock().await;
        let state = &mut *guard;
        state.entries.retain(|_, entry| !entry.is_stale());

        let start = match cursor {
            0 => Bound::Unbounded,
            cursor => match state.cursors.remove(&cursor) {
                Some(last_visited) => Bound::Excluded(last_visited),
                None => {
                    return Err(EngineError::unavailable(anyhow::anyhow!(
                        "ERR invalid cursor"
                    )));
                }
            },
        };
        let mut remaining = state
            .entries
            .range::<String, _>((start, Bound::Unbounded))
            .map(|(key, _)| key);
        let visited: Vec<String> = remaining.by_ref().take(count.max(1)).cloned().collect();
        let exhausted = remaining.next().is_none();

        let next = match visited.last() {
            Some(last_visited) if !exhausted => state.register_cursor(last_visited.clone()),
            _ => 0,
        };
        let page = visited
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect();
        Ok((next, page))
    }
}

/// Match `input` against a Redis-style glob pattern.
///
/// Supports `*`, `?` and backslash escapes.
fn glob_match(pattern: &str, input: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let input: Vec<char> = input.chars().collect();
    glob_match_from(&pattern, &input)
}

fn glob_match_from(pattern: &[char], input: &[char]) -> bool {
    match pattern.split_first() {
        None => input.is_empty(),
        Some(('*', rest)) => (0..=input.len()).any(|i| glob_match_from(rest, &input[i..])),
        Some(('?', rest)) => !input.is_empty() && glob_match_from(rest, &input[1..]),
        Some(('\\', rest)) if !rest.is_empty() => {
            input.first() == rest.first() && glob_match_from(&rest[1..], &input[1..])
        }
        Some((c, rest)) => input.first() == Some(c) && glob_match_from(rest, &input[1..]),
    }
}
