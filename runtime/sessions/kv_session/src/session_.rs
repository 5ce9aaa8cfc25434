use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{SessionId, config::SessionOptions, serializer::SessionValues};
use errors::{ValueDeserializationError, ValueSerializationError};

/// The key flash messages are stored under, unless a different one is specified.
pub const DEFAULT_FLASH_KEY: &str = "_flash";

/// The state of a single user session.
///
/// Sessions are built by [`SessionStore::new_session`][crate::SessionStore::new_session]
/// for every incoming request, mutated by the application, and then written back
/// with [`SessionStore::save`][crate::SessionStore::save].
/// Nothing is persisted until the session is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: SessionId,
    name: String,
    values: SessionValues,
    options: SessionOptions,
    is_new: bool,
}

impl Session {
    /// A fresh session: no id, no values.
    pub(crate) fn new(name: String, options: SessionOptions) -> Self {
        Self {
            id: SessionId::default(),
            name,
            values: SessionValues::new(),
            options,
            is_new: true,
        }
    }

    /// A session rebuilt from a persisted record.
    pub(crate) fn from_record(
        id: SessionId,
        name: String,
        values: SessionValues,
        options: SessionOptions,
    ) -> Self {
        Self {
            id,
            name,
            values,
            options,
            is_new: false,
        }
    }

    /// The session identifier.
    ///
    /// It's empty until the session is saved for the first time,
    /// unless it was recovered from an incoming cookie.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The name of the cookie this session is stored under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` if this session has no persisted counterpart yet.
    ///
    /// It's the case if the client didn't send a session cookie,
    /// if the cookie was invalid, or if the record it pointed to
    /// doesn't exist anymore.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// The values attached to this session.
    pub fn values(&self) -> &SessionValues {
        &self.values
    }

    /// Mutable access to the values attached to this session.
    pub fn values_mut(&mut self) -> &mut SessionValues {
        &mut self.values
    }

    /// The cookie attributes and lifetime of this session.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Mutable access to the cookie attributes and lifetime of this session.
    ///
    /// Set [`SessionOptions::max_age`] to a non-positive value to delete
    /// the session on the next save.
    pub fn options_mut(&mut self) -> &mut SessionOptions {
        &mut self.options
    }

    pub(crate) fn set_id(&mut self, id: SessionId) {
        self.id = id;
    }

    pub(crate) fn mark_as_loaded(&mut self) {
        self.is_new = false;
    }

    /// Get the value associated with `key`.
    ///
    /// If the value is not found, `None` is returned.
    /// If the value is found, but it cannot be deserialized into the expected type, an error is returned.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ValueDeserializationError> {
        self.values
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|source| ValueDeserializationError {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Set a value for `key`.
    ///
    /// If a value was already associated with `key`, it'll be returned.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>, ValueSerializationError> {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(source) => return Err(ValueSerializationError { key, source }),
        };
        Ok(self.values.insert(key, value))
    }

    /// Remove the value associated with `key`, returning it if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Queue a flash message under [`DEFAULT_FLASH_KEY`].
    ///
    /// Flash messages are read once: see [`Session::flashes`].
    pub fn add_flash<T: Serialize>(&mut self, value: T) -> Result<(), ValueSerializationError> {
        self.add_flash_to(DEFAULT_FLASH_KEY, value)
    }

    /// Queue a flash message under `key`.
    pub fn add_flash_to<T: Serialize>(
        &mut self,
        key: &str,
        value: T,
    ) -> Result<(), ValueSerializationError> {
        let value = serde_json::to_value(value).map_err(|source| ValueSerializationError {
            key: key.to_owned(),
            source,
        })?;
        match self.values.get_mut(key) {
            Some(Value::Array(queue)) => queue.push(value),
            _ => {
                self.values.insert(key.to_owned(), Value::Array(vec![value]));
            }
        }
        Ok(())
    }

    /// Take all flash messages queued under [`DEFAULT_FLASH_KEY`].
    ///
    /// The queue is emptied: a second call returns nothing, unless new
    /// messages were added in between.
    pub fn flashes(&mut self) -> Vec<Value> {
        self.flashes_from(DEFAULT_FLASH_KEY)
    }

    /// Take all flash messages queued under `key`.
    pub fn flashes_from(&mut self, key: &str) -> Vec<Value> {
        match self.values.remove(key) {
            Some(Value::Array(queue)) => queue,
            Some(other) => vec![other],
            None => Vec::new(),
        }
    }
}

/// Errors that can occur when manipulating session values.
pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to deserialize the value associated with `{key}`")]
    /// The error returned by [`Session::get`][super::Session::get].
    pub struct ValueDeserializationError {
        /// The key of the value that we failed to deserialize.
        pub key: String,
        #[source]
        /// The underlying deserialization error.
        pub source: serde_json::Error,
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    #[error("Failed to serialize the value associated with `{key}`")]
    /// The error returned when inserting a value into a [`Session`][super::Session].
    pub struct ValueSerializationError {
        /// The key of the value that we failed to serialize.
        pub key: String,
        #[source]
        /// The underlying serialization error.
        pub source: serde_json::Error,
    }
}
