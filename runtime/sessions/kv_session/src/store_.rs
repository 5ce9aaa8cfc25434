use biscotti::{RequestCookies, ResponseCookies};
use futures_util::{
    future,
    stream::{BoxStream, StreamExt, TryStreamExt},
};
use tracing_log_error::log_error;

use crate::{
    Session, SessionId, SessionRegistry,
    client::{KeyValueClient, errors::EngineError},
    codec::CookieCodec,
    config::{SessionOptions, StoreConfig},
    records::SessionRecords,
    serializer::{JsonSerializer, SessionSerializer, SessionValues},
};
use errors::{
    ConnectError, DeleteError, GetAllError, LoadError, NewSessionError, NewSessionErrorReason,
    SaveError, UpdateError,
};

/// Server-side sessions, stored in a Redis-like key-value cache.
///
/// The store maps every session to a record in the cache (see [`SessionRecords`])
/// and hands out signed cookies pointing to those records (see [`CookieCodec`]).
/// It holds no session state in memory: every request rebuilds its sessions
/// from the incoming cookies via [`SessionStore::new_session`] (or through a
/// [`SessionRegistry`]) and writes them back via [`SessionStore::save`].
///
/// # Concurrency
///
/// There is no locking. If two requests load and save the same session
/// concurrently, the last save wins.
#[derive(Debug)]
pub struct SessionStore {
    records: SessionRecords,
    codec: Box<dyn CookieCodec>,
    serializer: Box<dyn SessionSerializer>,
    options: SessionOptions,
}

impl SessionStore {
    /// Creates a new session store on top of `client`.
    ///
    /// Session values are serialized as JSON; use [`SessionStore::set_serializer`]
    /// to pick a different format.
    pub fn new<Client, Codec>(client: Client, config: &StoreConfig, codec: Codec) -> Self
    where
        Client: KeyValueClient + 'static,
        Codec: CookieCodec + 'static,
    {
        Self {
            records: SessionRecords::new(client, config),
            codec: Box::new(codec),
            serializer: Box::new(JsonSerializer),
            options: config.options.clone(),
        }
    }

    /// Creates a new session store on top of `client`, after checking
    /// that the key-value cache is reachable.
    pub async fn connect<Client, Codec>(
        client: Client,
        config: &StoreConfig,
        codec: Codec,
    ) -> Result<Self, ConnectError>
    where
        Client: KeyValueClient + 'static,
        Codec: CookieCodec + 'static,
    {
        let store = Self::new(client, config, codec);
        match store.ping().await {
            Ok(true) => Ok(store),
            Ok(false) => Err(ConnectError::UnexpectedPingReply),
            Err(e) => Err(ConnectError::Engine(e)),
        }
    }

    /// Check that the key-value cache is alive.
    pub async fn ping(&self) -> Result<bool, EngineError> {
        self.records.ping().await
    }

    /// Start tracking the sessions of a single request.
    pub fn registry(&self) -> SessionRegistry<'_> {
        SessionRegistry::new(self)
    }

    /// Build the session named `name` for the current request.
    ///
    /// The session starts with a copy of the store's default options.
    /// If the request carries a cookie named `name`, its value is decoded to
    /// recover the session id and the matching record is loaded.
    /// The session is flagged as [new](Session::is_new) unless a record was found.
    ///
    /// An invalid cookie or a failed load doesn't leave you empty-handed:
    /// the error carries a usable session, see [`NewSessionError::into_session`].
    /// If the cookie was invalid, it's a fresh session without an id.
    /// If the record couldn't be loaded, it keeps the id from the cookie but
    /// none of the stored values: saving it overwrites the record.
    #[tracing::instrument(name = "Build session from request", level = tracing::Level::DEBUG, skip_all, fields(session.name = name))]
    pub async fn new_session(
        &self,
        cookies: &RequestCookies<'_>,
        name: &str,
    ) -> Result<Session, NewSessionError> {
        let mut session = Session::new(name.to_owned(), self.options.clone());
        let Some(cookie) = cookies.get(name) else {
            return Ok(session);
        };
        let id = match self.codec.decode(name, cookie.value()) {
            Ok(id) => SessionId::from(id),
            Err(e) => {
                return Err(NewSessionError {
                    session,
                    reason: NewSessionErrorReason::CookieDecode(e),
                });
            }
        };
        if id.is_empty() {
            return Ok(session);
        }
        session.set_id(id);
        match self.load(&mut session).await {
            Ok(true) => {
                session.mark_as_loaded();
                Ok(session)
            }
            Ok(false) => Ok(session),
            Err(e) => Err(NewSessionError {
                session,
                reason: NewSessionErrorReason::Load(e),
            }),
        }
    }

    /// Persist `session` and attach the matching cookie to `cookies`.
    ///
    /// - If the session's `max_age` is not positive, its record is deleted and a
    ///   removal cookie is attached instead.
    /// - Otherwise, an id is generated if the session doesn't have one yet,
    ///   the record is written with a time-to-live of `max_age` seconds, and the
    ///   (signed) id is attached as a cookie.
    ///
    /// No cookie is attached if an error occurs.
    #[tracing::instrument(name = "Save session", level = tracing::Level::DEBUG, skip_all, fields(session.name = session.name()))]
    pub async fn save(
        &self,
        cookies: &mut ResponseCookies<'static>,
        session: &mut Session,
    ) -> Result<(), SaveError> {
        if session.options().marks_for_deletion() {
            self.remove_record(session)
                .await
                .map_err(SaveError::Deletion)?;
            cookies.insert(session.options().removal_cookie(session.name()));
            return Ok(());
        }

        if session.id().is_empty() {
            session.set_id(SessionId::random());
        }
        let payload = self
            .serializer
            .serialize(session.values())
            .map_err(SaveError::Serialization)?;
        self.records
            .save(session.id(), &payload, session.options().max_age)
            .await?;
        let value = self
            .codec
            .encode(session.name(), session.id().as_str())
            .map_err(SaveError::CookieEncoding)?;
        cookies.insert(session.options().cookie(session.name(), value));
        Ok(())
    }

    /// Persist `session` without touching cookies.
    ///
    /// Use it when the client already holds a valid cookie for this session.
    /// It follows the same deletion rule as [`SessionStore::save`], but it will
    /// never generate an id: updating a session that was never saved fails.
    #[tracing::instrument(name = "Update session", level = tracing::Level::DEBUG, skip_all, fields(session.name = session.name()))]
    pub async fn update(&self, session: &Session) -> Result<(), UpdateError> {
        if session.options().marks_for_deletion() {
            return self
                .remove_record(session)
                .await
                .map_err(UpdateError::Deletion);
        }
        let payload = self
            .serializer
            .serialize(session.values())
            .map_err(UpdateError::Serialization)?;
        self.records
            .save(session.id(), &payload, session.options().max_age)
            .await?;
        Ok(())
    }

    /// Delete the record behind `session`, instruct the client to drop
    /// the cookie and clear the session values.
    #[tracing::instrument(name = "Delete session", level = tracing::Level::DEBUG, skip_all, fields(session.name = session.name()))]
    pub async fn delete(
        &self,
        cookies: &mut ResponseCookies<'static>,
        session: &mut Session,
    ) -> Result<(), DeleteError> {
        self.remove_record(session).await?;
        cookies.insert(session.options().removal_cookie(session.name()));
        session.values_mut().clear();
        Ok(())
    }

    /// Delete the records for all the given session ids in one round-trip.
    ///
    /// Ids that already start with the key prefix are used as they are.
    /// Cookies held by clients are left untouched: they'll point to
    /// a missing record from now on.
    #[tracing::instrument(name = "Delete sessions by id", level = tracing::Level::DEBUG, skip_all)]
    pub async fn delete_by_id<I, S>(&self, ids: I) -> Result<(), DeleteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefix = self.records.key_prefix();
        let keys: Vec<String> = ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref();
                if id.starts_with(prefix) {
                    id.to_owned()
                } else {
                    format!("{prefix}{id}")
                }
            })
            .collect();
        self.records.delete(&keys).await?;
        Ok(())
    }

    /// Retrieve every live session.
    ///
    /// See [`SessionStore::stream_all`] for the details.
    pub async fn get_all(&self) -> Result<Vec<Session>, GetAllError> {
        self.stream_all().try_collect().await
    }

    /// Enumerate every live session, lazily.
    ///
    /// Sessions are returned with the store's current default options, an
    /// empty name and [`Session::is_new`] set to `false`.
    /// Records that can't be deserialized are logged and skipped.
    /// The enumeration stops at the first engine error.
    pub fn stream_all(&self) -> BoxStream<'_, Result<Session, GetAllError>> {
        self.records
            .scan_all()
            .map_err(GetAllError::Engine)
            .try_filter_map(move |(key, payload)| {
                future::ready(Ok(self.decode_record(&key, &payload)))
            })
            .boxed()
    }

    /// The prefix shared by the cache keys of all sessions.
    pub fn key_prefix(&self) -> &str {
        self.records.key_prefix()
    }

    /// Change the prefix used to build cache keys.
    ///
    /// Records stored under the previous prefix become unreachable.
    pub fn set_key_prefix(&mut self, key_prefix: impl Into<String>) {
        self.records.set_key_prefix(key_prefix.into());
    }

    /// The options copied into every new session.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Change the options copied into every new session.
    ///
    /// Sessions that were already built keep their own copy.
    pub fn set_options(&mut self, options: SessionOptions) {
        self.options = options;
    }

    /// Change the `max_age` copied into every new session, in seconds.
    ///
    /// Sessions that were already built keep their own copy.
    pub fn set_max_age(&mut self, max_age: i64) {
        self.options.max_age = max_age;
    }

    /// The maximum size of a serialized session, in bytes. `0` means unbounded.
    pub fn max_length(&self) -> usize {
        self.records.max_length()
    }

    /// Change the maximum size of a serialized session. `0` disables the check.
    pub fn set_max_length(&mut self, max_length: usize) {
        self.records.set_max_length(max_length);
    }

    /// The serializer used for session values.
    pub fn serializer(&self) -> &dyn SessionSerializer {
        self.serializer.as_ref()
    }

    /// Change the serializer used for session values.
    ///
    /// Existing records are not converted.
    pub fn set_serializer<Serializer>(&mut self, serializer: Serializer)
    where
        Serializer: SessionSerializer + 'static,
    {
        self.serializer = Box::new(serializer);
    }

    /// The underlying key-value client.
    pub fn client(&self) -> &dyn KeyValueClient {
        self.records.client()
    }

    /// The session records managed by this store.
    pub fn records(&self) -> &SessionRecords {
        &self.records
    }

    /// Fill `session` with its persisted values.
    ///
    /// Returns `false` if there is no record for it.
    async fn load(&self, session: &mut Session) -> Result<bool, LoadError> {
        let Some(payload) = self.records.load(session.id()).await? else {
            return Ok(false);
        };
        self.serializer
            .deserialize(&payload, session.values_mut())?;
        Ok(true)
    }

    async fn remove_record(&self, session: &Session) -> Result<(), EngineError> {
        if session.id().is_empty() {
            tracing::trace!("The session was never persisted, there is no record to delete");
            return Ok(());
        }
        self.records.delete(&[self.records.key(session.id())]).await
    }

    fn decode_record(&self, key: &str, payload: &[u8]) -> Option<Session> {
        let id = key.strip_prefix(self.key_prefix()).unwrap_or(key);
        let mut values = SessionValues::new();
        if let Err(e) = self.serializer.deserialize(payload, &mut values) {
            log_error!(
                e,
                level: tracing::Level::WARN,
                session.key = key,
                "Skipping a session record that can't be deserialized"
            );
            return None;
        }
        Some(Session::from_record(
            SessionId::from(id),
            String::new(),
            values,
            self.options.clone(),
        ))
    }
}

/// Errors that can occur when managing sessions.
pub mod errors {
    use crate::{
        Session,
        client::errors::EngineError,
        codec::errors::CodecError,
        records::errors::{LoadRecordError, SaveRecordError},
        serializer::errors::SerializerError,
    };

    #[derive(Debug, thiserror::Error)]
    #[error("Failed to recover the session from the incoming request.")]
    /// The error returned by [`SessionStore::new_session`][super::SessionStore::new_session].
    ///
    /// It carries an empty session that can be used in place of the one
    /// that couldn't be recovered.
    /// It has no id if the cookie couldn't be decoded, while it keeps the
    /// decoded id if the record couldn't be loaded.
    pub struct NewSessionError {
        pub(crate) session: Session,
        #[source]
        pub(crate) reason: NewSessionErrorReason,
    }

    impl NewSessionError {
        /// The empty session built in place of the one that couldn't be recovered.
        pub fn session(&self) -> &Session {
            &self.session
        }

        /// Take the empty session built in place of the one that couldn't be recovered.
        pub fn into_session(self) -> Session {
            self.session
        }

        /// What went wrong.
        pub fn reason(&self) -> &NewSessionErrorReason {
            &self.reason
        }
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// Why a session couldn't be recovered from the incoming request.
    pub enum NewSessionErrorReason {
        /// The session cookie is invalid: tampered with, expired or signed with an unknown key.
        #[error("Failed to decode the session cookie.")]
        CookieDecode(#[source] CodecError),
        /// The session record could not be loaded.
        #[error(transparent)]
        Load(LoadError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The session record could not be loaded.
    pub enum LoadError {
        #[error(transparent)]
        /// The key-value cache failed.
        Record(#[from] LoadRecordError),
        #[error("Failed to deserialize the session record.")]
        /// The record exists, but it can't be deserialized.
        Deserialization(#[from] SerializerError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::save`][super::SessionStore::save].
    pub enum SaveError {
        #[error("Failed to serialize the session values.")]
        /// Failed to serialize the session values.
        Serialization(#[source] SerializerError),
        #[error(transparent)]
        /// Failed to write the session record.
        Record(#[from] SaveRecordError),
        #[error("Failed to delete the session record.")]
        /// Failed to delete the record of a session marked for deletion.
        Deletion(#[source] EngineError),
        #[error("Failed to encode the session cookie.")]
        /// Failed to encode the session cookie.
        CookieEncoding(#[source] CodecError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::update`][super::SessionStore::update].
    pub enum UpdateError {
        #[error("Failed to serialize the session values.")]
        /// Failed to serialize the session values.
        Serialization(#[source] SerializerError),
        #[error(transparent)]
        /// Failed to write the session record.
        Record(#[from] SaveRecordError),
        #[error("Failed to delete the session record.")]
        /// Failed to delete the record of a session marked for deletion.
        Deletion(#[source] EngineError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::delete`][super::SessionStore::delete]
    /// and [`SessionStore::delete_by_id`][super::SessionStore::delete_by_id].
    pub enum DeleteError {
        #[error("Failed to delete the session records.")]
        /// The key-value cache failed.
        Engine(#[from] EngineError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::get_all`][super::SessionStore::get_all]
    /// and [`SessionStore::stream_all`][super::SessionStore::stream_all].
    pub enum GetAllError {
        #[error("Failed to enumerate the session records.")]
        /// The key-value cache failed.
        Engine(#[source] EngineError),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStore::connect`][super::SessionStore::connect].
    pub enum ConnectError {
        #[error("The key-value cache didn't reply to PING.")]
        /// The key-value cache could not be reached.
        Engine(#[source] EngineError),
        #[error("The key-value cache replied to PING with something other than PONG.")]
        /// The engine replied, but not with `PONG`.
        UnexpectedPingReply,
    }
}
