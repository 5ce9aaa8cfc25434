/*!
Server-side sessions stored in a Redis-like key-value cache.

# Anatomy of a session

The client only ever sees a cookie holding the **session id**, signed or
encrypted by a [`CookieCodec`](codec::CookieCodec).
The **session values** live server-side, in a key-value cache, under
`<key_prefix><session id>`, with a time-to-live matching the session `max_age`.

A session goes through the following lifecycle:

- [`SessionStore::new_session`] decodes the incoming cookie, if any, and loads the
  matching record. Without a valid cookie, or without a record, you get a fresh session.
- The application reads and mutates the session values.
- [`SessionStore::save`] persists the values and attaches the session cookie to
  the response. If the session `max_age` is not positive, the record is deleted
  and the client is told to drop the cookie instead.

Records expire on their own once their time-to-live elapses.

# Key-value cache

The store only relies on a handful of commands (`GET`, `SETEX`, `DEL`, `SCAN`, `PING`),
captured by the [`KeyValueClient`](client::KeyValueClient) trait.
Check out `kv_session_redis` for a Redis-backed implementation and
`kv_session_memory_store` for an in-process one, geared towards testing.
*/
pub mod client;
pub mod codec;
pub mod config;
mod id;
mod records;
mod registry;
pub mod serializer;
mod session_;
mod store_;

pub use id::SessionId;
pub use records::SessionRecords;
pub use registry::SessionRegistry;
pub use session_::{DEFAULT_FLASH_KEY, Session};
pub use store_::SessionStore;

pub mod store {
    //! Types related to [`SessionStore`][super::SessionStore] and [`SessionRecords`][super::SessionRecords].
    pub use crate::store_::errors;

    pub mod records {
        //! Errors returned by [`SessionRecords`][crate::SessionRecords].
        pub use crate::records::errors;
    }
}

pub mod state {
    //! Types to manipulate the values attached to a session.
    pub use crate::serializer::SessionValues;
    pub use crate::session_::errors;
}
