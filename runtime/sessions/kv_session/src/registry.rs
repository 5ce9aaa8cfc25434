use std::collections::{HashMap, hash_map::Entry};

use biscotti::{RequestCookies, ResponseCookies};

use crate::{
    Session, SessionStore,
    store::errors::{LoadError, NewSessionErrorReason, SaveError},
};

/// The sessions handed out while processing a single request.
///
/// Asking twice for the same session name returns the same [`Session`]:
/// the cookie is decoded and the record loaded only once.
/// Build one per request with [`SessionStore::registry`].
#[derive(Debug)]
pub struct SessionRegistry<'store> {
    store: &'store SessionStore,
    sessions: HashMap<String, Registered>,
}

#[derive(Debug)]
struct Registered {
    session: Session,
    error: Option<NewSessionErrorReason>,
}

impl<'store> SessionRegistry<'store> {
    pub(crate) fn new(store: &'store SessionStore) -> Self {
        Self {
            store,
            sessions: HashMap::new(),
        }
    }

    /// Get the session named `name`, building it on first access.
    ///
    /// If the session couldn't be recovered from the request, an empty session
    /// is returned together with the reason. The same reason is returned on
    /// every subsequent call for that name.
    pub async fn get(
        &mut self,
        cookies: &RequestCookies<'_>,
        name: &str,
    ) -> (&mut Session, Option<&NewSessionErrorReason>) {
        let registered = match self.sessions.entry(name.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let registered = match self.store.new_session(cookies, name).await {
                    Ok(session) => Registered {
                        session,
                        error: None,
                    },
                    Err(e) => Registered {
                        session: e.session,
                        error: Some(e.reason),
                    },
                };
                entry.insert(registered)
            }
        };
        (&mut registered.session, registered.error.as_ref())
    }

    /// Save every session handed out by this registry.
    ///
    /// Sessions whose record couldn't be fetched from the key-value cache are
    /// skipped, since their stored values were never loaded.
    /// Sessions whose record was fetched but couldn't be deserialized are
    /// saved, replacing the corrupted record.
    ///
    /// It stops at the first failure.
    pub async fn save_all(&mut self, cookies: &mut ResponseCookies<'static>) -> Result<(), SaveError> {
        for registered in self.sessions.values_mut() {
            if let Some(NewSessionErrorReason::Load(LoadError::Record(_))) = &registered.error {
                tracing::warn!(
                    session.name = registered.session.name(),
                    "Skipping a session whose record couldn't be fetched"
                );
                continue;
            }
            self.store.save(cookies, &mut registered.session).await?;
        }
        Ok(())
    }

    /// The number of sessions handed out so far.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if no session has been handed out yet.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
