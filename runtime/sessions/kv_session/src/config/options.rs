use biscotti::{RemovalCookie, ResponseCookie, SameSite};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Cookie attributes and server-side lifetime of a session.
///
/// The store holds a default set of options; every session gets its own copy
/// when it's created, which can then be tweaked before saving.
pub struct SessionOptions {
    /// Set the `Path` attribute on the session cookie.
    ///
    /// By default, the attribute is set to `/`.
    #[serde(default = "default_path")]
    pub path: Option<String>,
    /// Set the `Domain` attribute on the session cookie.
    ///
    /// By default, the attribute is not set.
    #[serde(default)]
    pub domain: Option<String>,
    /// The lifetime of the session, in seconds.
    ///
    /// It's used both as the `Max-Age` attribute of the cookie and as the
    /// time-to-live of the server-side record.
    /// A value lower than or equal to zero marks the session for deletion:
    /// saving it will remove the record and instruct the client to drop the cookie.
    ///
    /// Default is `4096`.
    #[serde(default = "default_max_age")]
    pub max_age: i64,
    /// Set the `Secure` attribute on the session cookie.
    ///
    /// Default is `false`.
    #[serde(default)]
    pub secure: bool,
    /// Set the `HttpOnly` attribute on the session cookie.
    ///
    /// Default is `false`.
    #[serde(default)]
    pub http_only: bool,
    /// Set the [`SameSite`] attribute on the session cookie.
    ///
    /// By default, the attribute is not set.
    #[serde(default, with = "same_site")]
    pub same_site: Option<SameSite>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
            domain: None,
            max_age: default_max_age(),
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

fn default_path() -> Option<String> {
    Some("/".to_string())
}

fn default_max_age() -> i64 {
    4096
}

impl SessionOptions {
    /// Returns `true` if saving a session with these options deletes it.
    pub fn marks_for_deletion(&self) -> bool {
        self.max_age <= 0
    }

    /// Build a cookie carrying `value`, decorated with these attributes.
    pub(crate) fn cookie(&self, name: &str, value: String) -> ResponseCookie<'static> {
        let mut cookie = ResponseCookie::new(name.to_owned(), value);
        if let Some(domain) = self.domain.as_deref() {
            cookie = cookie.set_domain(domain.to_owned());
        }
        if let Some(path) = self.path.as_deref() {
            cookie = cookie.set_path(path.to_owned());
        }
        if let Some(same_site) = self.same_site {
            cookie = cookie.set_same_site(same_site);
        }
        if self.secure {
            cookie = cookie.set_secure(true);
        }
        if self.http_only {
            cookie = cookie.set_http_only(true);
        }
        cookie.set_max_age(time::Duration::seconds(self.max_age))
    }

    /// Build a cookie instructing the client to drop the cookie named `name`.
    ///
    /// `Path` and `Domain` must match the ones used when the cookie was set,
    /// otherwise the client will keep it.
    pub(crate) fn removal_cookie(&self, name: &str) -> ResponseCookie<'static> {
        let mut cookie = RemovalCookie::new(name.to_owned());
        if let Some(domain) = self.domain.as_deref() {
            cookie = cookie.set_domain(domain.to_owned());
        }
        if let Some(path) = self.path.as_deref() {
            cookie = cookie.set_path(path.to_owned());
        }
        cookie.into()
    }
}

// Deserialization and serialization routines for `same_site` attribute.
mod same_site {
    use biscotti::SameSite;
    use serde::{Deserializer, Serializer, de};
    use std::fmt;

    pub fn serialize<S>(value: &Option<SameSite>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(same_site) => serializer.serialize_some(match same_site {
                SameSite::Strict => "Strict",
                SameSite::Lax => "Lax",
                SameSite::None => "None",
            }),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SameSite>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SameSiteVisitor;

        impl<'de> de::Visitor<'de> for SameSiteVisitor {
            type Value = Option<SameSite>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("one of `Strict`, `Lax`, `None`, or null")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match value.to_ascii_lowercase().as_str() {
                    "strict" => Ok(Some(SameSite::Strict)),
                    "lax" => Ok(Some(SameSite::Lax)),
                    "none" => Ok(Some(SameSite::None)),
                    _ => Err(de::Error::unknown_variant(
                        value,
                        &["Strict", "Lax", "None"],
                    )),
                }
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(self)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(None)
            }
        }

        deserializer.deserialize_option(SameSiteVisitor)
    }
}
