use super::SessionOptions;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure how session records are laid out in the key-value cache.
pub struct StoreConfig {
    /// The prefix prepended to every session id to build its cache key.
    ///
    /// By default, it's set to `session_`.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// The options copied into every new session.
    #[serde(default)]
    pub options: SessionOptions,
    /// The maximum size, in bytes, of a serialized session record.
    ///
    /// Saving a larger record fails and leaves the cache untouched.
    /// Set it to `0` to disable the check.
    ///
    /// Default is `4096`.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// How many keys to ask for on every `SCAN` round-trip when
    /// enumerating sessions.
    ///
    /// It's a hint: the engine may return more or fewer keys per page.
    ///
    /// Default is `100`.
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    /// Upper bound on the duration of every call to the key-value cache.
    ///
    /// When set, a call that takes longer is abandoned and reported as
    /// [`EngineError::Timeout`](crate::client::errors::EngineError::Timeout).
    ///
    /// By default, no timeout is applied.
    #[serde(default, with = "humantime_serde")]
    pub operation_timeout: Option<std::time::Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            options: SessionOptions::default(),
            max_length: default_max_length(),
            scan_count: default_scan_count(),
            operation_timeout: None,
        }
    }
}

fn default_key_prefix() -> String {
    "session_".to_string()
}

fn default_max_length() -> usize {
    4096
}

fn default_scan_count() -> usize {
    100
}
