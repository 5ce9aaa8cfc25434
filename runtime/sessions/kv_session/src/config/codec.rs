use biscotti::config::CryptoAlgorithm;

#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Configure the keys used to sign (or encrypt) session cookies.
///
/// It's the configuration counterpart of
/// [`SecureCookieCodec`](crate::codec::SecureCookieCodec).
pub struct SecureCookieConfig {
    /// The names of the session cookies that must be protected.
    ///
    /// Default is `["session"]`.
    #[serde(default = "default_cookie_names")]
    pub cookie_names: Vec<String>,
    /// The keys used to protect session cookies, most recent first.
    ///
    /// New cookies are always produced with the first key.
    /// Older keys are only used to decode cookies that were issued
    /// before a key rotation.
    #[serde(default)]
    pub keys: Vec<CookieKeyConfig>,
    /// Cookies whose timestamp is older than this are rejected.
    ///
    /// Set it to `0s` to disable the check.
    ///
    /// Default is 30 days.
    #[serde(with = "humantime_serde", default = "default_max_age")]
    pub max_age: std::time::Duration,
}

impl Default for SecureCookieConfig {
    fn default() -> Self {
        Self {
            cookie_names: default_cookie_names(),
            keys: Vec::new(),
            max_age: default_max_age(),
        }
    }
}

impl std::fmt::Debug for SecureCookieConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCookieConfig")
            .field("cookie_names", &self.cookie_names)
            .field("keys", &self.keys.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

fn default_cookie_names() -> Vec<String> {
    vec!["session".to_owned()]
}

pub(crate) fn default_max_age() -> std::time::Duration {
    std::time::Duration::from_secs(60 * 60 * 24 * 30)
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// A master key, encoded using standard base64, and the way it protects cookies.
pub struct CookieKeyConfig {
    /// The key material. It must be at least 32 bytes long once decoded.
    pub key: String,
    /// Whether cookie values are signed or encrypted.
    ///
    /// Default is `Signing`.
    #[serde(default = "default_algorithm")]
    pub algorithm: CryptoAlgorithm,
}

impl CookieKeyConfig {
    /// Build a key configuration from base64-encoded key material.
    pub fn new(key: impl Into<String>, algorithm: CryptoAlgorithm) -> Self {
        Self {
            key: key.into(),
            algorithm,
        }
    }
}

fn default_algorithm() -> CryptoAlgorithm {
    CryptoAlgorithm::Signing
}
