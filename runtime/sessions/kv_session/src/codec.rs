//! Turn a session id into a tamper-proof cookie value, and back.
use std::collections::BTreeSet;

use base64::{Engine, engine::general_purpose::STANDARD};
use biscotti::{
    Key, Processor, ProcessorConfig, ResponseCookie,
    config::{CryptoAlgorithm, CryptoRule, FallbackConfig},
};

use crate::config::{SecureCookieConfig, default_cookie_max_age};
use errors::{CodecError, InvalidKeyError};

/// How far in the future a cookie timestamp may be before it's rejected.
const MAX_CLOCK_SKEW_SECONDS: i64 = 60;
const DEFAULT_MAX_LENGTH: usize = 4096;

/// Encode and decode cookie values.
///
/// The codec is given the cookie name alongside the value, so that a value
/// minted for one cookie can't be replayed under a different name.
pub trait CookieCodec: std::fmt::Debug + Send + Sync {
    /// Produce the cookie value carrying `value`.
    fn encode(&self, name: &str, value: &str) -> Result<String, CodecError>;

    /// Recover the value carried by the cookie `name`.
    fn decode(&self, name: &str, encoded: &str) -> Result<String, CodecError>;
}

#[derive(Debug, Clone)]
/// A master key, alongside the way it protects cookie values.
pub struct CookieKey {
    key: Key,
    algorithm: CryptoAlgorithm,
}

impl CookieKey {
    /// Cookie values are signed: clients can read them, but can't alter them.
    pub fn signing(key: Key) -> Self {
        Self {
            key,
            algorithm: CryptoAlgorithm::Signing,
        }
    }

    /// Cookie values are encrypted: clients can neither read nor alter them.
    pub fn encryption(key: Key) -> Self {
        Self {
            key,
            algorithm: CryptoAlgorithm::Encryption,
        }
    }

    /// Build a key from raw key material.
    ///
    /// The material must be at least 32 bytes long and it should be
    /// cryptographically random.
    pub fn from_bytes(key: &[u8], algorithm: CryptoAlgorithm) -> Result<Self, InvalidKeyError> {
        let key = Key::try_from(key)?;
        Ok(Self { key, algorithm })
    }
}

#[derive(Debug, Clone)]
/// The default [`CookieCodec`], built on top of [`biscotti::Processor`].
///
/// # Format
///
/// The value is stamped with the current unix time (`timestamp|value`) and
/// then signed or encrypted according to the [`CookieKey`] in use.
/// Both signing and encryption bind the value to the cookie name.
///
/// Only the cookie names the codec was built for are accepted: encoding or
/// decoding any other cookie fails with [`CodecError::UnprotectedCookie`].
///
/// # Key rotation
///
/// Values are always encoded with the first [`CookieKey`].
/// Decoding tries every key, in order, and returns the first success:
/// put the new key first and keep the old ones after it until the
/// cookies they protected have expired.
pub struct SecureCookieCodec {
    processor: Processor,
    cookie_names: BTreeSet<String>,
    max_age: std::time::Duration,
    max_length: usize,
}

impl SecureCookieCodec {
    /// Create a new codec protecting the cookies in `cookie_names`
    /// with the provided keys, most recent first.
    pub fn new<I, N>(cookie_names: I, keys: Vec<CookieKey>) -> Result<Self, InvalidKeyError>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let mut keys = keys.into_iter();
        let current = keys.next().ok_or(InvalidKeyError::NoKeys)?;
        let cookie_names: BTreeSet<String> = cookie_names.into_iter().map(Into::into).collect();

        let mut config = ProcessorConfig::default();
        config.crypto_rules.push(CryptoRule {
            cookie_names: cookie_names.iter().cloned().collect(),
            algorithm: current.algorithm,
            key: current.key,
            fallbacks: keys
                .map(|retired| FallbackConfig {
                    key: retired.key,
                    algorithm: retired.algorithm,
                })
                .collect(),
        });
        Ok(Self {
            processor: config.into(),
            cookie_names,
            max_age: default_cookie_max_age(),
            max_length: DEFAULT_MAX_LENGTH,
        })
    }

    /// Create a new codec from its configuration.
    pub fn from_config(config: &SecureCookieConfig) -> Result<Self, InvalidKeyError> {
        let keys = config
            .keys
            .iter()
            .map(|key| {
                let material = STANDARD.decode(&key.key).map_err(InvalidKeyError::Base64)?;
                CookieKey::from_bytes(&material, key.algorithm)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(config.cookie_names.iter().cloned(), keys)?.with_max_age(config.max_age))
    }

    /// Reject cookies whose timestamp is older than `max_age`.
    ///
    /// A zero duration disables the check.
    pub fn with_max_age(mut self, max_age: std::time::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Reject encoded values longer than `max_length` bytes, both when
    /// encoding and when decoding.
    ///
    /// Zero disables the check.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    fn check_name(&self, name: &str) -> Result<(), CodecError> {
        if !self.cookie_names.contains(name) {
            return Err(CodecError::UnprotectedCookie {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    fn check_length(&self, length: usize) -> Result<(), CodecError> {
        if self.max_length != 0 && length > self.max_length {
            return Err(CodecError::ValueTooLong {
                length,
                max_length: self.max_length,
            });
        }
        Ok(())
    }

    fn encode_at(&self, name: &str, value: &str, timestamp: i64) -> Result<String, CodecError> {
        self.check_name(name)?;
        let cookie = ResponseCookie::new(name, format!("{timestamp}|{value}"));
        let encoded = self.processor.process_outgoing(cookie).value().to_owned();
        self.check_length(encoded.len())?;
        Ok(encoded)
    }

    fn decode_at(&self, name: &str, encoded: &str, now: i64) -> Result<String, CodecError> {
        self.check_name(name)?;
        self.check_length(encoded.len())?;
        let cookie = self
            .processor
            .process_incoming(name, encoded)
            .map_err(CodecError::Rejected)?;
        let (timestamp, value) = cookie
            .value()
            .split_once('|')
            .ok_or(CodecError::Malformed)?;
        let timestamp: i64 = timestamp.parse().map_err(|_| CodecError::Malformed)?;

        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        if max_age != 0 && timestamp < now.saturating_sub(max_age) {
            return Err(CodecError::Expired);
        }
        if timestamp > now.saturating_add(MAX_CLOCK_SKEW_SECONDS) {
            return Err(CodecError::Expired);
        }
        Ok(value.to_owned())
    }
}

impl CookieCodec for SecureCookieCodec {
    fn encode(&self, name: &str, value: &str) -> Result<String, CodecError> {
        self.encode_at(name, value, now())
    }

    fn decode(&self, name: &str, encoded: &str) -> Result<String, CodecError> {
        self.decode_at(name, encoded, now())
    }
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Errors that can occur when encoding or decoding cookie values.
pub mod errors {
    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`CookieCodec`][super::CookieCodec].
    pub enum CodecError {
        /// The codec has no key for this cookie name.
        #[error("The `{name}` cookie is not configured to be signed nor encrypted.")]
        UnprotectedCookie { name: String },
        /// The value was tampered with, or it was protected with an unknown key.
        #[error("The cookie value failed verification.")]
        Rejected(#[source] biscotti::errors::ProcessIncomingError),
        /// The value was verified, but it's not in the expected format.
        #[error("The cookie value is malformed.")]
        Malformed,
        /// The cookie timestamp is too old, or too far in the future.
        #[error("The cookie has expired.")]
        Expired,
        /// The encoded value exceeds the maximum allowed length.
        #[error("The encoded cookie value is {length} bytes long, the maximum allowed is {max_length}.")]
        ValueTooLong { length: usize, max_length: usize },
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The key material for a [`SecureCookieCodec`][super::SecureCookieCodec] is invalid.
    pub enum InvalidKeyError {
        /// No key was provided.
        #[error("At least one key is required to protect session cookies.")]
        NoKeys,
        /// The key material was rejected.
        #[error(transparent)]
        Key(#[from] biscotti::errors::KeyError),
        /// The key is not valid base64.
        #[error("The key is not valid base64.")]
        Base64(#[source] base64::DecodeError),
    }
}
