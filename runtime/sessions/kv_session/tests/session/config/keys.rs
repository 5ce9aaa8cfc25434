//! Verify how key material is loaded and rotated.
use base64::{Engine, engine::general_purpose::STANDARD};
use biscotti::{Key, RequestCookies, ResponseCookies, config::CryptoAlgorithm};
use kv_session::{
    SessionStore,
    codec::{CookieKey, SecureCookieCodec, errors::InvalidKeyError},
    config::{CookieKeyConfig, SecureCookieConfig, StoreConfig},
};
use kv_session_memory_store::InMemoryKeyValueClient;

use crate::{
    fixtures::{COOKIE_NAMES, SESSION_NAME, codec, test_key},
    helpers::next_request,
};

fn secure_cookie_config(keys: Vec<CookieKeyConfig>) -> SecureCookieConfig {
    let mut config = SecureCookieConfig::default();
    config.keys = keys;
    config
}

#[test]
fn keys_are_loaded_from_base64() {
    let config = secure_cookie_config(vec![
        CookieKeyConfig::new(STANDARD.encode([7u8; 64]), CryptoAlgorithm::Encryption),
        CookieKeyConfig::new(STANDARD.encode([8u8; 32]), CryptoAlgorithm::Signing),
    ]);
    assert!(SecureCookieCodec::from_config(&config).is_ok());
}

#[test]
fn the_algorithm_defaults_to_signing() {
    let config: SecureCookieConfig = serde_json::from_value(serde_json::json!({
        "keys": [{ "key": STANDARD.encode([7u8; 64]) }]
    }))
    .unwrap();
    assert!(matches!(config.keys[0].algorithm, CryptoAlgorithm::Signing));
    assert_eq!(config.cookie_names, vec!["session".to_owned()]);
}

#[test]
fn invalid_keys_are_rejected() {
    let config = secure_cookie_config(vec![CookieKeyConfig::new(
        "not base64!",
        CryptoAlgorithm::Signing,
    )]);
    let err = SecureCookieCodec::from_config(&config).unwrap_err();
    assert!(matches!(err, InvalidKeyError::Base64(_)));

    let config = secure_cookie_config(vec![CookieKeyConfig::new(
        STANDARD.encode(b"too-short"),
        CryptoAlgorithm::Signing,
    )]);
    let err = SecureCookieCodec::from_config(&config).unwrap_err();
    insta::assert_snapshot!(err, @"key material is too short: expected >= 32 bytes, got 9 bytes");

    let err = SecureCookieCodec::from_config(&SecureCookieConfig::default()).unwrap_err();
    insta::assert_snapshot!(err, @"At least one key is required to protect session cookies.");
}

#[tokio::test]
async fn cookies_issued_before_a_key_rotation_are_still_accepted() {
    let client = InMemoryKeyValueClient::new();
    let config = StoreConfig::default();

    let old_store = SessionStore::new(client.clone(), &config, codec());
    let mut session = old_store
        .new_session(&RequestCookies::new(), SESSION_NAME)
        .await
        .unwrap();
    session.insert("user", "alice").unwrap();
    let mut cookies = ResponseCookies::new();
    old_store.save(&mut cookies, &mut session).await.unwrap();

    // The new key goes first, the old one is kept for decoding.
    let new_key = Key::generate();
    let rotated_store = SessionStore::new(
        client.clone(),
        &config,
        SecureCookieCodec::new(
            COOKIE_NAMES,
            vec![
                CookieKey::encryption(new_key.clone()),
                CookieKey::encryption(test_key()),
            ],
        )
        .unwrap(),
    );
    let recovered = rotated_store
        .new_session(&next_request(&cookies), SESSION_NAME)
        .await
        .unwrap();
    assert!(!recovered.is_new());
    assert_eq!(
        recovered.get::<String>("user").unwrap().as_deref(),
        Some("alice")
    );

    // Once the old key is dropped, the cookie is rejected.
    let store = SessionStore::new(
        client,
        &config,
        SecureCookieCodec::new(COOKIE_NAMES, vec![CookieKey::encryption(new_key)]).unwrap(),
    );
    assert!(
        store
            .new_session(&next_request(&cookies), SESSION_NAME)
            .await
            .is_err()
    );
}
