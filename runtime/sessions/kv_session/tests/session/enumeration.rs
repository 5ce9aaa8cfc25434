use biscotti::{RequestCookies, ResponseCookies};
use futures_util::TryStreamExt;
use itertools::Itertools;
use kv_session::{SessionId, client::KeyValueClient, config::StoreConfig};
use serde_json::json;

use crate::fixtures::{SESSION_NAME, SessionFixture, spy_store, spy_store_with, store};

#[tokio::test]
async fn all_live_sessions_are_returned() {
    let mut store = store();
    let mut ids = Vec::new();
    for i in 0..5 {
        let fixture = SessionFixture {
            values: [("i".to_string(), json!(i))].into(),
            ..Default::default()
        };
        fixture.setup(&store).await;
        ids.push(fixture.id.clone());
    }
    // Keys outside of the prefix are ignored.
    store
        .client()
        .set_ex("unrelated", b"{}", 100)
        .await
        .unwrap();
    store.set_max_age(10);

    let sessions = store.get_all().await.unwrap();

    let found: Vec<&SessionId> = sessions.iter().map(|s| s.id()).sorted().collect();
    let expected: Vec<&SessionId> = ids.iter().sorted().collect();
    assert_eq!(found, expected);
    for session in &sessions {
        assert!(!session.is_new());
        assert!(session.name().is_empty());
        // Sessions carry the store's current options.
        assert_eq!(session.options().max_age, 10);
    }
    let values = sessions
        .iter()
        .map(|s| s.get::<u32>("i").unwrap().unwrap())
        .sorted()
        .collect_vec();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn enumerated_sessions_get_the_current_options() {
    let mut store = store();
    for id in ["1", "2"] {
        store
            .records()
            .save(&SessionId::from(id), br#"{"user":"alice"}"#, 100)
            .await
            .unwrap();
    }
    assert!(store.client().get("session_1").await.unwrap().is_some());

    let mut options = store.options().clone();
    options.domain = Some("example.com".into());
    options.max_age = 60;
    store.set_options(options.clone());

    let sessions = store
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .sorted_by(|a, b| a.id().cmp(b.id()))
        .collect_vec();
    let ids = sessions.iter().map(|s| s.id().as_str()).collect_vec();
    assert_eq!(ids, vec!["1", "2"]);
    for session in &sessions {
        assert_eq!(session.options(), &options);
        assert_eq!(
            session.get::<String>("user").unwrap().as_deref(),
            Some("alice")
        );
    }
}

#[tokio::test]
async fn corrupted_records_are_skipped() {
    let store = store();
    let healthy = SessionFixture::default();
    healthy.setup(&store).await;
    let corrupted = SessionId::random();
    store
        .records()
        .save(&corrupted, b"\xff\xfe", 100)
        .await
        .unwrap();

    let sessions = store.get_all().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id(), &healthy.id);
}

#[tokio::test]
async fn enumeration_follows_the_scan_cursor() {
    let mut config = StoreConfig::default();
    config.scan_count = 2;
    let (store, call_tracker) = spy_store_with(&config);
    for _ in 0..5 {
        SessionFixture::default().setup(&store).await;
    }
    call_tracker.reset().await;

    let sessions: Vec<_> = store.stream_all().try_collect().await.unwrap();
    assert_eq!(sessions.len(), 5);

    let scans = call_tracker
        .operation_log()
        .await
        .into_iter()
        .filter(|op| op.starts_with("scan "))
        .collect_vec();
    assert_eq!(
        scans,
        vec![
            "scan 0 session_* 2",
            "scan 1 session_* 2",
            "scan 2 session_* 2",
        ]
    );
}

#[tokio::test]
async fn glob_characters_in_the_prefix_are_escaped() {
    let (mut store, call_tracker) = spy_store();
    store.set_key_prefix("app*");

    let mut session = store
        .new_session(&RequestCookies::new(), SESSION_NAME)
        .await
        .unwrap();
    store
        .save(&mut ResponseCookies::new(), &mut session)
        .await
        .unwrap();
    // Would match `app*` if the star weren't escaped.
    store
        .client()
        .set_ex("apple", b"{}", 100)
        .await
        .unwrap();
    call_tracker.reset().await;

    let sessions = store.get_all().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id(), session.id());
    assert_eq!(
        call_tracker.operation_log().await[0],
        "scan 0 app\\** 100"
    );
}

#[tokio::test]
async fn an_empty_store_yields_no_sessions() {
    let (store, _) = spy_store();
    assert!(store.get_all().await.unwrap().is_empty());
}
