//! Behaviour every `SessionStore` backend must share.
//!
//! Each backend's test file wires its own store into these checks.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinSet;

use mnemosyne::{Bag, ExpiryRange, SessionFilter, SessionStore, StoreError, Token};

pub fn never_issued() -> Token {
    Token::from("31ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
}

pub async fn start_then_get_round_trips(store: &dyn SessionStore) {
    let bag = Bag::from([("ip", "10.0.0.1"), ("agent", "curl/8.0"), ("", "empty key")]);

    let started = store.start("subject-1", bag.clone()).await.unwrap();
    assert_eq!(started.subject_id, "subject-1");
    assert_eq!(started.bag, bag);
    assert!(started.expire_at > Utc::now() + TimeDelta::minutes(29));
    assert!(started.expire_at <= Utc::now() + TimeDelta::minutes(31));

    let fetched = store.get(&started.token).await.unwrap();
    assert_eq!(fetched.token, started.token);
    assert_eq!(fetched.subject_id, "subject-1");
    assert_eq!(fetched.bag, bag);
    assert_eq!(fetched.expire_at, started.expire_at);
}

pub async fn start_accepts_empty_bag(store: &dyn SessionStore) {
    let started = store.start("subject-empty", Bag::new()).await.unwrap();
    let fetched = store.get(&started.token).await.unwrap();

    assert!(fetched.bag.is_empty());
}

pub async fn start_rejects_missing_subject(store: &dyn SessionStore) {
    let err = store.start("", Bag::new()).await.unwrap_err();
    assert!(err.is_invalid_argument(), "got {err:?}");
}

pub async fn start_issues_distinct_tokens(store: &dyn SessionStore, n: usize) {
    let mut tokens = HashSet::with_capacity(n);
    for i in 0..n {
        let session = store.start(&format!("subject-{i}"), Bag::new()).await.unwrap();
        tokens.insert(session.token);
    }

    assert_eq!(tokens.len(), n);
}

pub async fn set_value_leaves_other_keys(store: &dyn SessionStore) {
    let session = store
        .start("subject-merge", Bag::from([("a", "1"), ("b", "2")]))
        .await
        .unwrap();

    let bag = store.set_value(&session.token, "a", "9").await.unwrap();
    assert_eq!(bag, Bag::from([("a", "9"), ("b", "2")]));

    let bag = store.set_value(&session.token, "c", "3").await.unwrap();
    assert_eq!(bag, Bag::from([("a", "9"), ("b", "2"), ("c", "3")]));

    let stored = store.get(&session.token).await.unwrap();
    assert_eq!(stored.bag, bag);
}

pub async fn unknown_token_is_not_found(store: &dyn SessionStore) {
    let token = never_issued();

    assert!(store.get(&token).await.unwrap_err().is_not_found());
    assert!(store.set_value(&token, "k", "v").await.unwrap_err().is_not_found());
    assert!(store.abandon(&token).await.unwrap_err().is_not_found());
    assert!(!store.exists(&token).await.unwrap());
}

pub async fn exists_follows_lifecycle(store: &dyn SessionStore) {
    let session = store.start("subject-exists", Bag::new()).await.unwrap();
    assert!(store.exists(&session.token).await.unwrap());

    assert!(store.abandon(&session.token).await.unwrap());
    assert!(!store.exists(&session.token).await.unwrap());

    let err = store.abandon(&session.token).await.unwrap_err();
    assert!(matches!(err, StoreError::SessionNotFound));
}

pub async fn delete_without_filter_is_rejected(store: &dyn SessionStore) {
    let session = store.start("subject-guard", Bag::new()).await.unwrap();

    let err = store.delete(&SessionFilter::default()).await.unwrap_err();
    assert!(err.is_invalid_argument(), "got {err:?}");
    assert!(store.exists(&session.token).await.unwrap());
}

pub async fn delete_by_token_removes_one(store: &dyn SessionStore) {
    let keep = store.start("subject-keep", Bag::new()).await.unwrap();
    let gone = store.start("subject-gone", Bag::new()).await.unwrap();

    let affected = store
        .delete(&SessionFilter::by_token(gone.token.clone()))
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert!(!store.exists(&gone.token).await.unwrap());
    assert!(store.exists(&keep.token).await.unwrap());

    let affected = store
        .delete(&SessionFilter::by_token(gone.token))
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

pub async fn list_rejects_bad_page(store: &dyn SessionStore) {
    let unbounded = ExpiryRange::unbounded();

    assert!(store.list(0, 0, &unbounded).await.unwrap_err().is_invalid_argument());
    assert!(store.list(0, -1, &unbounded).await.unwrap_err().is_invalid_argument());
    assert!(store.list(-1, 10, &unbounded).await.unwrap_err().is_invalid_argument());
}

/// Expects an otherwise empty store.
pub async fn list_pages_through_everything(store: &dyn SessionStore) {
    let mut started = HashSet::new();
    for i in 0..5 {
        let session = store.start(&format!("subject-{i}"), Bag::new()).await.unwrap();
        started.insert(session.token);
    }

    let unbounded = ExpiryRange::unbounded();
    let mut seen = HashSet::new();
    for offset in [0, 2, 4] {
        let page = store.list(offset, 2, &unbounded).await.unwrap();
        assert!(page.len() <= 2);
        seen.extend(page.into_iter().map(|s| s.token));
    }

    assert_eq!(seen, started);
    assert!(store.list(5, 2, &unbounded).await.unwrap().is_empty());
}

/// `tokens` expire at `t - 10m`, `t` and `t + 10m` respectively.
pub async fn list_and_delete_by_expiry(store: &dyn SessionStore, t: DateTime<Utc>, tokens: [Token; 3]) {
    let [early, middle, late] = tokens;
    let minute = TimeDelta::minutes(1);

    let window = ExpiryRange::between(t - minute, t + minute);
    let listed = store.list(0, 10, &window).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].token, middle);
    assert_eq!(listed[0].expire_at, t);

    let listed = store.list(0, 10, &ExpiryRange::since(t)).await.unwrap();
    let listed: HashSet<Token> = listed.into_iter().map(|s| s.token).collect();
    assert_eq!(listed, HashSet::from([middle.clone(), late.clone()]));

    let listed = store.list(0, 10, &ExpiryRange::before(t)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].token, early);

    // token and range both present: the range excludes the token's row
    let filter = SessionFilter::by_token(late.clone()).with_expiry(window);
    assert_eq!(store.delete(&filter).await.unwrap(), 0);
    assert!(store.exists(&late).await.unwrap());

    let purged = store.delete(&SessionFilter::expired_before(t)).await.unwrap();
    assert_eq!(purged, 1);
    assert!(!store.exists(&early).await.unwrap());
    assert!(store.exists(&middle).await.unwrap());
    assert!(store.exists(&late).await.unwrap());
}

pub async fn expiry_is_not_refreshed(store: &dyn SessionStore) {
    let session = store.start("subject-ttl", Bag::new()).await.unwrap();

    store.set_value(&session.token, "k", "v").await.unwrap();
    let after_set = store.get(&session.token).await.unwrap();
    assert_eq!(after_set.expire_at, session.expire_at);

    let after_get = store.get(&session.token).await.unwrap();
    assert_eq!(after_get.expire_at, session.expire_at);
}

pub async fn concurrent_set_value_loses_nothing(store: Arc<dyn SessionStore>, writers: usize) {
    let session = store
        .start("subject-concurrent", Bag::from([("seed", "0")]))
        .await
        .unwrap();

    let mut set = JoinSet::new();
    for i in 0..writers {
        let store = Arc::clone(&store);
        let token = session.token.clone();
        set.spawn(async move {
            store
                .set_value(&token, &format!("key-{i}"), &format!("value-{i}"))
                .await
        });
    }

    while let Some(res) = set.join_next().await {
        res.expect("task panicked").expect("set_value failed");
    }

    let bag = store.get(&session.token).await.unwrap().bag;
    assert_eq!(bag.len(), writers + 1);
    assert_eq!(bag.get("seed"), Some("0"));
    for i in 0..writers {
        assert_eq!(bag.get(&format!("key-{i}")), Some(format!("value-{i}").as_str()));
    }
}
