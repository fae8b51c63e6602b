//! Lifecycle tests against the in-memory store.
//!
//! Cover the issuance/validation contract end to end: expiry windows,
//! never-expiring tokens, per-pair isolation, concurrent issuance and the
//! distinction between "no token" and a storage failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use remember_device::random::ALPHABET;
use remember_device::{
    AppError, AuthToken, IssueScope, MemoryTokenStore, NewAuthToken, TokenLifecycleManager,
    TokenStore,
};

const CHANNEL: &str = "remember_device";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn manager() -> TokenLifecycleManager<MemoryTokenStore> {
    TokenLifecycleManager::new(MemoryTokenStore::new())
}

// ═══════════════════════════════════════════════════════════════════
//  Issue / validate
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_issue_then_expire_then_reissue() {
    let m = manager();

    let first = m.issue_at(42, CHANNEL, 60, 16, t0()).await.unwrap();
    assert_eq!(first.value.len(), 16);
    assert!(first.value.bytes().all(|b| ALPHABET.contains(&b)));
    assert_eq!(first.subject_id, 42);
    assert_eq!(first.channel, CHANNEL);
    assert_eq!(first.expires_at, Some(t0() + Duration::seconds(60)));

    let found = m.validate(42, CHANNEL, t0()).await.unwrap();
    assert_eq!(found, Some(first.clone()));

    let later = t0() + Duration::seconds(61);
    assert_eq!(m.validate(42, CHANNEL, later).await.unwrap(), None);
    assert_eq!(
        m.store().find_expired(42, CHANNEL, later).await.unwrap(),
        vec![first.clone()]
    );

    let second = m.issue_at(42, CHANNEL, 60, 16, later).await.unwrap();
    assert_ne!(second.id, first.id);
    assert!(m.store().find_expired(42, CHANNEL, later).await.unwrap().is_empty());
    assert_eq!(m.store().len().await, 1);
    assert_eq!(m.validate(42, CHANNEL, later).await.unwrap(), Some(second));
}

#[tokio::test]
async fn test_one_hour_window() {
    let m = manager();
    let token = m.issue_at(1, CHANNEL, 3600, 32, t0()).await.unwrap();

    let mid = t0() + Duration::seconds(1800);
    assert_eq!(m.validate(1, CHANNEL, mid).await.unwrap(), Some(token.clone()));

    let after = t0() + Duration::seconds(3601);
    assert_eq!(m.validate(1, CHANNEL, after).await.unwrap(), None);
    assert_eq!(
        m.store().find_expired(1, CHANNEL, after).await.unwrap(),
        vec![token]
    );
}

#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let m = manager();
    let token = m.issue_at(5, CHANNEL, 0, 24, t0()).await.unwrap();
    assert_eq!(token.expires_at, None);

    let far = Utc.with_ymd_and_hms(2999, 12, 31, 23, 59, 59).unwrap();
    assert_eq!(m.validate(5, CHANNEL, far).await.unwrap(), Some(token));
    assert!(m.store().find_expired(5, CHANNEL, far).await.unwrap().is_empty());
    assert_eq!(m.sweep(far).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reissue_supersedes_live_token() {
    let m = manager();
    let first = m.issue_at(9, CHANNEL, 0, 16, t0()).await.unwrap();
    let now = t0() + Duration::seconds(5);
    let second = m.issue_at(9, CHANNEL, 600, 16, now).await.unwrap();

    let live = m.store().find_valid(9, CHANNEL, now).await.unwrap();
    assert_eq!(live, vec![second.clone()]);
    assert_ne!(first.value, second.value);
    assert!(!m.verify(9, CHANNEL, &first.value, now).await.unwrap());
    assert!(m.verify(9, CHANNEL, &second.value, now).await.unwrap());
}

#[tokio::test]
async fn test_issue_leaves_other_pairs_alone() {
    let m = manager();
    let other_channel = m.issue_at(42, "email_otp", 10, 16, t0()).await.unwrap();
    let other_subject = m.issue_at(43, CHANNEL, 10, 16, t0()).await.unwrap();

    // both are expired when subject 42 re-issues on CHANNEL
    let later = t0() + Duration::seconds(30);
    m.issue_at(42, CHANNEL, 10, 16, later).await.unwrap();

    assert_eq!(
        m.store().find_expired(42, "email_otp", later).await.unwrap(),
        vec![other_channel]
    );
    assert_eq!(
        m.store().find_expired(43, CHANNEL, later).await.unwrap(),
        vec![other_subject]
    );
}

#[tokio::test]
async fn test_subject_holds_tokens_on_several_channels() {
    let m = manager();
    let device = m.issue_at(42, CHANNEL, 600, 16, t0()).await.unwrap();
    let browser = m.issue_at(42, "remember_browser", 600, 16, t0()).await.unwrap();

    assert_eq!(m.validate(42, CHANNEL, t0()).await.unwrap(), Some(device));
    assert_eq!(
        m.validate(42, "remember_browser", t0()).await.unwrap(),
        Some(browser)
    );
}

#[tokio::test]
async fn test_latest_and_sweep() {
    let m = manager();
    m.issue_at(1, CHANNEL, 10, 16, t0()).await.unwrap();
    m.issue_at(2, CHANNEL, 10, 16, t0()).await.unwrap();
    let last = m.issue_at(3, CHANNEL, 0, 16, t0()).await.unwrap();

    assert_eq!(m.latest().await.unwrap(), Some(last));
    assert_eq!(m.sweep(t0() + Duration::seconds(11)).await.unwrap(), 2);
    assert_eq!(m.store().len().await, 1);
}

// ═══════════════════════════════════════════════════════════════════
//  Invariant violations and failures
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_duplicate_live_tokens_are_reported() {
    let store = MemoryTokenStore::new();
    for value in ["one", "two"] {
        store
            .insert(NewAuthToken {
                subject_id: 42,
                channel: CHANNEL.into(),
                value: value.into(),
                created_at: t0(),
                expires_at: None,
            })
            .await
            .unwrap();
    }

    let m = TokenLifecycleManager::new(store);
    match m.validate(42, CHANNEL, t0()).await {
        Err(AppError::DuplicateTokens {
            subject_id,
            channel,
            count,
        }) => {
            assert_eq!(subject_id, 42);
            assert_eq!(channel, CHANNEL);
            assert_eq!(count, 2);
        }
        other => panic!("expected DuplicateTokens, got {:?}", other),
    }

    // issuing repairs the pair
    m.issue_at(42, CHANNEL, 60, 16, t0()).await.unwrap();
    assert!(m.validate(42, CHANNEL, t0()).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_leaves_one_live_token() {
    let m = Arc::new(manager());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let m = m.clone();
            tokio::spawn(async move { m.issue_at(7, CHANNEL, 300, 16, t0()).await })
        })
        .collect();

    let mut issued = Vec::new();
    for h in handles {
        issued.push(tokio_test::assert_ok!(h.await.unwrap()));
    }

    let live = m.store().find_valid(7, CHANNEL, t0()).await.unwrap();
    assert_eq!(live.len(), 1);
    let winner = issued.iter().max_by_key(|t| t.id).unwrap();
    assert_eq!(&live[0], winner);
    assert!(m.validate(7, CHANNEL, t0()).await.unwrap().is_some());
}

/// Store whose every call fails like an unreachable database.
struct UnreachableStore;

fn unreachable_db() -> AppError {
    AppError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl TokenStore for UnreachableStore {
    async fn insert(&self, _token: NewAuthToken) -> remember_device::Result<AuthToken> {
        Err(unreachable_db())
    }

    async fn delete(&self, _token: &AuthToken) -> remember_device::Result<bool> {
        Err(unreachable_db())
    }

    async fn find_valid(
        &self,
        _subject_id: i64,
        _channel: &str,
        _now: DateTime<Utc>,
    ) -> remember_device::Result<Vec<AuthToken>> {
        Err(unreachable_db())
    }

    async fn find_expired(
        &self,
        _subject_id: i64,
        _channel: &str,
        _now: DateTime<Utc>,
    ) -> remember_device::Result<Vec<AuthToken>> {
        Err(unreachable_db())
    }

    async fn find_latest(&self) -> remember_device::Result<Option<AuthToken>> {
        Err(unreachable_db())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> remember_device::Result<u64> {
        Err(unreachable_db())
    }

    async fn begin_issue<'a>(
        &'a self,
        _subject_id: i64,
        _channel: &str,
    ) -> remember_device::Result<Box<dyn IssueScope + 'a>> {
        Err(unreachable_db())
    }
}

#[tokio::test]
async fn test_storage_failure_is_not_a_missing_token() {
    let m = TokenLifecycleManager::new(UnreachableStore);

    let err = tokio_test::assert_err!(m.validate(42, CHANNEL, t0()).await);
    assert!(matches!(err, AppError::Database(_)));
    assert!(err.is_fatal());

    assert!(matches!(
        m.issue_at(42, CHANNEL, 60, 16, t0()).await,
        Err(AppError::Database(_))
    ));
    assert!(matches!(
        m.verify(42, CHANNEL, "x", t0()).await,
        Err(AppError::Database(_))
    ));
}
