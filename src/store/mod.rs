pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::token::{AuthToken, NewAuthToken};

/// Persistence for remember-device tokens.
///
/// Implementations: `PgStore` (PostgreSQL), `MemoryTokenStore` (in-process).
/// Every method is its own unit of work except [`TokenStore::begin_issue`],
/// which groups the purge and insert of one issuance.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a new token and return it with its assigned id.
    async fn insert(&self, token: NewAuthToken) -> Result<AuthToken>;

    /// Remove a token. Returns `false` if it was already gone.
    async fn delete(&self, token: &AuthToken) -> Result<bool>;

    /// Tokens for the pair with `expires_at > now` or no expiry.
    async fn find_valid(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthToken>>;

    /// Tokens for the pair with `expires_at < now`. Never includes tokens
    /// without expiry.
    async fn find_expired(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthToken>>;

    /// Most recently created token across all subjects.
    async fn find_latest(&self) -> Result<Option<AuthToken>>;

    /// Delete every expired token regardless of pair. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Open an exclusive scope for one `(subject_id, channel)` pair.
    ///
    /// While the scope is alive no other scope for the same pair can be
    /// opened. Changes become visible on [`IssueScope::commit`]; dropping the
    /// scope discards them.
    async fn begin_issue<'a>(
        &'a self,
        subject_id: i64,
        channel: &str,
    ) -> Result<Box<dyn IssueScope + 'a>>;
}

/// Pair-scoped unit of work returned by [`TokenStore::begin_issue`].
#[async_trait]
pub trait IssueScope: Send {
    async fn find_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<AuthToken>>;

    async fn find_valid(&mut self, now: DateTime<Utc>) -> Result<Vec<AuthToken>>;

    async fn delete(&mut self, token: &AuthToken) -> Result<bool>;

    async fn insert(&mut self, token: NewAuthToken) -> Result<AuthToken>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
