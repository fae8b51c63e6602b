//! Issuance and validation of remember-device tokens.
//!
//! A token lets a subject skip the second authentication factor on one
//! channel until it expires. Issuing a token for a pair purges the pair's
//! expired rows and supersedes its live one inside a single store scope, so
//! concurrent issuances cannot leave two live tokens behind.

use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, Result};
use crate::models::token::{AuthToken, NewAuthToken};
use crate::random::{SecureRandom, ValueGenerator};
use crate::store::TokenStore;

pub struct TokenLifecycleManager<S, G = SecureRandom> {
    store: S,
    generator: G,
}

impl<S: TokenStore> TokenLifecycleManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_generator(store, SecureRandom)
    }
}

impl<S: TokenStore, G: ValueGenerator> TokenLifecycleManager<S, G> {
    pub fn with_generator(store: S, generator: G) -> Self {
        Self { store, generator }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issue a token valid for `ttl_secs` seconds from now (0 = never expires).
    pub async fn issue(
        &self,
        subject_id: i64,
        channel: &str,
        ttl_secs: u64,
        length: usize,
    ) -> Result<AuthToken> {
        self.issue_at(subject_id, channel, ttl_secs, length, Utc::now())
            .await
    }

    /// [`issue`](Self::issue) with an explicit clock.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn issue_at(
        &self,
        subject_id: i64,
        channel: &str,
        ttl_secs: u64,
        length: usize,
        now: DateTime<Utc>,
    ) -> Result<AuthToken> {
        if channel.is_empty() {
            return Err(AppError::InvalidChannel);
        }
        if length == 0 {
            return Err(AppError::InvalidLength(length));
        }
        let expires_at = expiry(now, ttl_secs)?;

        let mut scope = self.store.begin_issue(subject_id, channel).await?;

        let mut purged = 0usize;
        for stale in scope.find_expired(now).await? {
            if scope.delete(&stale).await? {
                purged += 1;
            }
        }

        let mut superseded = 0usize;
        for live in scope.find_valid(now).await? {
            if scope.delete(&live).await? {
                superseded += 1;
            }
        }

        let value = self.generator.generate(length)?;
        let token = scope
            .insert(NewAuthToken {
                subject_id,
                channel: channel.to_string(),
                value,
                created_at: now,
                expires_at,
            })
            .await?;
        scope.commit().await?;

        tracing::info!(
            subject_id,
            channel = %channel,
            token_id = token.id,
            expires_at = ?token.expires_at,
            purged,
            superseded,
            "issued remember-device token"
        );
        Ok(token)
    }

    /// Look up the live token for the pair.
    ///
    /// `Ok(None)` means the challenge is required. More than one live token
    /// is reported as [`AppError::DuplicateTokens`].
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn validate(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthToken>> {
        let mut found = self.store.find_valid(subject_id, channel, now).await?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            count => {
                tracing::error!(
                    subject_id,
                    channel = %channel,
                    count,
                    ids = ?found.iter().map(|t| t.id).collect::<Vec<_>>(),
                    "multiple live remember-device tokens for one pair"
                );
                Err(AppError::DuplicateTokens {
                    subject_id,
                    channel: channel.to_string(),
                    count,
                })
            }
        }
    }

    /// Check a presented value against the pair's live token.
    pub async fn verify(
        &self,
        subject_id: i64,
        channel: &str,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(token) = self.validate(subject_id, channel, now).await? else {
            return Ok(false);
        };
        let matches: bool = token.value.as_bytes().ct_eq(presented.as_bytes()).into();
        if !matches {
            tracing::warn!(
                subject_id,
                channel = %channel,
                token_id = token.id,
                "presented remember-device value does not match"
            );
        }
        Ok(matches)
    }

    /// Most recently issued token, for diagnostics.
    pub async fn latest(&self) -> Result<Option<AuthToken>> {
        self.store.find_latest().await
    }

    /// Remove every expired token across all pairs.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = self.store.purge_expired(now).await?;
        if removed > 0 {
            tracing::info!(rows = removed, "swept expired remember-device tokens");
        }
        Ok(removed)
    }
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> Result<Option<DateTime<Utc>>> {
    if ttl_secs == 0 {
        return Ok(None);
    }
    let ttl = i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or(AppError::InvalidTtl(ttl_secs))?;
    now.checked_add_signed(ttl)
        .map(Some)
        .ok_or(AppError::InvalidTtl(ttl_secs))
}
