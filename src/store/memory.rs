//! In-process token store.
//!
//! Rows are grouped per `(subject_id, channel)` behind an async mutex, so an
//! open issuance scope excludes every other access to the same pair while
//! leaving other pairs untouched. Used by tests and by embedders that do not
//! need durability.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{IssueScope, TokenStore};
use crate::errors::{AppError, Result};
use crate::models::token::{AuthToken, NewAuthToken};

type PairRows = Arc<Mutex<Vec<AuthToken>>>;

#[derive(Default)]
pub struct MemoryTokenStore {
    pairs: DashMap<(i64, String), PairRows>,
    last_id: AtomicI64,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored rows, expired ones included.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for rows in self.all_pairs() {
            total += rows.lock().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn pair(&self, subject_id: i64, channel: &str) -> PairRows {
        // clone the Arc so the shard lock is released before any await
        self.pairs
            .entry((subject_id, channel.to_string()))
            .or_default()
            .clone()
    }

    fn existing_pair(&self, subject_id: i64, channel: &str) -> Option<PairRows> {
        self.pairs
            .get(&(subject_id, channel.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn all_pairs(&self) -> Vec<PairRows> {
        self.pairs.iter().map(|entry| entry.value().clone()).collect()
    }

    fn next_id(&self) -> i64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn valid_rows(rows: &[AuthToken], now: DateTime<Utc>) -> Vec<AuthToken> {
    rows.iter().filter(|t| t.is_valid_at(now)).cloned().collect()
}

fn expired_rows(rows: &[AuthToken], now: DateTime<Utc>) -> Vec<AuthToken> {
    rows.iter().filter(|t| t.is_expired_at(now)).cloned().collect()
}

fn remove_row(rows: &mut Vec<AuthToken>, id: i64) -> bool {
    let before = rows.len();
    rows.retain(|t| t.id != id);
    rows.len() < before
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, token: NewAuthToken) -> Result<AuthToken> {
        let rows = self.pair(token.subject_id, &token.channel);
        let mut rows = rows.lock().await;
        let stored = token.into_stored(self.next_id());
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn delete(&self, token: &AuthToken) -> Result<bool> {
        let Some(rows) = self.existing_pair(token.subject_id, &token.channel) else {
            return Ok(false);
        };
        let mut rows = rows.lock().await;
        Ok(remove_row(&mut rows, token.id))
    }

    async fn find_valid(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthToken>> {
        match self.existing_pair(subject_id, channel) {
            Some(rows) => Ok(valid_rows(&rows.lock().await, now)),
            None => Ok(Vec::new()),
        }
    }

    async fn find_expired(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthToken>> {
        match self.existing_pair(subject_id, channel) {
            Some(rows) => Ok(expired_rows(&rows.lock().await, now)),
            None => Ok(Vec::new()),
        }
    }

    async fn find_latest(&self) -> Result<Option<AuthToken>> {
        let mut latest: Option<AuthToken> = None;
        for rows in self.all_pairs() {
            let rows = rows.lock().await;
            if let Some(candidate) = rows.iter().max_by_key(|t| t.id) {
                if latest.as_ref().map_or(true, |l| candidate.id > l.id) {
                    latest = Some(candidate.clone());
                }
            }
        }
        Ok(latest)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0u64;
        for rows in self.all_pairs() {
            let mut rows = rows.lock().await;
            let before = rows.len();
            rows.retain(|t| !t.is_expired_at(now));
            removed += (before - rows.len()) as u64;
        }
        Ok(removed)
    }

    async fn begin_issue<'a>(
        &'a self,
        subject_id: i64,
        channel: &str,
    ) -> Result<Box<dyn IssueScope + 'a>> {
        let guard = self.pair(subject_id, channel).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryIssueScope {
            store: self,
            guard,
            working,
            subject_id,
            channel: channel.to_string(),
        }))
    }
}

/// Works on a copy of the pair's rows; the copy replaces the stored rows on
/// commit.
pub struct MemoryIssueScope<'a> {
    store: &'a MemoryTokenStore,
    guard: OwnedMutexGuard<Vec<AuthToken>>,
    working: Vec<AuthToken>,
    subject_id: i64,
    channel: String,
}

#[async_trait]
impl IssueScope for MemoryIssueScope<'_> {
    async fn find_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<AuthToken>> {
        Ok(expired_rows(&self.working, now))
    }

    async fn find_valid(&mut self, now: DateTime<Utc>) -> Result<Vec<AuthToken>> {
        Ok(valid_rows(&self.working, now))
    }

    async fn delete(&mut self, token: &AuthToken) -> Result<bool> {
        if !token.belongs_to(self.subject_id, &self.channel) {
            return Ok(false);
        }
        Ok(remove_row(&mut self.working, token.id))
    }

    async fn insert(&mut self, token: NewAuthToken) -> Result<AuthToken> {
        if !(token.subject_id == self.subject_id && token.channel == self.channel) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "issuance scope for subject {} on '{}' cannot insert for subject {} on '{}'",
                self.subject_id,
                self.channel,
                token.subject_id,
                token.channel
            )));
        }
        let stored = token.into_stored(self.store.next_id());
        self.working.push(stored.clone());
        Ok(stored)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryIssueScope {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
