use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};

use super::{IssueScope, TokenStore};
use crate::errors::{AppError, Result};
use crate::models::token::{AuthToken, NewAuthToken};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// -- Queries shared by the pool and the issuance transaction --

async fn insert_token<'e>(exec: impl PgExecutor<'e>, token: &NewAuthToken) -> Result<AuthToken> {
    let row = sqlx::query_as::<_, AuthToken>(
        r#"INSERT INTO auth_tokens (subject_id, channel, value, created_at, updated_at, expires_at)
           VALUES ($1, $2, $3, $4, $4, $5)
           RETURNING id, subject_id, channel, value, created_at, updated_at, expires_at"#,
    )
    .bind(token.subject_id)
    .bind(&token.channel)
    .bind(&token.value)
    .bind(token.created_at)
    .bind(token.expires_at)
    .fetch_one(exec)
    .await?;
    Ok(row)
}

async fn delete_token<'e>(exec: impl PgExecutor<'e>, token: &AuthToken) -> Result<bool> {
    let result = sqlx::query(
        "DELETE FROM auth_tokens WHERE id = $1 AND subject_id = $2 AND channel = $3",
    )
    .bind(token.id)
    .bind(token.subject_id)
    .bind(&token.channel)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn select_valid<'e>(
    exec: impl PgExecutor<'e>,
    subject_id: i64,
    channel: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AuthToken>> {
    let rows = sqlx::query_as::<_, AuthToken>(
        r#"SELECT id, subject_id, channel, value, created_at, updated_at, expires_at
           FROM auth_tokens
           WHERE subject_id = $1 AND channel = $2
             AND (expires_at IS NULL OR expires_at > $3)
           ORDER BY id ASC"#,
    )
    .bind(subject_id)
    .bind(channel)
    .bind(now)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

async fn select_expired<'e>(
    exec: impl PgExecutor<'e>,
    subject_id: i64,
    channel: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AuthToken>> {
    // NULL < $3 is NULL, so never-expiring rows cannot match
    let rows = sqlx::query_as::<_, AuthToken>(
        r#"SELECT id, subject_id, channel, value, created_at, updated_at, expires_at
           FROM auth_tokens
           WHERE subject_id = $1 AND channel = $2 AND expires_at < $3
           ORDER BY id ASC"#,
    )
    .bind(subject_id)
    .bind(channel)
    .bind(now)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert(&self, token: NewAuthToken) -> Result<AuthToken> {
        insert_token(&self.pool, &token).await
    }

    async fn delete(&self, token: &AuthToken) -> Result<bool> {
        delete_token(&self.pool, token).await
    }

    async fn find_valid(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthToken>> {
        select_valid(&self.pool, subject_id, channel, now).await
    }

    async fn find_expired(
        &self,
        subject_id: i64,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthToken>> {
        select_expired(&self.pool, subject_id, channel, now).await
    }

    async fn find_latest(&self) -> Result<Option<AuthToken>> {
        let row = sqlx::query_as::<_, AuthToken>(
            "SELECT id, subject_id, channel, value, created_at, updated_at, expires_at FROM auth_tokens ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn begin_issue<'a>(
        &'a self,
        subject_id: i64,
        channel: &str,
    ) -> Result<Box<dyn IssueScope + 'a>> {
        let mut tx = self.pool.begin().await?;

        // Serializes issuance per pair; released when the transaction ends.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(pair_lock_key(subject_id, channel))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgIssueScope {
            tx,
            subject_id,
            channel: channel.to_string(),
        }))
    }
}

fn pair_lock_key(subject_id: i64, channel: &str) -> String {
    format!("auth_tokens:{}:{}", subject_id, channel)
}

/// Issuance transaction holding the pair's advisory lock.
pub struct PgIssueScope {
    tx: Transaction<'static, Postgres>,
    subject_id: i64,
    channel: String,
}

#[async_trait]
impl IssueScope for PgIssueScope {
    async fn find_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<AuthToken>> {
        select_expired(&mut *self.tx, self.subject_id, &self.channel, now).await
    }

    async fn find_valid(&mut self, now: DateTime<Utc>) -> Result<Vec<AuthToken>> {
        select_valid(&mut *self.tx, self.subject_id, &self.channel, now).await
    }

    async fn delete(&mut self, token: &AuthToken) -> Result<bool> {
        if !token.belongs_to(self.subject_id, &self.channel) {
            return Ok(false);
        }
        delete_token(&mut *self.tx, token).await
    }

    async fn insert(&mut self, token: NewAuthToken) -> Result<AuthToken> {
        if token.subject_id != self.subject_id || token.channel != self.channel {
            return Err(AppError::Internal(anyhow::anyhow!(
                "issuance scope for subject {} on '{}' cannot insert for subject {} on '{}'",
                self.subject_id,
                self.channel,
                token.subject_id,
                token.channel
            )));
        }
        insert_token(&mut *self.tx, &token).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
