use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored remember-device credential.
///
/// Values are built once at issuance and never mutated afterwards; a new
/// issuance produces a new row rather than refreshing an old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthToken {
    pub id: i64,
    pub subject_id: i64,
    pub channel: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `None` means the token never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// Still usable at `now`. A token expiring exactly at `now` is neither
    /// valid nor expired, matching the strict comparisons used by storage.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Eligible for purging at `now`. Never true for tokens without expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    pub fn belongs_to(&self, subject_id: i64, channel: &str) -> bool {
        self.subject_id == subject_id && self.channel == channel
    }
}

/// Insert form of [`AuthToken`]; storage assigns the id.
#[derive(Debug, Clone)]
pub struct NewAuthToken {
    pub subject_id: i64,
    pub channel: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewAuthToken {
    pub fn into_stored(self, id: i64) -> AuthToken {
        AuthToken {
            id,
            subject_id: self.subject_id,
            channel: self.channel,
            value: self.value,
            created_at: self.created_at,
            updated_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
