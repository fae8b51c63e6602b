use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("secure random source unavailable: {0}")]
    RandomSource(#[from] rand::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// More than one live token for a pair. Issuance is supposed to make
    /// this impossible, so callers must not pick one of them.
    #[error("{count} valid tokens found for subject {subject_id} on channel '{channel}'")]
    DuplicateTokens {
        subject_id: i64,
        channel: String,
        count: usize,
    },

    #[error("token length must be positive, got {0}")]
    InvalidLength(usize),

    #[error("ttl of {0} seconds is out of range")]
    InvalidTtl(u64),

    #[error("channel must not be empty")]
    InvalidChannel,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Storage and randomness failures abort the request; everything else is
    /// a caller mistake or an inconsistency worth reporting.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::RandomSource(_) | AppError::Database(_) | AppError::Internal(_)
        )
    }
}
