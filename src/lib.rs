//! Remember-device credentials for two-factor authentication.
//!
//! A subject that passed the second factor can be issued a token per channel
//! that lets later requests skip the challenge until it expires.

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod random;
pub mod store;

pub use errors::{AppError, Result};
pub use lifecycle::TokenLifecycleManager;
pub use models::token::{AuthToken, NewAuthToken};
pub use random::{SecureRandom, ValueGenerator};
pub use store::memory::MemoryTokenStore;
pub use store::postgres::PgStore;
pub use store::{IssueScope, TokenStore};
