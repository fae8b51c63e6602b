use clap::{Parser, Subcommand};

/// Issue and check remember-device tokens for two-factor bypass
#[derive(Parser)]
#[command(name = "remember-device", version, about)]
pub struct Cli {
    /// Print tokens as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Issue a token, replacing the subject's previous one on the channel
    Issue {
        #[arg(long)]
        subject: i64,
        /// Defaults to REMEMBER_DEVICE_CHANNEL
        #[arg(long)]
        channel: Option<String>,
        /// Lifetime in seconds, 0 = never expires. Defaults to REMEMBER_DEVICE_TTL_SECS
        #[arg(long)]
        ttl: Option<u64>,
        /// Value length in characters. Defaults to REMEMBER_DEVICE_VALUE_LENGTH
        #[arg(long)]
        length: Option<usize>,
    },

    /// Show the live token for a subject
    Validate {
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        channel: Option<String>,
    },

    /// Check a presented value; exits non-zero when it is not accepted
    Verify {
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long, env = "REMEMBER_DEVICE_VALUE")]
        value: String,
    },

    /// Show the most recently issued token
    Latest,

    /// Delete expired tokens for every subject
    Sweep,
}
