use serde::Deserialize;

pub const DEFAULT_CHANNEL: &str = "remember_device";
/// 30 days.
pub const DEFAULT_TTL_SECS: u64 = 30 * 24 * 3600;
pub const DEFAULT_VALUE_LENGTH: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    /// Channel used when the caller does not name one.
    /// Set via REMEMBER_DEVICE_CHANNEL. Default: "remember_device".
    pub channel: String,
    /// Lifetime of issued tokens. 0 = never expire.
    /// Set via REMEMBER_DEVICE_TTL_SECS. Default: 30 days.
    pub ttl_secs: u64,
    /// Number of characters in an issued value.
    /// Set via REMEMBER_DEVICE_VALUE_LENGTH. Default: 64.
    pub value_length: usize,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let value_length = std::env::var("REMEMBER_DEVICE_VALUE_LENGTH")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_VALUE_LENGTH);
    if value_length == 0 {
        anyhow::bail!("REMEMBER_DEVICE_VALUE_LENGTH must be greater than zero");
    }

    let channel = std::env::var("REMEMBER_DEVICE_CHANNEL")
        .ok()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL.into());

    Ok(Config {
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/remember_device".into()),
        max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5),
        channel,
        ttl_secs: std::env::var("REMEMBER_DEVICE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS),
        value_length,
    })
}
