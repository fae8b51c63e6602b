use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remember_device::config::{self, Config};
use remember_device::{AuthToken, PgStore, TokenLifecycleManager};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // LOG_FORMAT=json for log shippers, human-readable otherwise
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "remember_device=info".into()),
        ))
        .with(json_logs.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = run(cfg, args).await;
    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run(cfg: Config, args: cli::Cli) -> anyhow::Result<ExitCode> {
    tracing::debug!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url, cfg.max_connections).await?;

    let manager = TokenLifecycleManager::new(db);
    let now = Utc::now();

    match args.command {
        cli::Commands::Migrate => {
            tracing::info!("Running migrations...");
            manager.store().migrate().await?;
            println!("Migrations applied.");
        }
        cli::Commands::Issue {
            subject,
            channel,
            ttl,
            length,
        } => {
            let channel = channel.unwrap_or_else(|| cfg.channel.clone());
            let token = manager
                .issue(
                    subject,
                    &channel,
                    ttl.unwrap_or(cfg.ttl_secs),
                    length.unwrap_or(cfg.value_length),
                )
                .await?;
            print_token(&token, args.json)?;
        }
        cli::Commands::Validate { subject, channel } => {
            let channel = channel.unwrap_or_else(|| cfg.channel.clone());
            match manager.validate(subject, &channel, now).await? {
                Some(token) => print_token(&token, args.json)?,
                None => {
                    println!("No valid token for subject {} on '{}'.", subject, channel);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        cli::Commands::Verify {
            subject,
            channel,
            value,
        } => {
            let channel = channel.unwrap_or_else(|| cfg.channel.clone());
            if manager.verify(subject, &channel, &value, now).await? {
                println!("Token accepted.");
            } else {
                println!("Token rejected.");
                return Ok(ExitCode::FAILURE);
            }
        }
        cli::Commands::Latest => match manager.latest().await? {
            Some(token) => print_token(&token, args.json)?,
            None => println!("No tokens found."),
        },
        cli::Commands::Sweep => {
            let removed = manager.sweep(now).await?;
            println!("Removed {} expired token(s).", removed);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_token(token: &AuthToken, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(token)?);
        return Ok(());
    }

    let expires = token
        .expires_at
        .map(|e| e.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "Token:\n  ID:       {}\n  Subject:  {}\n  Channel:  {}\n  Value:    {}\n  Created:  {}\n  Expires:  {}",
        token.id,
        token.subject_id,
        token.channel,
        token.value,
        token.created_at.to_rfc3339(),
        expires
    );
    Ok(())
}
