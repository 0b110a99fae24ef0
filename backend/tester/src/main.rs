use std::{env, fs};

use anyhow::{Context, bail};
use chrono::Utc;
use clap::Parser;
use roster::HmacSessions;

/// Mints a `session` cookie the roster server will accept.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// User identifier, also the roster document id.
    #[arg(long)]
    uid: String,

    #[arg(long, default_value_t = 3600)]
    ttl_secs: i64,

    /// Falls back to the SESSION_SECRET environment variable.
    #[arg(long)]
    secret_file: Option<String>,
}

fn secret(args: &Args) -> anyhow::Result<String> {
    match &args.secret_file {
        Some(path) => fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .with_context(|| format!("reading {path}")),
        None => env::var("SESSION_SECRET").context("SESSION_SECRET not set and no --secret-file"),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.ttl_secs <= 0 {
        bail!("--ttl-secs must be positive");
    }

    let sessions = HmacSessions::new(secret(&args)?)?;
    let expires = Utc::now().timestamp() + args.ttl_secs;
    let token = sessions.mint(&args.uid, expires)?;

    println!("session={token}");
    println!("Expires: {}", Utc::now() + chrono::Duration::seconds(args.ttl_secs));

    Ok(())
}
