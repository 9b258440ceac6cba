use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "poof", about = "poof: text that disappears after one read", version)]
struct Cli {
    /// poof server URL (default: http://localhost:8080 or $POOF_SERVER)
    #[arg(long, env = "POOF_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the poof HTTP server (configured from the environment / .env)
    Serve {
        /// Port to listen on (overrides $PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Host to bind (overrides $HOST)
        #[arg(long)]
        host: Option<String>,
    },
    /// Store a text and print its one-time id
    Create {
        /// Text to store; read from stdin when omitted
        text: Option<String>,
        /// Lifetime, e.g. 30m, 1h, 7d (default: until read)
        #[arg(long)]
        ttl: Option<String>,
        /// Web app base URL; prints a share link instead of the bare id
        #[arg(long, env = "POOF_WEB_URL")]
        web: Option<String>,
    },
    /// Read a text by id (this destroys it)
    Get {
        /// Id returned by `create`
        id: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; variables may come from the real environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,
        Commands::Create { text, ttl, web } => {
            cmd_create(&cli.server, text, ttl.as_deref(), web.as_deref()).await
        }
        Commands::Get { id } => cmd_get(&cli.server, &id).await,
    }
}

/// Server logging: `LOG_LEVEL` as the filter, colours only in development.
fn init_server_tracing() {
    let setting = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let level = setting("LOG_LEVEL").unwrap_or_else(|| "info".into());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    let development = setting("ENVIRONMENT").map_or(true, |e| e == "development");
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(development)
        .with_target(!development)
        .init();
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    init_server_tracing();

    let mut cfg = poof_server::ServerConfig::from_env()?;
    if let Some(host) = host {
        cfg.host = host;
    }
    if let Some(port) = port {
        cfg.port = port;
    }

    poof_server::run(cfg).await
}

async fn cmd_create(
    server: &str,
    text: Option<String>,
    ttl: Option<&str>,
    web: Option<&str>,
) -> Result<()> {
    let ttl_seconds = ttl.map(parse_duration).transpose()?;

    let text = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read text from stdin")?;
            buf
        }
    };
    if text.is_empty() {
        anyhow::bail!("nothing to store: text is empty");
    }

    let body = serde_json::json!({
        "text": text,
        "ttl": ttl_seconds,
    });

    let resp = Client::new()
        .post(format!("{}/text", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("server returned {status}: {error}");
    }

    let id = json["id"].as_str().context("response has no id")?;
    match web {
        Some(base) => println!("{}", share_link(base, id)),
        None => println!("{id}"),
    }
    Ok(())
}

async fn cmd_get(server: &str, id: &str) -> Result<()> {
    let resp = Client::new()
        .get(format!("{}/text/{}", server.trim_end_matches('/'), id))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status.is_success() {
        let value = json["value"].as_str().unwrap_or("");
        println!("{value}");
    } else {
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{error}");
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "1h", "30m", "7d", "5s" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

/// Link to the web app page that reveals the text.
fn share_link(web: &str, id: &str) -> String {
    format!("{}/p/{}", web.trim_end_matches('/'), id)
}
