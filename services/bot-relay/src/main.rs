//! Gemini bot relay
//!
//! Operator binary around the credential pool and dispatcher:
//! 1. Loads TOML config and seeds keys from GEMINI_API_KEYS or keys_file
//! 2. `probe` classifies every key by tier and logs the buckets (masked)
//! 3. `keys` prints the masked key listing with the active marker
//! 4. `chat` runs an interactive console conversation through the
//!    dispatcher, exercising rotation and stream throttling end to end

mod config;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use gemini_client::{GeminiHttpClient, GenerativeClient};
use gemini_dispatch::{
    Dispatcher, Markup, MessageHandle, Notices, RenderError, Renderer, Transport, TransportError,
};
use gemini_pool::{Binder, KeyPool, ProbeConfig, probe_pool};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: bot-relay [--config <path>] <chat|probe|keys>";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let command = parse_command(&args);

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let pool = Arc::new(KeyPool::new(http_binder()?));
    let summary = pool.add_all(config.seed_keys()).await;
    info!(
        added = summary.added,
        duplicates = summary.duplicates,
        invalid = summary.invalid,
        bind_failed = summary.bind_failed,
        "pool seeded"
    );
    if pool.is_empty().await {
        anyhow::bail!("no API keys configured — set GEMINI_API_KEYS or keys_file");
    }

    match command.as_deref() {
        Some("probe") => run_probe(&pool, &config).await,
        Some("keys") => run_keys(&pool).await,
        Some("chat") => run_chat(pool, &config).await,
        Some(other) => anyhow::bail!("unknown command `{other}`\n{USAGE}"),
        None => anyhow::bail!("{USAGE}"),
    }
}

/// First positional argument, skipping `--config <path>` pairs.
fn parse_command(args: &[String]) -> Option<String> {
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 2,
            arg if !arg.starts_with("--") => return Some(arg.to_owned()),
            _ => i += 1,
        }
    }
    None
}

/// Binder constructing per-key HTTP clients over one shared connection pool.
fn http_binder() -> Result<Binder> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    Ok(Arc::new(move |key: &str| {
        Ok(Arc::new(GeminiHttpClient::new(http.clone(), key)) as Arc<dyn GenerativeClient>)
    }))
}

async fn run_probe(pool: &KeyPool, config: &Config) -> Result<()> {
    let probe_config = ProbeConfig {
        paid_model: config.models.paid_probe.clone(),
        standard_model: config.models.standard_probe.clone(),
        concurrency: config.probe.concurrency,
    };
    info!(
        paid_model = probe_config.paid_model.as_deref().unwrap_or("(skipped)"),
        standard_model = %probe_config.standard_model,
        concurrency = probe_config.concurrency,
        "probing keys"
    );

    let report = probe_pool(pool, &probe_config).await;
    pool.apply_report(&report).await;

    for (tier, bucket) in [
        ("paid", &report.paid),
        ("standard", &report.standard),
        ("rate_limited", &report.rate_limited),
        ("invalid", &report.invalid),
    ] {
        for key in bucket {
            info!(tier, index = key.index, key = %key.masked, "probe result");
        }
    }
    println!(
        "paid: {}  standard: {}  rate-limited: {}  invalid: {}",
        report.paid.len(),
        report.standard.len(),
        report.rate_limited.len(),
        report.invalid.len()
    );
    Ok(())
}

async fn run_keys(pool: &KeyPool) -> Result<()> {
    for entry in pool.entries().await {
        let marker = if entry.active { " [current]" } else { "" };
        let cooling = entry
            .cooling
            .map(|d| format!(" (cooling {}s)", d.as_secs()))
            .unwrap_or_default();
        println!(
            "{:>3}  {}  {}{}{}",
            entry.index,
            entry.masked,
            entry.tier.label(),
            marker,
            cooling
        );
    }
    Ok(())
}

async fn run_chat(pool: Arc<KeyPool>, config: &Config) -> Result<()> {
    let dispatcher = Dispatcher::new(
        pool,
        Arc::new(ConsoleTransport::default()),
        Arc::new(PlainRenderer),
        Duration::from_millis(config.stream.flush_interval_ms),
        Notices::default(),
    );
    let model = &config.models.chat;
    let origin = MessageHandle {
        chat_id: 0,
        message_id: 0,
    };

    println!("chatting with {model} — /new resets the conversation, /quit exits");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/quit" => break,
            "/new" => {
                dispatcher.reset_session(0, model).await;
                println!("(conversation reset)");
            }
            prompt => {
                if let Err(err) = dispatcher.chat(origin, 0, model, prompt).await {
                    warn!(error = %err, "chat turn failed");
                }
            }
        }
    }
    Ok(())
}

/// Transport that prints edits to stdout. Every flush replaces the whole
/// message on a real transport; on a console each one prints as a line.
#[derive(Default)]
struct ConsoleTransport {
    next_id: AtomicI64,
}

impl Transport for ConsoleTransport {
    fn reply<'a>(
        &'a self,
        to: &'a MessageHandle,
        text: &'a str,
        _markup: Markup,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<MessageHandle, TransportError>> + Send + 'a>>
    {
        let handle = MessageHandle {
            chat_id: to.chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        println!("{text}");
        Box::pin(async move { Ok(handle) })
    }

    fn edit<'a>(
        &'a self,
        _target: &'a MessageHandle,
        text: &'a str,
        _markup: Markup,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), TransportError>> + Send + 'a>> {
        println!("{text}");
        Box::pin(async { Ok(()) })
    }
}

/// Console output carries no markup.
struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, text: &str) -> std::result::Result<String, RenderError> {
        Ok(text.to_owned())
    }
}
