use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use redline_rs::checker::GrammarChecker;
use redline_rs::client::RemoteChecker;
use redline_rs::config::Config;
use redline_rs::live::{CheckBackend, LiveHighlighter, LiveState};
use redline_rs::llm::LlmClient;
use redline_rs::render;
use redline_rs::server::{self, AppState};
use redline_rs::session::{self, SessionGate};

#[derive(Parser)]
#[command(name = "redline", version, about = "Live grammar highlighting backed by an LLM")]
struct Cli {
    /// Path to redline.toml (defaults to ./redline.toml, then the user config dir)
    #[arg(long, short, env = "REDLINE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check text typed on stdin, one line at a time, and print highlights
    Live {
        /// Check against a running server instead of calling the LLM directly
        #[arg(long)]
        server: Option<String>,
        #[arg(long, default_value = "user")]
        username: String,
        #[arg(long, env = "REDLINE_PASSWORD", default_value = "password")]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redline_rs=info,redline=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_from_default(),
    };

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Live {
            server,
            username,
            password,
        } => live(config, server, &username, &password).await,
    }
}

fn build_checker(config: &Config) -> Result<GrammarChecker> {
    if !config.is_llm_enabled() {
        tracing::warn!(provider = %config.llm.provider, "LLM is not configured; grammar checks will fail");
    }
    let llm = LlmClient::new(config.clone()).context("failed to build HTTP client")?;
    Ok(GrammarChecker::new(Arc::new(llm), config.checker.decode_mode()))
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let store = session::store_from_config(&config.auth)
        .await
        .context("failed to open session store")?;

    let state = Arc::new(AppState {
        gate: SessionGate::new(store),
        checker: build_checker(&config)?,
        session_ttl_secs: config.auth.session_ttl_secs,
    });

    let app = server::router(state, config.server.max_request_bytes);

    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.server.host.clone()),
        port.unwrap_or(config.server.port)
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, provider = %config.llm.provider, model = %config.get_model(), "redline server ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down...");
        })
        .await
        .context("server failed")?;

    Ok(())
}

async fn live(config: Config, server: Option<String>, username: &str, password: &str) -> Result<()> {
    let backend: Arc<dyn CheckBackend> = match server {
        Some(url) => {
            let remote = RemoteChecker::new(url);
            remote.login(username, password).await.context("login failed")?;
            Arc::new(remote)
        }
        None => Arc::new(build_checker(&config)?),
    };

    let live = LiveHighlighter::spawn(backend, Duration::from_millis(config.checker.debounce_ms));
    let mut updates = live.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            print_state(&state);
        }
    });

    let mut text = String::new();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&line);
        live.edit(text.clone());
    }

    // checks the last edit before returning
    live.shutdown().await;
    // the printer ends once the loop drops its state sender
    if let Err(e) = printer.await {
        tracing::warn!("printer task failed: {}", e);
    }
    Ok(())
}

fn print_state(state: &LiveState) {
    let mut stderr = std::io::stderr().lock();
    let status = if state.checking { " | checking..." } else { "" };
    let _ = writeln!(
        stderr,
        "\x1b[2mwords: {} | characters: {}{}\x1b[0m",
        state.stats.words, state.stats.chars, status
    );
    if state.checking {
        return;
    }
    if let Some(error) = &state.error {
        let _ = writeln!(stderr, "\x1b[31m{error}\x1b[0m");
    }
    let _ = writeln!(stderr, "{}", render::to_ansi(&state.segments()));
}
