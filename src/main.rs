//! PADDOCK: race-day betting leaderboard
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the bet store, serves the dashboard API, and keeps the board
//! fresh by re-deriving it from a full snapshot on every poll, with
//! graceful shutdown.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use paddock::config::{self, StoreBackend};
use paddock::dashboard::{self, routes::DashboardState};
use paddock::engine::Board;
use paddock::store::file::JsonFileStore;
use paddock::store::remote::RestStore;
use paddock::store::BetStore;

const BANNER: &str = r#"
 ____   _    ____  ____   ___   ____ _  __
|  _ \ / \  |  _ \|  _ \ / _ \ / ___| |/ /
| |_) / _ \ | | | | | | | | | | |   | ' /
|  __/ ___ \| |_| | |_| | |_| | |___| . \
|_| /_/   \_\____/|____/ \___/ \____|_|\_\

  Race-day betting leaderboard
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        board = %cfg.board.name,
        poll_interval_secs = cfg.board.poll_interval_secs,
        backend = ?cfg.store.backend,
        "PADDOCK starting up"
    );

    // -- Store -----------------------------------------------------------

    let store = open_store(&cfg)?;

    let admin_token = cfg
        .dashboard
        .admin_token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok())
        .map(SecretString::new);
    if admin_token.is_none() {
        warn!("No admin token configured; reset and open/close routes are disabled");
    }

    let state = Arc::new(DashboardState::new(
        store.clone(),
        cfg.board_options(),
        admin_token,
    ));

    // -- Initial board ---------------------------------------------------

    match state.refresh().await {
        Ok(_) => log_board(&*state.board.read().await),
        Err(e) => error!(error = %e, "Initial refresh failed, serving an empty board"),
    }

    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.board.poll_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.board.poll_interval_secs,
        "Entering refresh loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match state.refresh().await {
                    Ok(true) => log_board(&*state.board.read().await),
                    Ok(false) => {}
                    Err(e) => error!(error = %e, "Refresh failed, keeping previous board"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!(store = store.name(), "PADDOCK shut down cleanly.");
    Ok(())
}

/// Build the configured store backend.
fn open_store(cfg: &config::AppConfig) -> Result<Arc<dyn BetStore>> {
    let store: Arc<dyn BetStore> = match cfg.store.backend {
        StoreBackend::File => {
            let path = cfg.store.path.as_deref().unwrap_or("paddock_store.json");
            Arc::new(JsonFileStore::open(path)?)
        }
        StoreBackend::Remote => {
            let url_env = cfg.store.url_env.as_deref().unwrap_or_default();
            let key_env = cfg.store.api_key_env.as_deref().unwrap_or_default();
            let url = config::AppConfig::resolve_env(url_env)?;
            let key = SecretString::new(config::AppConfig::resolve_env(key_env)?);
            Arc::new(RestStore::new(&url, key)?)
        }
    };
    info!(store = store.name(), "Bet store ready");
    Ok(store)
}

/// Log a human-readable summary of the current standings.
fn log_board(board: &Board) {
    let leaders: Vec<&str> = board
        .leaders()
        .iter()
        .map(|e| e.participant.display_name.as_str())
        .collect();

    info!(
        participants = board.entries.len(),
        bets_seen = board.bets_seen,
        valid_bets = board.valid_bets,
        betting_closed = board.betting_closed,
        leaders = ?leaders,
        "Board updated"
    );

    for entry in &board.entries {
        info!("{entry}");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paddock=info"));

    let json_logging = std::env::var("PADDOCK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
