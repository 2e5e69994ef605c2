pub mod config;
pub mod db;
pub mod error;
pub mod market;
pub mod state;

use config::DashboardConfig;
use db::initialize_pool;
use error::AppError;
use market::coincap::{CoinCapClient, CoinCapFeed};
use market::directory::MarketDirectory;
use market::format::{format_number, format_percentage, format_price};
use market::pipeline::start_dashboard;
use market::types::CoinListView;
use reqwest::Client;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const REPORT_INTERVAL_MS: u64 = 5_000;
const REPORT_ROWS: usize = 10;
const DIRECTORY_ROWS: usize = 5;

async fn log_directory(directory: &MarketDirectory) {
    match directory.trending().await {
        Ok(trending) => {
            for coin in trending.iter().take(DIRECTORY_ROWS) {
                info!(id = %coin.id, symbol = %coin.symbol, rank = ?coin.market_cap_rank, score = coin.score, "trending");
            }
        }
        Err(error) => warn!(%error, message = error.user_message(), "trending coins unavailable"),
    }

    match directory.categories().await {
        Ok(categories) => {
            for category in categories.iter().take(DIRECTORY_ROWS) {
                info!(
                    id = %category.id,
                    market_cap = %format_price(category.market_cap),
                    change_24h = %format_percentage(category.market_cap_change_24h),
                    "category"
                );
            }
        }
        Err(error) => warn!(%error, message = error.user_message(), "market categories unavailable"),
    }
}

fn log_view(state: &AppState, view: &CoinListView) {
    info!(
        uptime_s = state.started_at.elapsed().as_secs(),
        tracked = view.coins.len(),
        page = view.page,
        connection = ?view.connection,
        live = view.live_mode,
        loading = view.loading,
        watched = view.watchlist.len(),
        "coin list"
    );
    if let Some(error) = view.error.as_deref() {
        warn!(%error, "coin list unavailable");
    }

    for coin in view.filtered.iter().take(REPORT_ROWS) {
        let flash = view
            .markers
            .get(&coin.id)
            .and_then(|marker| marker.flash.or(marker.last_change));
        info!(
            rank = coin.market_cap_rank,
            symbol = %coin.symbol,
            price = %format_price(coin.current_price),
            change_24h = %format_percentage(coin.price_change_percentage_24h),
            volume = %format_number(coin.total_volume),
            direction = ?flash,
            "coin"
        );
    }
}

/// Runs the dashboard against the live CoinCap endpoints until ctrl-c.
pub async fn run(config: DashboardConfig) -> Result<(), AppError> {
    let client = Client::new();
    let db_pool = initialize_pool(&config).await?;

    let directory = MarketDirectory::new(client.clone(), config.directory_base_url.clone());
    log_directory(&directory).await;

    let source = Arc::new(CoinCapClient::new(client, config.api_base_url.clone()));
    let feed = Arc::new(CoinCapFeed::new(config.stream_url.clone()));
    let dashboard = start_dashboard(config, source, feed, db_pool.clone()).await?;
    let state = AppState::new(db_pool, dashboard);

    let mut report = tokio::time::interval(Duration::from_millis(REPORT_INTERVAL_MS));
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown requested");
                break;
            }
            _ = report.tick() => {
                let view = state.dashboard.view();
                log_view(&state, &view);
            }
        }
    }

    let AppState {
        db_pool, dashboard, ..
    } = state;
    dashboard.shutdown().await;
    db_pool.close().await;
    Ok(())
}
