use crate::error::AppError;
use crate::market::pipeline::DashboardCommand;
use crate::market::types::{CoinListView, PriceChangeMarker};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// UI-facing handle to a running dashboard loop.
pub struct DashboardHandle {
    commands: mpsc::Sender<DashboardCommand>,
    view: watch::Receiver<Arc<CoinListView>>,
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl DashboardHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<DashboardCommand>,
        view: watch::Receiver<Arc<CoinListView>>,
        cancellation_token: CancellationToken,
        join_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            commands,
            view,
            cancellation_token,
            join_handle,
        }
    }

    /// Latest published view.
    pub fn view(&self) -> Arc<CoinListView> {
        Arc::clone(&self.view.borrow())
    }

    pub fn marker(&self, coin_id: &str) -> Option<PriceChangeMarker> {
        self.view.borrow().markers.get(coin_id).cloned()
    }

    /// A receiver that resolves `changed()` whenever a new view is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CoinListView>> {
        self.view.clone()
    }

    async fn send(&self, command: DashboardCommand) -> Result<(), AppError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::DashboardStopped)
    }

    pub async fn set_search(&self, text: impl Into<String>) -> Result<(), AppError> {
        self.send(DashboardCommand::SetSearch(text.into())).await
    }

    pub async fn toggle_watchlist(&self, coin_id: impl Into<String>) -> Result<(), AppError> {
        self.send(DashboardCommand::ToggleWatchlist(coin_id.into()))
            .await
    }

    pub async fn set_live_mode(&self, enabled: bool) -> Result<(), AppError> {
        self.send(DashboardCommand::SetLiveMode(enabled)).await
    }

    pub async fn retry(&self) -> Result<(), AppError> {
        self.send(DashboardCommand::Retry).await
    }

    pub async fn set_page(&self, page: u32) -> Result<(), AppError> {
        if page == 0 {
            return Err(AppError::InvalidArgument(
                "page numbers start at 1".to_string(),
            ));
        }
        self.send(DashboardCommand::SetPage(page)).await
    }

    pub async fn load_more(&self) -> Result<(), AppError> {
        self.send(DashboardCommand::LoadMore).await
    }

    /// Stops the loop and waits for it, closing any open price stream.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        let _ = self.join_handle.await;
    }
}

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub dashboard: DashboardHandle,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, dashboard: DashboardHandle) -> Self {
        Self {
            started_at: Instant::now(),
            db_pool,
            dashboard,
        }
    }
}
