use crate::config::DashboardConfig;
use crate::error::{AppError, FetchError};
use crate::market::fetcher::{CoinSource, FetchOutcome, SnapshotCache, SnapshotFetcher};
use crate::market::flash::MarkerBoard;
use crate::market::merge::CoinBook;
use crate::market::persistence::{load_watchlist, save_watchlist};
use crate::market::reconciler::{apply_price_message, PriceChange, PriceFeed, PriceFrame};
use crate::market::supervisor::{ConnectionSupervisor, SupervisorAction};
use crate::market::types::{
    now_unix_ms, price_epsilon, CoinListView, ConnectionState, PriceDirection,
};
use crate::market::views::{search, watchlist_view, DerivedLists};
use crate::market::watchlist::Watchlist;
use crate::state::DashboardHandle;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// All list state owned by the dashboard loop.
#[derive(Debug)]
pub struct CoinListCore {
    book: CoinBook,
    markers: MarkerBoard,
    watchlist: Watchlist,
    derived: DerivedLists,
    movers_limit: usize,
    search: String,
    page: u32,
    loading: bool,
    error: Option<String>,
    last_update_ms: Option<i64>,
}

impl CoinListCore {
    pub fn new(flash_duration: Duration, movers_limit: usize, watchlist: Watchlist) -> Self {
        Self {
            book: CoinBook::default(),
            markers: MarkerBoard::new(flash_duration),
            watchlist,
            derived: DerivedLists::default(),
            movers_limit,
            search: String::new(),
            page: 1,
            loading: false,
            error: None,
            last_update_ms: None,
        }
    }

    pub fn book(&self) -> &CoinBook {
        &self.book
    }

    pub fn markers(&self) -> &MarkerBoard {
        &self.markers
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.book.is_empty()
    }

    /// Merges a fetched page. Prices that moved between snapshots of coins
    /// the stream is not tracking get a marker too.
    pub fn apply_snapshot(&mut self, outcome: FetchOutcome, now: Instant) -> Vec<String> {
        let previous_prices: HashMap<String, Decimal> = self
            .book
            .entries()
            .iter()
            .map(|entry| (entry.coin.id.clone(), entry.coin.current_price))
            .collect();

        let removed = self.book.merge_page(outcome.page, outcome.coins);
        for coin_id in &removed {
            self.markers.forget(coin_id);
        }

        for entry in self.book.entries().iter().filter(|entry| !entry.live) {
            let Some(previous_price) = previous_prices.get(&entry.coin.id).copied() else {
                continue;
            };
            let price = entry.coin.current_price;
            if (price - previous_price).abs() > price_epsilon() {
                self.markers.record(
                    &entry.coin.id,
                    previous_price,
                    PriceDirection::between(previous_price, price),
                    now,
                );
            }
        }

        if outcome.stale {
            debug!(page = outcome.page, "merged cached snapshot");
        }
        self.error = None;
        self.last_update_ms = Some(now_unix_ms());
        self.recompute_movers(now_unix_ms());
        removed
    }

    pub fn apply_fetch_failure(&mut self, error: &FetchError) {
        self.error = Some(error.user_message().to_string());
    }

    pub fn apply_stream_payload(&mut self, payload: &mut [u8], now: Instant) -> Vec<PriceChange> {
        let changes = apply_price_message(&mut self.book, &mut self.markers, payload, now);
        if !changes.is_empty() {
            self.last_update_ms = Some(now_unix_ms());
        }
        changes
    }

    pub fn next_flash_deadline(&self) -> Option<Instant> {
        self.markers.next_deadline()
    }

    pub fn expire_flashes(&mut self, now: Instant) -> usize {
        self.markers.expire(now)
    }

    pub fn recompute_movers(&mut self, now_ms: i64) {
        self.derived = DerivedLists::compute(&self.book.coins(), self.movers_limit, now_ms);
    }

    pub fn set_search(&mut self, text: impl Into<String>) {
        self.search = text.into();
    }

    /// Returns whether the coin is watched after the toggle.
    pub fn toggle_watchlist(&mut self, coin_id: &str) -> bool {
        self.watchlist.toggle(coin_id)
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn view(&self, connection: ConnectionState, live_mode: bool) -> CoinListView {
        let coins = self.book.coins();
        CoinListView {
            filtered: search(&coins, &self.search),
            watchlist_coins: watchlist_view(&coins, &self.watchlist),
            gainers: self.derived.gainers.clone(),
            losers: self.derived.losers.clone(),
            movers_updated_at_ms: self.derived.computed_at_ms,
            watchlist: self.watchlist.ids(),
            markers: self.markers.markers().clone(),
            search: self.search.clone(),
            page: self.page,
            loading: self.loading,
            error: self.error.clone(),
            connection,
            live_mode,
            last_update_ms: self.last_update_ms,
            coins,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardCommand {
    SetSearch(String),
    ToggleWatchlist(String),
    SetLiveMode(bool),
    Retry,
    SetPage(u32),
    LoadMore,
}

#[derive(Debug)]
pub enum LoopEvent {
    Fetched {
        page: u32,
        result: Result<FetchOutcome, FetchError>,
    },
    TransportOpened {
        generation: u64,
    },
    TransportFrame {
        generation: u64,
        payload: Vec<u8>,
    },
    TransportClosed {
        generation: u64,
    },
    TransportErrored {
        generation: u64,
        reason: String,
    },
}

struct TransportHandle {
    generation: u64,
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

async fn run_transport(
    feed: Arc<dyn PriceFeed>,
    generation: u64,
    events: mpsc::Sender<LoopEvent>,
    cancel_token: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel_token.cancelled() => return,
        connected = feed.connect() => connected,
    };

    let mut frames = match connected {
        Ok(frames) => frames,
        Err(error) => {
            warn!(generation, %error, "price stream connect failed");
            let _ = events
                .send(LoopEvent::TransportErrored {
                    generation,
                    reason: error.to_string(),
                })
                .await;
            return;
        }
    };

    if events
        .send(LoopEvent::TransportOpened { generation })
        .await
        .is_err()
    {
        return;
    }

    loop {
        let next_frame = tokio::select! {
            _ = cancel_token.cancelled() => return,
            next_frame = frames.next() => next_frame,
        };

        let event = match next_frame {
            Some(Ok(PriceFrame::Payload(payload))) => LoopEvent::TransportFrame {
                generation,
                payload,
            },
            Some(Ok(PriceFrame::Closed)) | None => {
                let _ = events.send(LoopEvent::TransportClosed { generation }).await;
                return;
            }
            Some(Err(error)) => {
                warn!(generation, %error, "price stream frame error");
                let _ = events
                    .send(LoopEvent::TransportErrored {
                        generation,
                        reason: error.to_string(),
                    })
                    .await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

struct DashboardLoop {
    config: DashboardConfig,
    core: CoinListCore,
    supervisor: ConnectionSupervisor,
    fetcher: SnapshotFetcher,
    feed: Arc<dyn PriceFeed>,
    pool: SqlitePool,
    events_tx: mpsc::Sender<LoopEvent>,
    events_rx: mpsc::Receiver<LoopEvent>,
    commands: mpsc::Receiver<DashboardCommand>,
    view_tx: watch::Sender<Arc<CoinListView>>,
    cancel_token: CancellationToken,
    transport: Option<TransportHandle>,
    fetches_in_flight: usize,
}

impl DashboardLoop {
    fn publish(&mut self) {
        self.core.set_loading(self.fetches_in_flight > 0);
        let view = self
            .core
            .view(self.supervisor.state(), self.supervisor.live_mode());
        self.view_tx.send_replace(Arc::new(view));
    }

    fn spawn_fetch(&mut self, page: u32) {
        self.fetches_in_flight += 1;
        let fetcher = self.fetcher.clone();
        let events = self.events_tx.clone();
        let cancel_token = self.cancel_token.clone();
        let per_page = self.config.page_size;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel_token.cancelled() => return,
                result = fetcher.fetch(page, per_page) => result,
            };
            let _ = events.send(LoopEvent::Fetched { page, result }).await;
        });
    }

    fn close_transport(&mut self) {
        if let Some(handle) = self.transport.take() {
            debug!(generation = handle.generation, "closing price stream");
            handle.cancellation_token.cancel();
        }
    }

    fn open_transport(&mut self, generation: u64) {
        self.close_transport();
        let cancellation_token = self.cancel_token.child_token();
        let join_handle = tokio::spawn(run_transport(
            Arc::clone(&self.feed),
            generation,
            self.events_tx.clone(),
            cancellation_token.clone(),
        ));
        self.transport = Some(TransportHandle {
            generation,
            cancellation_token,
            join_handle,
        });
    }

    fn apply_actions(&mut self, actions: Vec<SupervisorAction>) {
        for action in actions {
            match action {
                SupervisorAction::OpenTransport { generation } => self.open_transport(generation),
                SupervisorAction::CloseTransport => self.close_transport(),
                SupervisorAction::FetchSnapshot => self.spawn_fetch(self.core.page()),
                SupervisorAction::ScheduleReconnect { at } => {
                    debug!(in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64, "reconnect scheduled");
                }
                SupervisorAction::CancelReconnect => debug!("pending reconnect cancelled"),
            }
        }
    }

    fn forget_transport(&mut self, generation: u64) {
        if self
            .transport
            .as_ref()
            .is_some_and(|handle| handle.generation == generation)
        {
            self.transport = None;
        }
    }

    async fn handle_command(&mut self, command: DashboardCommand) {
        match command {
            DashboardCommand::SetSearch(text) => self.core.set_search(text),
            DashboardCommand::ToggleWatchlist(coin_id) => {
                let watched = self.core.toggle_watchlist(&coin_id);
                debug!(%coin_id, watched, "watchlist toggled");
                if let Err(error) = save_watchlist(&self.pool, self.core.watchlist()).await {
                    warn!(%error, "failed to persist watchlist");
                }
            }
            DashboardCommand::SetLiveMode(enabled) => {
                info!(enabled, "live mode changed");
                let actions = if enabled {
                    self.supervisor.enable()
                } else {
                    self.supervisor.disable()
                };
                self.apply_actions(actions);
            }
            DashboardCommand::Retry => {
                self.core.clear_error();
                self.spawn_fetch(self.core.page());
            }
            DashboardCommand::SetPage(page) => {
                self.core.set_page(page);
                self.spawn_fetch(self.core.page());
            }
            DashboardCommand::LoadMore => {
                self.core.set_page(self.core.page().saturating_add(1));
                self.spawn_fetch(self.core.page());
            }
        }
    }

    fn handle_event(&mut self, event: LoopEvent) {
        let now = Instant::now();
        match event {
            LoopEvent::Fetched { page, result } => {
                self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);
                match result {
                    Ok(outcome) => {
                        let removed = self.core.apply_snapshot(outcome, now);
                        debug!(page, tracked = self.core.book().len(), removed = removed.len(), "snapshot merged");
                    }
                    Err(error) => {
                        warn!(page, %error, "coin snapshot unavailable");
                        self.core.apply_fetch_failure(&error);
                    }
                }
            }
            LoopEvent::TransportOpened { generation } => {
                let actions = self.supervisor.on_open(generation);
                self.apply_actions(actions);
            }
            LoopEvent::TransportFrame {
                generation,
                mut payload,
            } => {
                if generation == self.supervisor.generation()
                    && self.supervisor.state() == ConnectionState::Connected
                {
                    self.core.apply_stream_payload(&mut payload, now);
                }
            }
            LoopEvent::TransportClosed { generation } => {
                self.forget_transport(generation);
                let actions = self.supervisor.on_close(generation, now);
                self.apply_actions(actions);
            }
            LoopEvent::TransportErrored { generation, reason } => {
                debug!(generation, %reason, "price stream errored");
                self.forget_transport(generation);
                let actions = self.supervisor.on_error(generation, now);
                self.apply_actions(actions);
            }
        }
    }

    async fn run(mut self) {
        let timings = self.config.timings;
        let start = Instant::now();
        let mut refresh = tokio::time::interval_at(start + timings.refresh_interval, timings.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut movers = tokio::time::interval_at(start + timings.movers_interval, timings.movers_interval);
        movers.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.spawn_fetch(self.core.page());
        if self.config.live_mode {
            let actions = self.supervisor.enable();
            self.apply_actions(actions);
        }
        self.publish();

        loop {
            let refresh_enabled = self.supervisor.live_mode() && !self.core.is_empty();
            let flash_deadline = self.core.next_flash_deadline();
            let reconnect_deadline = self.supervisor.reconnect_at();

            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command).await;
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = refresh.tick(), if refresh_enabled => {
                    self.spawn_fetch(self.core.page());
                }
                _ = movers.tick() => self.core.recompute_movers(now_unix_ms()),
                _ = sleep_until_deadline(flash_deadline), if flash_deadline.is_some() => {
                    self.core.expire_flashes(Instant::now());
                }
                _ = sleep_until_deadline(reconnect_deadline), if reconnect_deadline.is_some() => {
                    let actions = self.supervisor.on_reconnect_timer(Instant::now());
                    self.apply_actions(actions);
                }
            }

            self.publish();
        }

        if let Some(handle) = self.transport.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }
        info!("dashboard loop stopped");
    }
}

/// Rehydrates the watchlist and starts the loop that owns all list state.
pub async fn start_dashboard(
    config: DashboardConfig,
    source: Arc<dyn CoinSource>,
    feed: Arc<dyn PriceFeed>,
    pool: SqlitePool,
) -> Result<DashboardHandle, AppError> {
    let watchlist = load_watchlist(&pool).await?;
    info!(watched = watchlist.len(), page_size = config.page_size, live_mode = config.live_mode, "starting dashboard");

    let timings = config.timings;
    let core = CoinListCore::new(timings.flash_duration, timings.movers_limit, watchlist);
    let supervisor = ConnectionSupervisor::new(timings.reconnect_delay);
    let fetcher = SnapshotFetcher::new(
        source,
        Arc::new(Mutex::new(SnapshotCache::default())),
        timings.fetch_max_attempts,
        timings.fetch_retry_delay,
    );

    let initial_view = core.view(supervisor.state(), supervisor.live_mode());
    let (view_tx, view_rx) = watch::channel(Arc::new(initial_view));
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancellation_token = CancellationToken::new();

    let dashboard_loop = DashboardLoop {
        config,
        core,
        supervisor,
        fetcher,
        feed,
        pool,
        events_tx,
        events_rx,
        commands: commands_rx,
        view_tx,
        cancel_token: cancellation_token.clone(),
        transport: None,
        fetches_in_flight: 0,
    };
    let join_handle = tokio::spawn(dashboard_loop.run());

    Ok(DashboardHandle::new(
        commands_tx,
        view_rx,
        cancellation_token,
        join_handle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fetcher::tests::sample_coin;

    fn core() -> CoinListCore {
        CoinListCore::new(Duration::from_secs(1), 20, Watchlist::default())
    }

    fn outcome(page: u32, coins: Vec<crate::market::types::Coin>) -> FetchOutcome {
        FetchOutcome {
            page,
            coins,
            stale: false,
        }
    }

    #[test]
    fn snapshot_then_tick_updates_view() {
        let start = Instant::now();
        let mut core = core();
        core.apply_snapshot(outcome(1, vec![sample_coin("btc", 1, 50_000)]), start);

        let mut payload = br#"{"btc":"50500"}"#.to_vec();
        let changes = core.apply_stream_payload(&mut payload, start);
        assert_eq!(changes.len(), 1);

        let view = core.view(ConnectionState::Connected, true);
        assert_eq!(view.coins[0].current_price.to_string(), "50500.00000000");
        assert_eq!(
            view.markers.get("btc").and_then(|marker| marker.flash),
            Some(PriceDirection::Increase)
        );

        core.expire_flashes(start + Duration::from_millis(1_000));
        let view = core.view(ConnectionState::Connected, true);
        let marker = view.markers.get("btc").expect("marker kept");
        assert_eq!(marker.flash, None);
        assert_eq!(marker.last_change, Some(PriceDirection::Increase));
    }

    #[test]
    fn snapshot_price_moves_flash_coins_the_stream_does_not_track() {
        let start = Instant::now();
        let mut core = core();
        core.apply_snapshot(outcome(1, vec![sample_coin("eth", 2, 3_000)]), start);
        core.apply_snapshot(outcome(1, vec![sample_coin("eth", 2, 2_900)]), start);

        let marker = core.markers().marker("eth").expect("snapshot delta recorded");
        assert_eq!(marker.flash, Some(PriceDirection::Decrease));
        assert_eq!(marker.previous_price, Decimal::new(3_000, 0));
    }

    #[test]
    fn movers_do_not_follow_every_tick() {
        let start = Instant::now();
        let mut core = core();
        let mut btc = sample_coin("btc", 1, 100);
        btc.price_change_percentage_24h = Decimal::new(-5, 0);
        core.apply_snapshot(outcome(1, vec![btc]), start);
        assert_eq!(core.view(ConnectionState::Disconnected, false).losers.len(), 1);

        let mut payload = br#"{"btc":"200"}"#.to_vec();
        core.apply_stream_payload(&mut payload, start);
        let view = core.view(ConnectionState::Connected, true);
        assert_eq!(view.losers.len(), 1);
        assert!(view.gainers.is_empty());

        core.recompute_movers(now_unix_ms());
        let view = core.view(ConnectionState::Connected, true);
        assert!(view.losers.is_empty());
        assert_eq!(view.gainers.len(), 1);
    }

    #[test]
    fn removed_coins_drop_their_markers() {
        let start = Instant::now();
        let mut core = core();
        core.apply_snapshot(
            outcome(1, vec![sample_coin("btc", 1, 100), sample_coin("xrp", 3, 1)]),
            start,
        );
        let mut payload = br#"{"xrp":"2"}"#.to_vec();
        core.apply_stream_payload(&mut payload, start);
        assert!(core.markers().marker("xrp").is_some());

        core.apply_snapshot(outcome(1, vec![sample_coin("btc", 1, 100)]), start);
        assert!(core.markers().marker("xrp").is_none());
        assert_eq!(core.next_flash_deadline(), None);
    }

    #[test]
    fn fetch_failure_surfaces_user_message_until_next_success() {
        let start = Instant::now();
        let mut core = core();
        core.apply_fetch_failure(&FetchError::RateLimited);
        assert_eq!(core.error(), Some(FetchError::RateLimited.user_message()));

        core.apply_snapshot(outcome(1, vec![sample_coin("btc", 1, 100)]), start);
        assert_eq!(core.error(), None);
    }

    #[test]
    fn view_applies_search_and_watchlist() {
        let start = Instant::now();
        let mut core = CoinListCore::new(
            Duration::from_secs(1),
            20,
            Watchlist::from_ids(["eth"]),
        );
        core.apply_snapshot(
            outcome(1, vec![sample_coin("btc", 1, 100), sample_coin("eth", 2, 10)]),
            start,
        );
        core.set_search("BT");

        let view = core.view(ConnectionState::Disconnected, false);
        assert_eq!(view.coins.len(), 2);
        assert_eq!(view.filtered.len(), 1);
        assert_eq!(view.filtered[0].id, "btc");
        assert_eq!(view.watchlist, vec!["eth".to_string()]);
        assert_eq!(view.watchlist_coins[0].id, "eth");

        assert!(core.toggle_watchlist("btc"));
        assert_eq!(core.view(ConnectionState::Disconnected, false).watchlist_coins.len(), 2);
    }
}
