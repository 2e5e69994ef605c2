use async_trait::async_trait;
use coin_desk::config::{DashboardArgs, DashboardConfig};
use coin_desk::db::initialize_in_memory_pool;
use coin_desk::error::{AppError, FetchError, MESSAGE_NETWORK_UNREACHABLE};
use coin_desk::market::fetcher::CoinSource;
use coin_desk::market::persistence::load_watchlist;
use coin_desk::market::pipeline::start_dashboard;
use coin_desk::market::reconciler::{PriceFeed, PriceFrame, PriceStream};
use coin_desk::market::types::{Coin, CoinListView, ConnectionState, PriceDirection};
use coin_desk::state::DashboardHandle;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

type FrameSender = mpsc::UnboundedSender<Result<PriceFrame, AppError>>;

fn coin(id: &str, rank: u32, price: i64) -> Coin {
    Coin {
        id: id.to_string(),
        symbol: id.to_ascii_uppercase(),
        name: id.to_string(),
        image: String::new(),
        current_price: Decimal::new(price, 0),
        market_cap: Decimal::ZERO,
        market_cap_rank: rank,
        total_volume: Decimal::ZERO,
        price_change_percentage_24h: Decimal::ZERO,
        last_updated: 0,
    }
}

struct FakeSource {
    scripted: Mutex<VecDeque<Result<Vec<Coin>, FetchError>>>,
    fallback: Result<Vec<Coin>, FetchError>,
    calls: AtomicU32,
}

impl FakeSource {
    fn new(
        scripted: Vec<Result<Vec<Coin>, FetchError>>,
        fallback: Result<Vec<Coin>, FetchError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(scripted.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoinSource for FakeSource {
    async fn fetch_page(&self, _page: u32, _per_page: u32) -> Result<Vec<Coin>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scripted.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

struct FakeFeed {
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<PriceFrame, AppError>>>>,
    connects: AtomicU32,
}

impl FakeFeed {
    /// Returns the feed plus one sender per scripted connection.
    fn with_connections(count: usize) -> (Arc<Self>, Vec<FrameSender>) {
        let mut senders = Vec::with_capacity(count);
        let mut receivers = VecDeque::with_capacity(count);
        for _ in 0..count {
            let (sender, receiver) = mpsc::unbounded_channel();
            senders.push(sender);
            receivers.push_back(receiver);
        }
        let feed = Arc::new(Self {
            streams: Mutex::new(receivers),
            connects: AtomicU32::new(0),
        });
        (feed, senders)
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for FakeFeed {
    async fn connect(&self) -> Result<PriceStream, AppError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let receiver = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| AppError::InvalidArgument("no scripted connection left".to_string()))?;
        let frames = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|frame| (frame, receiver))
        });
        Ok(frames.boxed())
    }
}

fn config(live_mode: bool) -> DashboardConfig {
    DashboardArgs {
        live_mode: Some(live_mode),
        ..Default::default()
    }
    .normalize()
    .expect("default arguments are valid")
}

async fn wait_for(
    updates: &mut watch::Receiver<Arc<CoinListView>>,
    predicate: impl Fn(&CoinListView) -> bool,
) -> Arc<CoinListView> {
    let waiting = async {
        loop {
            let view = Arc::clone(&updates.borrow_and_update());
            if predicate(&view) {
                return view;
            }
            updates.changed().await.expect("dashboard loop is alive");
        }
    };
    tokio::time::timeout(Duration::from_secs(120), waiting)
        .await
        .expect("view condition reached in time")
}

async fn start_paused(
    config: DashboardConfig,
    source: Arc<FakeSource>,
    feed: Arc<FakeFeed>,
) -> DashboardHandle {
    let pool = initialize_in_memory_pool().await.expect("pool opens");
    let dashboard = start_dashboard(config, source, feed, pool)
        .await
        .expect("dashboard starts");
    // The loop has not been polled yet, so every timer it creates uses the
    // paused clock.
    tokio::time::pause();
    dashboard
}

fn btc_price(view: &CoinListView) -> Option<Decimal> {
    view.coins
        .iter()
        .find(|coin| coin.id == "btc")
        .map(|coin| coin.current_price)
}

#[tokio::test]
async fn tick_flashes_then_clears_after_one_second() {
    let source = FakeSource::new(Vec::new(), Ok(vec![coin("btc", 1, 50_000)]));
    let (feed, senders) = FakeFeed::with_connections(1);
    let dashboard = start_paused(config(true), source, Arc::clone(&feed)).await;
    let mut updates = dashboard.subscribe();

    wait_for(&mut updates, |view| {
        view.connection == ConnectionState::Connected && !view.coins.is_empty()
    })
    .await;

    senders[0]
        .send(Ok(PriceFrame::Payload(br#"{"btc":"50500"}"#.to_vec())))
        .expect("stream is open");
    let view = wait_for(&mut updates, |view| {
        btc_price(view) == Some(Decimal::new(50_500, 0))
    })
    .await;
    let flashed_at = Instant::now();

    assert_eq!(view.coins[0].current_price.to_string(), "50500.00000000");
    assert_eq!(
        dashboard.marker("btc").and_then(|marker| marker.flash),
        Some(PriceDirection::Increase)
    );

    let view = wait_for(&mut updates, |view| {
        view.markers
            .get("btc")
            .is_some_and(|marker| marker.flash.is_none())
    })
    .await;
    assert!(flashed_at.elapsed() >= Duration::from_secs(1));
    assert_eq!(
        view.markers.get("btc").and_then(|marker| marker.last_change),
        Some(PriceDirection::Increase)
    );
    // Snapshot refreshes do not overwrite the streamed price.
    assert_eq!(btc_price(&view), Some(Decimal::new(50_500, 0)));

    dashboard.shutdown().await;
}

#[tokio::test]
async fn closed_stream_reconnects_after_three_seconds() {
    let source = FakeSource::new(Vec::new(), Ok(vec![coin("btc", 1, 50_000)]));
    let (feed, senders) = FakeFeed::with_connections(2);
    let dashboard = start_paused(config(true), source, Arc::clone(&feed)).await;
    let mut updates = dashboard.subscribe();

    wait_for(&mut updates, |view| view.connection == ConnectionState::Connected).await;
    senders[0]
        .send(Ok(PriceFrame::Closed))
        .expect("stream is open");

    wait_for(&mut updates, |view| {
        view.connection == ConnectionState::ReconnectScheduled
    })
    .await;
    let closed_at = Instant::now();
    assert_eq!(feed.connects(), 1);

    wait_for(&mut updates, |view| view.connection == ConnectionState::Connected).await;
    assert!(closed_at.elapsed() >= Duration::from_secs(3));
    assert_eq!(feed.connects(), 2);
    assert!(dashboard.view().error.is_none());

    dashboard.shutdown().await;
}

#[tokio::test]
async fn disabling_live_mode_during_the_wait_prevents_reconnect() {
    let source = FakeSource::new(Vec::new(), Ok(vec![coin("btc", 1, 50_000)]));
    let (feed, senders) = FakeFeed::with_connections(2);
    let dashboard = start_paused(config(true), source, Arc::clone(&feed)).await;
    let mut updates = dashboard.subscribe();

    wait_for(&mut updates, |view| view.connection == ConnectionState::Connected).await;
    senders[0]
        .send(Err(AppError::MalformedPayload("socket reset".to_string())))
        .expect("stream is open");
    wait_for(&mut updates, |view| {
        view.connection == ConnectionState::ReconnectScheduled
    })
    .await;

    dashboard.set_live_mode(false).await.expect("loop running");
    wait_for(&mut updates, |view| {
        view.connection == ConnectionState::Disconnected && !view.live_mode
    })
    .await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(feed.connects(), 1);
    assert_eq!(dashboard.view().connection, ConnectionState::Disconnected);

    dashboard.shutdown().await;
}

#[tokio::test]
async fn fetch_failures_without_cache_surface_an_error_until_retry() {
    let offline = || Err(FetchError::NetworkUnreachable("offline".to_string()));
    let source = FakeSource::new(
        vec![offline(), offline(), offline()],
        Ok(vec![coin("btc", 1, 50_000)]),
    );
    let (feed, _senders) = FakeFeed::with_connections(0);
    let dashboard = start_paused(config(false), Arc::clone(&source), feed).await;
    let mut updates = dashboard.subscribe();

    let view = wait_for(&mut updates, |view| view.error.is_some()).await;
    assert_eq!(view.error.as_deref(), Some(MESSAGE_NETWORK_UNREACHABLE));
    assert!(view.coins.is_empty());
    assert_eq!(source.calls(), 3);

    dashboard.retry().await.expect("loop running");
    let view = wait_for(&mut updates, |view| {
        view.error.is_none() && !view.coins.is_empty()
    })
    .await;
    assert_eq!(view.coins[0].id, "btc");

    dashboard.shutdown().await;
}

#[tokio::test]
async fn fetch_failures_with_cache_serve_stale_data_silently() {
    let rate_limited = || Err(FetchError::RateLimited);
    let source = FakeSource::new(
        vec![
            Ok(vec![coin("btc", 1, 50_000)]),
            rate_limited(),
            rate_limited(),
            rate_limited(),
        ],
        Ok(Vec::new()),
    );
    let (feed, _senders) = FakeFeed::with_connections(0);
    let dashboard = start_paused(config(false), Arc::clone(&source), feed).await;
    let mut updates = dashboard.subscribe();

    wait_for(&mut updates, |view| !view.coins.is_empty() && !view.loading).await;
    dashboard.set_page(1).await.expect("loop running");

    let calls_source = Arc::clone(&source);
    let view = wait_for(&mut updates, move |view| {
        calls_source.calls() == 4 && !view.loading
    })
    .await;
    assert!(view.error.is_none());
    assert_eq!(btc_price(&view), Some(Decimal::new(50_000, 0)));

    dashboard.shutdown().await;
}

#[tokio::test]
async fn watchlist_toggle_is_persisted() {
    let source = FakeSource::new(Vec::new(), Ok(vec![coin("btc", 1, 50_000)]));
    let (feed, _senders) = FakeFeed::with_connections(0);
    let pool = initialize_in_memory_pool().await.expect("pool opens");
    let dashboard = start_dashboard(config(false), source, feed, pool.clone())
        .await
        .expect("dashboard starts");
    let mut updates = dashboard.subscribe();

    dashboard.toggle_watchlist("btc").await.expect("loop running");
    let view = wait_for(&mut updates, |view| view.watchlist == vec!["btc".to_string()]).await;
    assert!(view.watchlist_coins.iter().all(|coin| coin.id == "btc"));

    let stored = load_watchlist(&pool).await.expect("watchlist loads");
    assert!(stored.contains("btc"));

    dashboard.toggle_watchlist("btc").await.expect("loop running");
    wait_for(&mut updates, |view| view.watchlist.is_empty()).await;
    assert!(load_watchlist(&pool).await.expect("watchlist loads").is_empty());

    dashboard.shutdown().await;
}
