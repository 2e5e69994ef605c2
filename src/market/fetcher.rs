use crate::error::FetchError;
use crate::market::types::Coin;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Paginated coin snapshot collaborator. Pages are 1-based.
#[async_trait]
pub trait CoinSource: Send + Sync {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<Coin>, FetchError>;
}

/// Last successful snapshot per `(page, per_page)`.
///
/// Replaced on every success and only read on failure.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    pages: HashMap<(u32, u32), Vec<Coin>>,
}

impl SnapshotCache {
    pub fn store(&mut self, page: u32, per_page: u32, coins: Vec<Coin>) {
        self.pages.insert((page, per_page), coins);
    }

    pub fn get(&self, page: u32, per_page: u32) -> Option<&Vec<Coin>> {
        self.pages.get(&(page, per_page))
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub page: u32,
    pub coins: Vec<Coin>,
    pub stale: bool,
}

#[derive(Clone)]
pub struct SnapshotFetcher {
    source: Arc<dyn CoinSource>,
    cache: Arc<Mutex<SnapshotCache>>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SnapshotFetcher {
    pub fn new(
        source: Arc<dyn CoinSource>,
        cache: Arc<Mutex<SnapshotCache>>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Fetches one page with fixed-delay retries, falling back to the cached
    /// copy of that page once every attempt has failed.
    pub async fn fetch(&self, page: u32, per_page: u32) -> Result<FetchOutcome, FetchError> {
        let mut attempt = 0_u32;
        let last_error = loop {
            attempt += 1;
            match self.source.fetch_page(page, per_page).await {
                Ok(coins) => {
                    self.cache.lock().store(page, per_page, coins.clone());
                    return Ok(FetchOutcome {
                        page,
                        coins,
                        stale: false,
                    });
                }
                Err(error) => {
                    warn!(page, attempt, max_attempts = self.max_attempts, %error, "coin snapshot fetch failed");
                    if attempt >= self.max_attempts {
                        break error;
                    }
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        };

        let cached = self.cache.lock().get(page, per_page).cloned();
        match cached {
            Some(coins) => {
                info!(page, "serving cached coin snapshot after exhausting retries");
                Ok(FetchOutcome {
                    page,
                    coins,
                    stale: true,
                })
            }
            None => Err(last_error),
        }
    }
}
