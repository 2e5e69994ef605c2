use crate::error::FetchError;
use crate::market::http::get_json_body;
use crate::market::types::PERCENT_SCALE;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

const TOP_CATEGORY_ICONS: usize = 3;

fn trending_endpoint(base_url: &str) -> String {
    format!("{base_url}/search/trending")
}

fn categories_endpoint(base_url: &str) -> String {
    format!("{base_url}/coins/categories?order=market_cap_desc")
}

fn decimal_from_f64(value: Option<f64>) -> Decimal {
    value
        .and_then(|number| Decimal::try_from(number).ok())
        .unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendingCoin {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub thumb: String,
    pub market_cap_rank: Option<u32>,
    pub price_btc: Decimal,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketCategory {
    pub id: String,
    pub name: String,
    pub market_cap: Decimal,
    pub market_cap_change_24h: Decimal,
    pub volume_24h: Decimal,
    pub top_coin_icons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TrendingEnvelopeWire {
    coins: Vec<TrendingItemWire>,
}

#[derive(Debug, Deserialize)]
struct TrendingItemWire {
    item: TrendingCoinWire,
}

#[derive(Debug, Deserialize)]
struct TrendingCoinWire {
    id: String,
    name: String,
    symbol: String,
    #[serde(default)]
    thumb: String,
    market_cap_rank: Option<u32>,
    price_btc: Option<f64>,
    #[serde(default)]
    score: u32,
}

#[derive(Debug, Deserialize)]
struct CategoryWire {
    id: String,
    name: String,
    market_cap: Option<f64>,
    market_cap_change_24h: Option<f64>,
    volume_24h: Option<f64>,
    #[serde(default)]
    top_3_coins: Vec<String>,
}

impl From<TrendingCoinWire> for TrendingCoin {
    fn from(value: TrendingCoinWire) -> Self {
        Self {
            id: value.id.trim().to_ascii_lowercase(),
            name: value.name,
            symbol: value.symbol,
            thumb: value.thumb,
            market_cap_rank: value.market_cap_rank.filter(|rank| *rank > 0),
            price_btc: decimal_from_f64(value.price_btc),
            score: value.score,
        }
    }
}

impl From<CategoryWire> for MarketCategory {
    fn from(value: CategoryWire) -> Self {
        let mut top_coin_icons = value.top_3_coins;
        top_coin_icons.truncate(TOP_CATEGORY_ICONS);
        Self {
            id: value.id,
            name: value.name,
            market_cap: decimal_from_f64(value.market_cap).round_dp(0),
            market_cap_change_24h: decimal_from_f64(value.market_cap_change_24h)
                .round_dp(PERCENT_SCALE),
            volume_24h: decimal_from_f64(value.volume_24h).round_dp(0),
            top_coin_icons,
        }
    }
}

/// Trending coins in the order the upstream ranks them (`score` ascending).
pub fn parse_trending_payload(payload: &mut [u8]) -> Result<Vec<TrendingCoin>, FetchError> {
    let wire: TrendingEnvelopeWire = simd_json::serde::from_slice(payload)?;
    let mut coins: Vec<TrendingCoin> = wire.coins.into_iter().map(|entry| entry.item.into()).collect();
    coins.sort_by_key(|coin| coin.score);
    Ok(coins)
}

pub fn parse_categories_payload(payload: &mut [u8]) -> Result<Vec<MarketCategory>, FetchError> {
    let wire: Vec<CategoryWire> = simd_json::serde::from_slice(payload)?;
    Ok(wire.into_iter().map(MarketCategory::from).collect())
}

/// One-shot lookups for the trending and categories screens.
#[derive(Debug, Clone)]
pub struct MarketDirectory {
    client: Client,
    base_url: String,
}

impl MarketDirectory {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub async fn trending(&self) -> Result<Vec<TrendingCoin>, FetchError> {
        let endpoint = trending_endpoint(&self.base_url);
        debug!(%endpoint, "requesting trending coins");
        let mut body = get_json_body(&self.client, &endpoint).await?;
        parse_trending_payload(&mut body)
    }

    pub async fn categories(&self) -> Result<Vec<MarketCategory>, FetchError> {
        let endpoint = categories_endpoint(&self.base_url);
        debug!(%endpoint, "requesting market categories");
        let mut body = get_json_body(&self.client, &endpoint).await?;
        parse_categories_payload(&mut body)
    }
}
