use crate::error::{AppError, FetchError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use simd_json::{OwnedValue, StaticNode};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Decimal places kept for every tracked price.
pub const PRICE_SCALE: u32 = 8;
pub const PERCENT_SCALE: u32 = 2;
const COIN_ICON_BASE_URL: &str = "https://assets.coincap.io/assets/icons";

/// Smallest representable price step; deltas at or below it are not changes.
pub fn price_epsilon() -> Decimal {
    Decimal::new(1, PRICE_SCALE)
}

pub fn normalize_price(mut price: Decimal) -> Decimal {
    price.rescale(PRICE_SCALE);
    price
}

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: String,
    pub current_price: Decimal,
    pub market_cap: Decimal,
    pub market_cap_rank: u32,
    pub total_volume: Decimal,
    pub price_change_percentage_24h: Decimal,
    pub last_updated: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Increase,
    Decrease,
}

impl PriceDirection {
    pub fn between(previous: Decimal, next: Decimal) -> Self {
        if next > previous {
            Self::Increase
        } else {
            Self::Decrease
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceChangeMarker {
    pub previous_price: Decimal,
    pub flash: Option<PriceDirection>,
    pub last_change: Option<PriceDirection>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closed,
    Errored,
    ReconnectScheduled,
}

/// Everything the UI layer renders for the coin list.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CoinListView {
    pub coins: Vec<Coin>,
    pub filtered: Vec<Coin>,
    pub gainers: Vec<Coin>,
    pub losers: Vec<Coin>,
    pub movers_updated_at_ms: Option<i64>,
    pub watchlist: Vec<String>,
    pub watchlist_coins: Vec<Coin>,
    pub markers: HashMap<String, PriceChangeMarker>,
    pub search: String,
    pub page: u32,
    pub loading: bool,
    pub error: Option<String>,
    pub connection: ConnectionState,
    pub live_mode: bool,
    pub last_update_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssetsEnvelopeWire {
    pub data: Vec<AssetWire>,
}

#[derive(Debug, Deserialize)]
pub struct AssetWire {
    pub id: String,
    pub rank: String,
    pub symbol: String,
    pub name: String,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    #[serde(rename = "marketCapUsd")]
    pub market_cap_usd: Option<String>,
    #[serde(rename = "volumeUsd24Hr")]
    pub volume_usd_24h: Option<String>,
    #[serde(rename = "changePercent24Hr")]
    pub change_percent_24h: Option<String>,
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

fn parse_optional_decimal(raw: Option<&str>) -> Decimal {
    raw.and_then(parse_decimal).unwrap_or(Decimal::ZERO)
}

impl TryFrom<AssetWire> for Coin {
    type Error = FetchError;

    fn try_from(value: AssetWire) -> Result<Self, Self::Error> {
        let rank = value
            .rank
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|rank| *rank > 0)
            .ok_or_else(|| {
                FetchError::MalformedPayload(format!(
                    "asset '{}' has invalid rank '{}'",
                    value.id, value.rank
                ))
            })?;

        let price = value
            .price_usd
            .as_deref()
            .and_then(parse_decimal)
            .filter(|price| price.is_sign_positive() && !price.is_zero())
            .ok_or_else(|| {
                FetchError::MalformedPayload(format!("asset '{}' has no valid price", value.id))
            })?;

        let symbol_lower = value.symbol.to_ascii_lowercase();
        Ok(Self {
            id: value.id.trim().to_ascii_lowercase(),
            image: format!("{COIN_ICON_BASE_URL}/{symbol_lower}@2x.png"),
            symbol: value.symbol,
            name: value.name,
            current_price: normalize_price(price),
            market_cap: parse_optional_decimal(value.market_cap_usd.as_deref()),
            market_cap_rank: rank,
            total_volume: parse_optional_decimal(value.volume_usd_24h.as_deref()),
            price_change_percentage_24h: parse_optional_decimal(
                value.change_percent_24h.as_deref(),
            )
            .round_dp(PERCENT_SCALE),
            last_updated: now_unix_ms(),
        })
    }
}

pub fn parse_assets_payload(payload: &mut [u8]) -> Result<Vec<Coin>, FetchError> {
    let wire: AssetsEnvelopeWire = simd_json::serde::from_slice(payload)?;
    let mut coins = Vec::with_capacity(wire.data.len());
    for asset in wire.data {
        coins.push(asset.try_into()?);
    }
    Ok(coins)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub coin_id: String,
    pub price: Decimal,
}

fn parse_price_value(value: &OwnedValue) -> Option<Decimal> {
    let price = match value {
        OwnedValue::String(text) => parse_decimal(text),
        OwnedValue::Static(StaticNode::I64(number)) => Some(Decimal::from(*number)),
        OwnedValue::Static(StaticNode::U64(number)) => Some(Decimal::from(*number)),
        OwnedValue::Static(StaticNode::F64(number)) => Decimal::try_from(*number).ok(),
        _ => None,
    }?;

    if price.is_sign_negative() || price.is_zero() {
        return None;
    }
    Some(normalize_price(price))
}

/// Decodes one `{ coinId: priceString }` message.
///
/// A payload that is not a JSON object fails as a whole. Individual entries
/// with unusable prices are logged and skipped so the remaining entries of
/// the same message still apply.
pub fn parse_price_ticks(payload: &mut [u8]) -> Result<Vec<PriceTick>, AppError> {
    let value = simd_json::to_owned_value(payload)?;
    let OwnedValue::Object(entries) = value else {
        return Err(AppError::MalformedPayload(
            "price message is not a JSON object".to_string(),
        ));
    };

    let mut ticks = Vec::with_capacity(entries.len());
    for (coin_id, raw_price) in entries.iter() {
        match parse_price_value(raw_price) {
            Some(price) => ticks.push(PriceTick {
                coin_id: coin_id.trim().to_ascii_lowercase(),
                price,
            }),
            None => warn!(coin_id = %coin_id, "ignoring malformed price tick"),
        }
    }

    ticks.sort_by(|left, right| left.coin_id.cmp(&right.coin_id));
    Ok(ticks)
}
