use crate::market::types::Coin;
use crate::market::watchlist::Watchlist;
use rust_decimal::Decimal;
use std::cmp::Reverse;

/// Coins with a positive 24h change, highest first. Ties keep collection
/// order.
pub fn top_gainers(coins: &[Coin], limit: usize) -> Vec<Coin> {
    let mut ranked: Vec<Coin> = coins
        .iter()
        .filter(|coin| coin.price_change_percentage_24h > Decimal::ZERO)
        .cloned()
        .collect();
    ranked.sort_by_key(|coin| Reverse(coin.price_change_percentage_24h));
    ranked.truncate(limit);
    ranked
}

/// Coins with a negative 24h change, most negative first.
pub fn top_losers(coins: &[Coin], limit: usize) -> Vec<Coin> {
    let mut ranked: Vec<Coin> = coins
        .iter()
        .filter(|coin| coin.price_change_percentage_24h < Decimal::ZERO)
        .cloned()
        .collect();
    ranked.sort_by_key(|coin| coin.price_change_percentage_24h);
    ranked.truncate(limit);
    ranked
}

/// Case-insensitive substring match on name or symbol. A blank query keeps
/// every coin.
pub fn search(coins: &[Coin], query: &str) -> Vec<Coin> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return coins.to_vec();
    }
    coins
        .iter()
        .filter(|coin| {
            coin.name.to_lowercase().contains(&needle)
                || coin.symbol.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

/// Watched coins that are currently tracked, in collection order.
pub fn watchlist_view(coins: &[Coin], watchlist: &Watchlist) -> Vec<Coin> {
    coins
        .iter()
        .filter(|coin| watchlist.contains(&coin.id))
        .cloned()
        .collect()
}

/// Top movers, recomputed on their own cadence rather than every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedLists {
    pub gainers: Vec<Coin>,
    pub losers: Vec<Coin>,
    pub computed_at_ms: Option<i64>,
}

impl DerivedLists {
    pub fn compute(coins: &[Coin], limit: usize, now_ms: i64) -> Self {
        Self {
            gainers: top_gainers(coins, limit),
            losers: top_losers(coins, limit),
            computed_at_ms: Some(now_ms),
        }
    }
}
