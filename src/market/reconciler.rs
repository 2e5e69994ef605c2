use crate::error::AppError;
use crate::market::flash::MarkerBoard;
use crate::market::merge::CoinBook;
use crate::market::types::{
    parse_price_ticks, price_epsilon, PriceDirection, PriceTick, PERCENT_SCALE,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{trace, warn};

/// One frame read from the streaming price transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceFrame {
    Payload(Vec<u8>),
    Closed,
}

pub type PriceStream = BoxStream<'static, Result<PriceFrame, AppError>>;

/// Opens streaming price connections.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn connect(&self) -> Result<PriceStream, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub coin_id: String,
    pub previous_price: Decimal,
    pub price: Decimal,
    pub direction: PriceDirection,
}

/// Percent move from `previous` to `next`, rounded to two places.
pub fn percent_change(previous: Decimal, next: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::ZERO;
    }
    (next - previous)
        .checked_div(previous)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|percent| percent.round_dp(PERCENT_SCALE))
        .unwrap_or(Decimal::ZERO)
}

/// Applies one tick to the merged collection.
///
/// Ticks for untracked coins and moves within one price step are ignored.
/// The percent-change field is recomputed against the previously stored
/// price, not a 24h baseline.
pub fn apply_price_tick(
    book: &mut CoinBook,
    markers: &mut MarkerBoard,
    tick: &PriceTick,
    now: Instant,
) -> Option<PriceChange> {
    let entry = book.get_mut(&tick.coin_id)?;
    let previous_price = entry.coin.current_price;
    if (tick.price - previous_price).abs() <= price_epsilon() {
        return None;
    }

    let direction = PriceDirection::between(previous_price, tick.price);
    entry.coin.price_change_percentage_24h = percent_change(previous_price, tick.price);
    entry.coin.current_price = tick.price;
    entry.live = true;
    markers.record(&tick.coin_id, previous_price, direction, now);

    trace!(coin_id = %tick.coin_id, %previous_price, price = %tick.price, "price tick applied");
    Some(PriceChange {
        coin_id: tick.coin_id.clone(),
        previous_price,
        price: tick.price,
        direction,
    })
}

/// Decodes and applies one stream message. Malformed messages are logged and
/// dropped; they never propagate.
pub fn apply_price_message(
    book: &mut CoinBook,
    markers: &mut MarkerBoard,
    payload: &mut [u8],
    now: Instant,
) -> Vec<PriceChange> {
    let ticks = match parse_price_ticks(payload) {
        Ok(ticks) => ticks,
        Err(error) => {
            warn!(%error, "dropping malformed price message");
            return Vec::new();
        }
    };

    ticks
        .iter()
        .filter_map(|tick| apply_price_tick(book, markers, tick, now))
        .collect()
}
