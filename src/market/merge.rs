use crate::market::types::Coin;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// A coin in the merged collection plus where its data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinEntry {
    pub coin: Coin,
    /// Latest snapshot page that delivered this coin.
    pub page: u32,
    /// Whether `coin.current_price` was last written by the price stream.
    pub live: bool,
}

/// Merges one snapshot page into the previous collection.
///
/// Page 1 replaces every entry that page 1 delivered before; later pages are
/// appended. Duplicates collapse onto the first position holding the id with
/// the newest snapshot content, except that a live price is never replaced by
/// a snapshot price. The result is ordered by market-cap rank (stable).
pub fn merge_page(previous: &[CoinEntry], page: u32, incoming: Vec<Coin>) -> Vec<CoinEntry> {
    let live_prices: HashMap<&str, Decimal> = previous
        .iter()
        .filter(|entry| entry.live)
        .map(|entry| (entry.coin.id.as_str(), entry.coin.current_price))
        .collect();

    let incoming_entries: Vec<CoinEntry> = incoming
        .into_iter()
        .map(|mut coin| {
            coin.id = coin.id.to_ascii_lowercase();
            let live = match live_prices.get(coin.id.as_str()) {
                Some(price) => {
                    coin.current_price = *price;
                    true
                }
                None => false,
            };
            CoinEntry { coin, page, live }
        })
        .collect();

    let retained = previous
        .iter()
        .filter(|entry| page != 1 || entry.page != 1)
        .cloned()
        .map(|entry| (entry, false));
    let fresh = incoming_entries.into_iter().map(|entry| (entry, true));

    let combined: Vec<(CoinEntry, bool)> = if page == 1 {
        fresh.chain(retained).collect()
    } else {
        retained.chain(fresh).collect()
    };

    let mut merged: Vec<CoinEntry> = Vec::with_capacity(combined.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(combined.len());
    for (entry, from_snapshot) in combined {
        match positions.get(&entry.coin.id) {
            Some(&index) => {
                if from_snapshot {
                    merged[index] = entry;
                }
            }
            None => {
                positions.insert(entry.coin.id.clone(), merged.len());
                merged.push(entry);
            }
        }
    }

    merged.sort_by_key(|entry| entry.coin.market_cap_rank);
    merged
}

/// The deduplicated, rank-ordered coin collection.
#[derive(Debug, Clone, Default)]
pub struct CoinBook {
    entries: Vec<CoinEntry>,
}

impl CoinBook {
    /// Applies a page and returns the ids that left the collection.
    pub fn merge_page(&mut self, page: u32, incoming: Vec<Coin>) -> Vec<String> {
        let merged = merge_page(&self.entries, page, incoming);
        let mut removed: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !merged.iter().any(|kept| kept.coin.id == entry.coin.id))
            .map(|entry| entry.coin.id.clone())
            .collect();
        removed.sort_unstable();
        removed.dedup();
        self.entries = merged;
        removed
    }

    pub fn entries(&self) -> &[CoinEntry] {
        &self.entries
    }

    pub fn coins(&self) -> Vec<Coin> {
        self.entries.iter().map(|entry| entry.coin.clone()).collect()
    }

    pub fn get(&self, coin_id: &str) -> Option<&CoinEntry> {
        self.entries.iter().find(|entry| entry.coin.id == coin_id)
    }

    pub fn get_mut(&mut self, coin_id: &str) -> Option<&mut CoinEntry> {
        self.entries.iter_mut().find(|entry| entry.coin.id == coin_id)
    }

    pub fn contains(&self, coin_id: &str) -> bool {
        self.get(coin_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fetcher::tests::sample_coin;

    fn ids(entries: &[CoinEntry]) -> Vec<&str> {
        entries.iter().map(|entry| entry.coin.id.as_str()).collect()
    }

    #[test]
    fn orders_by_rank() {
        let merged = merge_page(
            &[],
            1,
            vec![
                sample_coin("eth", 2, 3_000),
                sample_coin("btc", 1, 50_000),
                sample_coin("sol", 5, 100),
            ],
        );
        assert_eq!(ids(&merged), vec!["btc", "eth", "sol"]);
    }

    #[test]
    fn merging_the_same_page_twice_is_idempotent() {
        let page_one = vec![sample_coin("btc", 1, 50_000), sample_coin("eth", 2, 3_000)];
        let page_two = vec![
            sample_coin("sol", 5, 100),
            sample_coin("ada", 5, 1),
            sample_coin("eth", 2, 3_100),
        ];

        let base = merge_page(&[], 1, page_one);
        let once = merge_page(&base, 2, page_two.clone());
        let twice = merge_page(&once, 2, page_two);
        assert_eq!(once, twice);

        let refreshed = merge_page(&twice, 1, vec![sample_coin("btc", 1, 51_000)]);
        let refreshed_again = merge_page(&refreshed, 1, vec![sample_coin("btc", 1, 51_000)]);
        assert_eq!(refreshed, refreshed_again);
    }

    #[test]
    fn keeps_live_price_when_a_later_page_repeats_the_coin() {
        let mut book = CoinBook::default();
        book.merge_page(1, vec![sample_coin("btc", 1, 50_000)]);
        {
            let entry = book.get_mut("btc").expect("btc was merged");
            entry.coin.current_price = Decimal::new(50_500, 0);
            entry.live = true;
        }

        let mut repeated = sample_coin("btc", 1, 49_000);
        repeated.market_cap = Decimal::new(123, 0);
        book.merge_page(2, vec![repeated, sample_coin("eth", 2, 3_000)]);

        let btc = book.get("btc").expect("btc still tracked");
        assert_eq!(btc.coin.current_price, Decimal::new(50_500, 0));
        assert_eq!(btc.coin.market_cap, Decimal::new(123, 0));
        assert!(btc.live);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn page_one_replaces_only_its_own_portion() {
        let mut book = CoinBook::default();
        book.merge_page(1, vec![sample_coin("btc", 1, 50_000), sample_coin("xrp", 3, 1)]);
        book.merge_page(2, vec![sample_coin("sol", 5, 100)]);

        let removed = book.merge_page(1, vec![sample_coin("btc", 1, 50_100), sample_coin("eth", 2, 3_000)]);

        assert_eq!(removed, vec!["xrp".to_string()]);
        assert_eq!(ids(book.entries()), vec!["btc", "eth", "sol"]);
    }

    #[test]
    fn duplicates_collapse_to_one_entry_per_id() {
        let merged = merge_page(
            &[],
            2,
            vec![
                sample_coin("btc", 1, 50_000),
                sample_coin("BTC", 1, 50_010),
                sample_coin("eth", 2, 3_000),
            ],
        );

        assert_eq!(ids(&merged), vec!["btc", "eth"]);
        assert_eq!(merged[0].coin.current_price, Decimal::new(50_010, 0));
    }

    #[test]
    fn ties_keep_insertion_order() {
        let merged = merge_page(
            &[],
            1,
            vec![sample_coin("zeta", 7, 1), sample_coin("alpha", 7, 1)],
        );
        assert_eq!(ids(&merged), vec!["zeta", "alpha"]);
    }
}
