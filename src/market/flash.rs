use crate::market::types::{PriceChangeMarker, PriceDirection};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// One pending deadline per key; scheduling again replaces the old one.
#[derive(Debug, Default)]
pub struct FlashScheduler {
    deadlines: HashMap<String, Instant>,
}

impl FlashScheduler {
    pub fn schedule(&mut self, key: &str, deadline: Instant) {
        self.deadlines.insert(key.to_string(), deadline);
    }

    pub fn cancel(&mut self, key: &str) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn pending(&self) -> usize {
        self.deadlines.len()
    }

    pub fn deadline(&self, key: &str) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns every key whose deadline is at or before `now`.
    pub fn drain_due(&mut self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        due.sort_unstable();
        for key in &due {
            self.deadlines.remove(key);
        }
        due
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.deadlines.retain(|key, _| keep(key.as_str()));
    }
}

/// Per-coin price change markers with self-expiring flashes.
#[derive(Debug)]
pub struct MarkerBoard {
    markers: HashMap<String, PriceChangeMarker>,
    scheduler: FlashScheduler,
    flash_duration: Duration,
}

impl MarkerBoard {
    pub fn new(flash_duration: Duration) -> Self {
        Self {
            markers: HashMap::new(),
            scheduler: FlashScheduler::default(),
            flash_duration,
        }
    }

    pub fn record(
        &mut self,
        coin_id: &str,
        previous_price: Decimal,
        direction: PriceDirection,
        now: Instant,
    ) {
        self.markers.insert(
            coin_id.to_string(),
            PriceChangeMarker {
                previous_price,
                flash: Some(direction),
                last_change: Some(direction),
            },
        );
        self.scheduler.schedule(coin_id, now + self.flash_duration);
    }

    pub fn marker(&self, coin_id: &str) -> Option<&PriceChangeMarker> {
        self.markers.get(coin_id)
    }

    pub fn markers(&self) -> &HashMap<String, PriceChangeMarker> {
        &self.markers
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn pending_clears(&self) -> usize {
        self.scheduler.pending()
    }

    /// Clears the flash of every marker whose deadline passed. The sticky
    /// `last_change` is left in place.
    pub fn expire(&mut self, now: Instant) -> usize {
        let due = self.scheduler.drain_due(now);
        for coin_id in &due {
            if let Some(marker) = self.markers.get_mut(coin_id) {
                marker.flash = None;
            }
        }
        due.len()
    }

    pub fn forget(&mut self, coin_id: &str) {
        self.markers.remove(coin_id);
        self.scheduler.cancel(coin_id);
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.markers.retain(|coin_id, _| keep(coin_id.as_str()));
        self.scheduler.retain(keep);
    }
}
