use crate::error::AppError;
use std::collections::BTreeSet;

/// The set of coin ids the user pinned. Ordered so the stored form is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watchlist {
    ids: BTreeSet<String>,
}

impl Watchlist {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|id| id.as_ref().trim().to_ascii_lowercase())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    /// Adds the id if absent, removes it otherwise. Returns whether the coin is
    /// watched afterwards.
    pub fn toggle(&mut self, coin_id: &str) -> bool {
        let coin_id = coin_id.trim().to_ascii_lowercase();
        if self.ids.remove(&coin_id) {
            false
        } else {
            self.ids.insert(coin_id);
            true
        }
    }

    pub fn contains(&self, coin_id: &str) -> bool {
        self.ids.contains(coin_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(simd_json::serde::to_string(&self.ids())?)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let mut bytes = raw.as_bytes().to_vec();
        let ids: Vec<String> = simd_json::serde::from_slice(&mut bytes)?;
        Ok(Self::from_ids(ids))
    }
}
