pub mod coincap;
pub mod directory;
pub mod fetcher;
pub mod flash;
pub mod format;
pub mod http;
pub mod merge;
pub mod persistence;
pub mod pipeline;
pub mod reconciler;
pub mod supervisor;
pub mod types;
pub mod views;
pub mod watchlist;

pub const WATCHLIST_STORAGE_KEY: &str = "watchlist";
