use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.coincap.io/v2";
pub const DEFAULT_STREAM_URL: &str = "wss://ws.coincap.io/prices?assets=ALL";
pub const DEFAULT_DIRECTORY_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_DB_FILENAME: &str = "coin-desk.db";
pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const DEFAULT_LIVE_MODE: bool = true;
pub const MIN_PAGE_SIZE: u32 = 1;
pub const MAX_PAGE_SIZE: u32 = 250;

pub const FETCH_MAX_ATTEMPTS: u32 = 3;
pub const FETCH_RETRY_DELAY_MS: u64 = 1_000;
pub const SNAPSHOT_REFRESH_INTERVAL_MS: u64 = 5_000;
pub const FLASH_CLEAR_DELAY_MS: u64 = 1_000;
pub const RECONNECT_DELAY_MS: u64 = 3_000;
pub const MOVERS_REFRESH_INTERVAL_MS: u64 = 60_000;
pub const MOVERS_LIMIT: usize = 20;

const ENV_API_BASE_URL: &str = "COIN_DESK_API_BASE_URL";
const ENV_STREAM_URL: &str = "COIN_DESK_STREAM_URL";
const ENV_DIRECTORY_BASE_URL: &str = "COIN_DESK_DIRECTORY_BASE_URL";
const ENV_PAGE_SIZE: &str = "COIN_DESK_PAGE_SIZE";
const ENV_LIVE_MODE: &str = "COIN_DESK_LIVE";
const ENV_DB_FILENAME: &str = "COIN_DESK_DB_FILENAME";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardArgs {
    pub api_base_url: Option<String>,
    pub stream_url: Option<String>,
    pub directory_base_url: Option<String>,
    pub page_size: Option<u32>,
    pub live_mode: Option<bool>,
    pub db_filename: Option<String>,
}

/// Fixed cadences of the list pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimings {
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay: Duration,
    pub refresh_interval: Duration,
    pub flash_duration: Duration,
    pub reconnect_delay: Duration,
    pub movers_interval: Duration,
    pub movers_limit: usize,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            fetch_max_attempts: FETCH_MAX_ATTEMPTS,
            fetch_retry_delay: Duration::from_millis(FETCH_RETRY_DELAY_MS),
            refresh_interval: Duration::from_millis(SNAPSHOT_REFRESH_INTERVAL_MS),
            flash_duration: Duration::from_millis(FLASH_CLEAR_DELAY_MS),
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
            movers_interval: Duration::from_millis(MOVERS_REFRESH_INTERVAL_MS),
            movers_limit: MOVERS_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub api_base_url: String,
    pub stream_url: String,
    pub directory_base_url: String,
    pub page_size: u32,
    pub live_mode: bool,
    pub db_filename: String,
    pub timings: PipelineTimings,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool_flag(name: &str, raw: &str) -> Result<bool, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::InvalidArgument(format!(
            "{name} must be a boolean flag, got '{raw}'"
        ))),
    }
}

fn normalize_url(
    field: &str,
    value: Option<String>,
    default: &str,
    schemes: &[&str],
) -> Result<String, AppError> {
    let url = value
        .unwrap_or_else(|| default.to_string())
        .trim()
        .trim_end_matches('/')
        .to_string();

    if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must start with one of {}",
            schemes.join(", ")
        )));
    }
    Ok(url)
}

impl DashboardArgs {
    pub fn from_env() -> Result<Self, AppError> {
        let page_size = env_value(ENV_PAGE_SIZE)
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| {
                    AppError::InvalidArgument(format!(
                        "{ENV_PAGE_SIZE} must be a positive integer, got '{raw}'"
                    ))
                })
            })
            .transpose()?;
        let live_mode = env_value(ENV_LIVE_MODE)
            .map(|raw| parse_bool_flag(ENV_LIVE_MODE, &raw))
            .transpose()?;

        Ok(Self {
            api_base_url: env_value(ENV_API_BASE_URL),
            stream_url: env_value(ENV_STREAM_URL),
            directory_base_url: env_value(ENV_DIRECTORY_BASE_URL),
            page_size,
            live_mode,
            db_filename: env_value(ENV_DB_FILENAME),
        })
    }

    pub fn normalize(self) -> Result<DashboardConfig, AppError> {
        let api_base_url = normalize_url(
            "apiBaseUrl",
            self.api_base_url,
            DEFAULT_API_BASE_URL,
            &["http://", "https://"],
        )?;
        let directory_base_url = normalize_url(
            "directoryBaseUrl",
            self.directory_base_url,
            DEFAULT_DIRECTORY_BASE_URL,
            &["http://", "https://"],
        )?;
        let stream_url = self
            .stream_url
            .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string())
            .trim()
            .to_string();
        if !(stream_url.starts_with("ws://") || stream_url.starts_with("wss://")) {
            return Err(AppError::InvalidArgument(
                "streamUrl must start with ws:// or wss://".to_string(),
            ));
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::InvalidArgument(format!(
                "pageSize must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }

        let db_filename = self
            .db_filename
            .unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string())
            .trim()
            .to_string();
        if db_filename.is_empty() {
            return Err(AppError::InvalidArgument(
                "dbFilename must not be empty".to_string(),
            ));
        }

        Ok(DashboardConfig {
            api_base_url,
            stream_url,
            directory_base_url,
            page_size,
            live_mode: self.live_mode.unwrap_or(DEFAULT_LIVE_MODE),
            db_filename,
            timings: PipelineTimings::default(),
        })
    }
}
