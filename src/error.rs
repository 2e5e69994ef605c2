use serde::ser::Serializer;
use thiserror::Error;

pub const MESSAGE_NETWORK_UNREACHABLE: &str =
    "Cannot reach the server. Check your internet connection.";
pub const MESSAGE_SERVER_ERROR: &str = "Something went wrong while loading data.";
pub const MESSAGE_MALFORMED_PAYLOAD: &str = "The server sent an invalid response.";
pub const MESSAGE_RATE_LIMITED: &str = "API rate limit exceeded. Please wait a moment.";

/// Failure of a single REST request, classified the way it is shown to users.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("server responded with status {status}")]
    ServerError { status: u16 },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("rate limited by upstream")]
    RateLimited,
}

impl FetchError {
    pub fn from_status(status: u16) -> Self {
        if status == 429 {
            Self::RateLimited
        } else {
            Self::ServerError { status }
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable(_) => MESSAGE_NETWORK_UNREACHABLE,
            Self::ServerError { .. } => MESSAGE_SERVER_ERROR,
            Self::MalformedPayload(_) => MESSAGE_MALFORMED_PAYLOAD,
            Self::RateLimited => MESSAGE_RATE_LIMITED,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if let Some(status) = value.status() {
            return Self::from_status(status.as_u16());
        }
        if value.is_decode() {
            return Self::MalformedPayload(value.to_string());
        }
        Self::NetworkUnreachable(value.to_string())
    }
}

impl From<simd_json::Error> for FetchError {
    fn from(value: simd_json::Error) -> Self {
        Self::MalformedPayload(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("dashboard loop is not running")]
    DashboardStopped,
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
