use crate::error::{AppError, FetchError};
use crate::market::fetcher::CoinSource;
use crate::market::http::get_json_body;
use crate::market::reconciler::{PriceFeed, PriceFrame, PriceStream};
use crate::market::types::{parse_assets_payload, Coin};
use async_trait::async_trait;
use futures_util::future;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub type CoinCapWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn assets_endpoint(base_url: &str, page: u32, per_page: u32) -> String {
    let offset = u64::from(page.saturating_sub(1)) * u64::from(per_page);
    format!("{base_url}/assets?limit={per_page}&offset={offset}")
}

/// REST snapshot source backed by the CoinCap `assets` endpoint.
#[derive(Debug, Clone)]
pub struct CoinCapClient {
    client: Client,
    base_url: String,
}

impl CoinCapClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CoinSource for CoinCapClient {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<Vec<Coin>, FetchError> {
        let endpoint = assets_endpoint(&self.base_url, page, per_page);
        debug!(%endpoint, page, per_page, "requesting coin snapshot");
        let mut body = get_json_body(&self.client, &endpoint).await?;
        parse_assets_payload(&mut body)
    }
}

pub async fn connect_price_stream(stream_url: &str) -> Result<CoinCapWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(stream_url, Some(ws_config), true).await?;
    Ok(stream)
}

fn frame_from_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<PriceFrame, AppError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(PriceFrame::Payload(text.into_bytes()))),
        Ok(Message::Binary(bytes)) => Some(Ok(PriceFrame::Payload(bytes))),
        Ok(Message::Close(_)) => Some(Ok(PriceFrame::Closed)),
        Ok(_) => None,
        Err(error) => Some(Err(AppError::from(error))),
    }
}

/// Streaming price feed over the CoinCap `prices` websocket.
#[derive(Debug, Clone)]
pub struct CoinCapFeed {
    stream_url: String,
}

impl CoinCapFeed {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
        }
    }
}

#[async_trait]
impl PriceFeed for CoinCapFeed {
    async fn connect(&self) -> Result<PriceStream, AppError> {
        let websocket_stream = connect_price_stream(&self.stream_url).await?;
        let frames =
            websocket_stream.filter_map(|message| future::ready(frame_from_message(message)));
        Ok(Box::pin(frames))
    }
}
