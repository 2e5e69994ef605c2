use crate::error::FetchError;
use reqwest::header::ACCEPT;
use reqwest::Client;

/// GETs `endpoint` and returns the raw body of a 2xx response.
pub async fn get_json_body(client: &Client, endpoint: &str) -> Result<Vec<u8>, FetchError> {
    let response = client
        .get(endpoint)
        .header(ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status.as_u16()));
    }

    Ok(response.bytes().await?.to_vec())
}
