//! Small helpers shared by the HTTP-based providers.

use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

use super::ProviderError;

/// Builds a client bounded by `timeout`. No retry layer is added.
pub fn client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

pub fn url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reads the body as JSON whatever the status, returning both.
pub async fn read_json(response: Response) -> Result<(u16, Value), ProviderError> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok((status, Value::Null));
    }
    let body = serde_json::from_str(&text)
        .map_err(|_| ProviderError::InvalidResponse(format!("non-JSON body (HTTP {})", status)))?;
    Ok((status, body))
}

/// String at a JSON pointer, or an invalid-response error naming it.
pub fn str_at<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, ProviderError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse(format!("missing field {}", pointer)))
}
