use futures::{Stream, StreamExt};
use reqwest::{header, Client, Response};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

use crate::error::{LLMError, Result};
use crate::runtime::RuntimeConfig;

/// Build the HTTP client shared by every call to a runtime.
///
/// The client carries no overall timeout; control calls set one per request
/// so long downloads and generations are not cut off.
pub fn build_http_client(config: &RuntimeConfig) -> Result<ClientWithMiddleware> {
    // Create retry policy with exponential backoff
    let retry_policy = ExponentialBackoff::builder()
        .base(2)
        .build_with_max_retries(config.max_retries);

    let client = Client::builder()
        .connect_timeout(config.timeout)
        .default_headers(build_headers(config)?)
        .build()
        .map_err(|e| LLMError::Config(e.to_string()))?;

    Ok(reqwest_middleware::ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

fn build_headers(config: &RuntimeConfig) -> Result<header::HeaderMap> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    for (key, value) in &config.headers {
        let header_name = header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| LLMError::Config(format!("Invalid header name: {}", e)))?;
        let header_value = header::HeaderValue::from_str(value)
            .map_err(|e| LLMError::Config(format!("Invalid header value: {}", e)))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Turn a non-success response into [`LLMError::Api`].
///
/// Runtimes usually answer errors with `{"error": "..."}`; the raw body is
/// used when it is not shaped that way.
pub async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(LLMError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Decode a newline-delimited JSON body.
///
/// Network chunks do not line up with records, so bytes are buffered until
/// a full line is available. Blank lines are skipped.
pub fn ndjson_stream<T>(response: Response) -> impl Stream<Item = Result<T>> + Send
where
    T: DeserializeOwned + Send + 'static,
{
    let mut bytes = response.bytes_stream();

    async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| LLMError::Stream(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(record) = parse_line::<T>(&line)? {
                    yield record;
                }
            }
        }

        if let Some(record) = parse_line::<T>(&buffer)? {
            yield record;
        }
    }
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<Option<T>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| LLMError::Stream(format!("malformed stream record: {}", e)))
}
