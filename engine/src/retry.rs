//! HTTP client plumbing for talking to a running engine, and the
//! response-to-`DispatchError` classification every call goes through.
//!
//! Grounded on the fetch-and-classify pattern `sources/src/access/*`
//! modules use around `reqwest` (build a client once, issue the request,
//! turn the status code into a typed outcome) and on spec.md's engine
//! manager retry table: 4xx never retries, a 503-while-loading retries
//! without a restart, anything else server-side or a transport failure
//! retries after restarting the engine process.

use std::time::Duration;

use forge_store::DispatchError;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client config is static and always valid")
}

/// POST `body` as JSON to `url`, decode the JSON response, classifying
/// any non-2xx status or transport failure per the retry table above.
pub async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
    client: &Client,
    url: &str,
    body: &Req,
) -> Result<Resp, DispatchError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| DispatchError::Unreachable(e.to_string()))?;
    classify_and_decode(response).await
}

pub async fn get_json<Resp: DeserializeOwned>(client: &Client, url: &str) -> Result<Resp, DispatchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DispatchError::Unreachable(e.to_string()))?;
    classify_and_decode(response).await
}

async fn classify_and_decode<Resp: DeserializeOwned>(response: reqwest::Response) -> Result<Resp, DispatchError> {
    let status = response.status();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(DispatchError::Loading);
    }
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::ClientError(body));
    }
    if status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(DispatchError::ServerError(body));
    }
    response
        .json::<Resp>()
        .await
        .map_err(|e| DispatchError::ServerError(format!("malformed response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_a_timeout() {
        let _ = build_client(Duration::from_secs(30));
    }
}
