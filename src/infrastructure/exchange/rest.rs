//! Signed REST transport shared by the venue adapters.

use crate::domain::errors::ExchangeError;
use crate::domain::types::Credentials;
use crate::infrastructure::exchange::signer::Signer;
use reqwest::{Method, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

/// Error body shape venues return on a reject. Unknown extra fields are
/// ignored; a missing `code`/`msg` pair falls through to `Unknown`.
#[derive(Debug, Deserialize)]
struct VenueErrorBody {
    code: i64,
    msg: String,
}

/// One authenticated REST endpoint set.
pub struct VenueRestClient {
    client: ClientWithMiddleware,
    base_url: String,
    signer: Signer,
}

impl VenueRestClient {
    pub fn new(client: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            signer: Signer::new(),
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        creds: &Credentials,
        path: &str,
    ) -> Result<T, ExchangeError> {
        self.send(creds, Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        creds: &Credentials,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ExchangeError> {
        self.send(creds, Method::POST, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        creds: &Credentials,
        path: &str,
    ) -> Result<T, ExchangeError> {
        self.send(creds, Method::DELETE, path, None).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        creds: &Credentials,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ExchangeError> {
        let body_text = body.map(|b| b.to_string()).unwrap_or_default();
        let nonce = self.signer.next_nonce();
        let signature = self
            .signer
            .sign(creds, method.as_str(), path, nonce, &body_text);

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut request = self
            .client
            .request(method, &url)
            .header("X-API-KEY", &creds.api_key)
            .header("X-API-NONCE", nonce.to_string())
            .header("X-API-SIGNATURE", signature);

        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ExchangeError::Unknown(format!("undecodable venue response: {}", e)));
        }

        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();

        warn!("VenueRestClient: {} {} failed - Status: {}", self.base_url, path, status);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExchangeError::AuthFailure(text),
            StatusCode::TOO_MANY_REQUESTS => ExchangeError::Throttled { retry_after },
            s if s.is_server_error() => ExchangeError::TransientNetwork(format!("{}: {}", s, text)),
            _ => match serde_json::from_str::<VenueErrorBody>(&text) {
                Ok(body) => ExchangeError::VenueReject {
                    code: body.code,
                    msg: body.msg,
                },
                Err(_) => ExchangeError::Unknown(format!("{}: {}", status, text)),
            },
        })
    }
}
