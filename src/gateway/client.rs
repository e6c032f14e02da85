use std::error::Error as StdError;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{GatewayError, GatewayErrorKind, GatewayResult};

/// Shared outbound HTTP client for gateway adapters. Classifies transport
/// failures into the gateway error taxonomy so post-operation can map them
/// onto charge statuses.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(timeout_secs: u64) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
            .build()
            .map_err(|e| GatewayError::generic(format!("failed to build http client: {e}")))?;
        Ok(Self { http })
    }

    pub async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> GatewayResult<T> {
        debug!(url, "gateway request");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::new(
                GatewayErrorKind::UnexpectedHttpStatus,
                format!("unexpected HTTP status {status} from {url}"),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::malformed(format!("undecodable gateway response: {e}")))
    }
}

fn classify_transport_error(error: reqwest::Error) -> GatewayError {
    let kind = if error.is_timeout() {
        GatewayErrorKind::ConnectionTimeout
    } else if error.is_connect() {
        if source_chain_mentions_dns(&error) {
            GatewayErrorKind::Dns
        } else {
            GatewayErrorKind::Socket
        }
    } else if error.is_decode() || error.is_body() {
        GatewayErrorKind::MalformedResponse
    } else {
        GatewayErrorKind::Generic
    };
    GatewayError::new(kind, error.to_string())
}

fn source_chain_mentions_dns(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(err) = source {
        let message = err.to_string().to_lowercase();
        if message.contains("dns") || message.contains("resolve") {
            return true;
        }
        source = err.source();
    }
    false
}
