//! Payment gateway adapters.
//!
//! Each provider implements [`GatewayAdapter`]; the closed set of providers
//! is resolved through a name-keyed [`GatewayRegistry`] built at startup.
//! Adapters are stateless and shared across tasks as `Arc<dyn GatewayAdapter>`.

pub mod client;
pub mod sandbox;
pub mod smartpay;
pub mod status_mapper;
pub mod worldpay;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::config::GatewaysConfig;
use status_mapper::StatusMapper;

/// Supported payment gateway providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentGatewayName {
    Sandbox,
    Worldpay,
    Smartpay,
}

/// Classified gateway communication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    MalformedResponse,
    Dns,
    ConnectionTimeout,
    Socket,
    UnexpectedHttpStatus,
    Generic,
}

#[derive(Debug, Clone, Error)]
#[error("gateway error ({kind:?}): {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Generic, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::MalformedResponse, message)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Card details supplied by the paying user for an authorisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDetails {
    pub card_number: String,
    pub card_brand: String,
    pub cardholder_name: String,
    pub expiry_date: String,
    pub address_line1: Option<String>,
    pub address_city: Option<String>,
    pub address_postcode: Option<String>,
    pub address_country: Option<String>,
}

impl CardDetails {
    pub fn last_digits(&self) -> String {
        let digits: String = self.card_number.chars().filter(|c| c.is_ascii_digit()).collect();
        let start = digits.len().saturating_sub(4);
        digits[start..].to_string()
    }
}

#[derive(Debug, Clone)]
pub struct AuthoriseRequest {
    pub charge_external_id: String,
    pub transaction_id: Option<String>,
    pub amount: i64,
    pub card: CardDetails,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub charge_external_id: String,
    pub transaction_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub charge_external_id: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// Refund external id, sent as the gateway reference so asynchronous
    /// confirmations can be correlated back.
    pub reference: String,
    pub transaction_id: String,
    pub amount: i64,
}

/// Authorisation decision reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthoriseStatus {
    Authorised,
    Rejected,
    Requires3ds {
        issuer_url: String,
        pa_request: String,
    },
}

#[derive(Debug, Clone)]
pub struct AuthoriseResponse {
    pub status: AuthoriseStatus,
    pub transaction_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureResponse {
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CancelResponse {
    pub transaction_id: Option<String>,
    /// True when the gateway cancelled outright; false when it accepted the
    /// request and confirms later via notification.
    pub settled: bool,
}

#[derive(Debug, Clone)]
pub struct RefundResponse {
    pub reference: Option<String>,
}

/// One event extracted from a gateway notification payload.
#[derive(Debug, Clone)]
pub struct Notification {
    pub transaction_id: Option<String>,
    /// Correlates refund events back to the refund's external id.
    pub reference: Option<String>,
    /// Provider-specific status token, interpreted by the status mapper.
    pub status: String,
    pub gateway_event_date: Option<DateTime<Utc>>,
}

/// Uniform contract every payment gateway implements.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn name(&self) -> PaymentGatewayName;

    /// A locally generated transaction id recorded before the first gateway
    /// call, when the provider supports client-side ids. Keeps the charge
    /// correlatable even on total gateway silence.
    fn generate_transaction_id(&self) -> Option<String>;

    async fn authorise(&self, request: AuthoriseRequest) -> GatewayResult<AuthoriseResponse>;
    async fn capture(&self, request: CaptureRequest) -> GatewayResult<CaptureResponse>;
    async fn cancel(&self, request: CancelRequest) -> GatewayResult<CancelResponse>;
    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse>;

    /// Parses a raw notification payload into zero or more events. A parse
    /// failure is reported as `Err` and must never abort the listener.
    fn parse_notification(&self, payload: &str) -> Result<Vec<Notification>, String>;

    /// Whether events within one payload arrive in gateway-declared order.
    /// When false the notification service sorts them by event date.
    fn notifications_ordered(&self) -> bool {
        true
    }

    /// Whether inbound notifications must come from the provider's own
    /// domain, verified via DNS against the peer address.
    fn notification_source_verified(&self) -> bool {
        false
    }

    fn notification_domain(&self) -> Option<&str> {
        None
    }

    fn status_mapper(&self) -> &StatusMapper;

    /// True for providers whose refunds settle synchronously (Sandbox);
    /// false for providers confirming via webhook later.
    fn refund_settles_instantly(&self) -> bool {
        false
    }
}

/// Name-keyed lookup table of provider adapters, built once at startup.
pub struct GatewayRegistry {
    adapters: HashMap<PaymentGatewayName, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn from_config(config: &GatewaysConfig) -> GatewayResult<Self> {
        let client = client::GatewayClient::new(config.request_timeout_secs)?;
        let mut registry = Self {
            adapters: HashMap::new(),
        };
        registry.register(Arc::new(sandbox::SandboxGateway::new()));
        registry.register(Arc::new(worldpay::WorldpayGateway::new(
            client.clone(),
            config.worldpay_url.clone(),
        )));
        registry.register(Arc::new(smartpay::SmartpayGateway::new(
            client,
            config.smartpay_url.clone(),
        )));
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    pub fn by_name(&self, name: PaymentGatewayName) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(&name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn GatewayAdapter>> {
        name.parse::<PaymentGatewayName>()
            .ok()
            .and_then(|n| self.by_name(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_names_parse_case_insensitively_via_lowercase_tokens() {
        assert_eq!(
            "sandbox".parse::<PaymentGatewayName>().unwrap(),
            PaymentGatewayName::Sandbox
        );
        assert_eq!(PaymentGatewayName::Worldpay.to_string(), "worldpay");
        assert!("visa".parse::<PaymentGatewayName>().is_err());
    }

    #[test]
    fn registry_resolves_all_configured_providers() {
        let registry = GatewayRegistry::from_config(&GatewaysConfig::default()).unwrap();
        for name in ["sandbox", "worldpay", "smartpay"] {
            assert!(registry.resolve(name).is_some(), "{name} missing");
        }
        assert!(registry.resolve("unknown").is_none());
    }

    #[test]
    fn last_digits_handles_short_and_formatted_numbers() {
        let mut card = CardDetails {
            card_number: "4242 4242 4242 4242".into(),
            card_brand: "visa".into(),
            cardholder_name: "J Doe".into(),
            expiry_date: "12/27".into(),
            address_line1: None,
            address_city: None,
            address_postcode: None,
            address_country: None,
        };
        assert_eq!(card.last_digits(), "4242");
        card.card_number = "42".into();
        assert_eq!(card.last_digits(), "42");
    }
}
