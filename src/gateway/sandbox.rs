use async_trait::async_trait;
use once_cell::sync::Lazy;
use uuid::Uuid;

use super::status_mapper::StatusMapper;
use super::{
    AuthoriseRequest, AuthoriseResponse, AuthoriseStatus, CancelRequest, CancelResponse,
    CaptureRequest, CaptureResponse, GatewayAdapter, GatewayError, GatewayResult,
    Notification, PaymentGatewayName, RefundRequest, RefundResponse,
};

/// Test card numbers accepted by the sandbox.
const VALID_CARDS: &[&str] = &[
    "4242424242424242",
    "4444333322221111",
    "4917610000000000003",
    "5105105105105100",
];

/// Cards the sandbox declines.
const REJECTED_CARDS: &[&str] = &["4000000000000002", "4000000000000069"];

/// Cards producing a gateway processing error.
const ERROR_CARDS: &[&str] = &["4000000000000119"];

static EMPTY_MAPPER: Lazy<StatusMapper> = Lazy::new(StatusMapper::default);

/// In-process provider with deterministic, card-number-driven outcomes.
/// Captures, cancels, and refunds always succeed; refunds settle instantly.
pub struct SandboxGateway;

impl SandboxGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayAdapter for SandboxGateway {
    fn name(&self) -> PaymentGatewayName {
        PaymentGatewayName::Sandbox
    }

    fn generate_transaction_id(&self) -> Option<String> {
        Some(Uuid::new_v4().to_string())
    }

    async fn authorise(&self, request: AuthoriseRequest) -> GatewayResult<AuthoriseResponse> {
        let card_number = request.card.card_number.replace(' ', "");
        if ERROR_CARDS.contains(&card_number.as_str()) {
            return Err(GatewayError::generic(
                "this transaction could not be processed",
            ));
        }
        let status = if REJECTED_CARDS.contains(&card_number.as_str()) {
            AuthoriseStatus::Rejected
        } else if VALID_CARDS.contains(&card_number.as_str()) {
            AuthoriseStatus::Authorised
        } else {
            return Err(GatewayError::generic("unsupported card details"));
        };

        Ok(AuthoriseResponse {
            status,
            transaction_id: Some(Uuid::new_v4().to_string()),
            session_id: None,
        })
    }

    async fn capture(&self, _request: CaptureRequest) -> GatewayResult<CaptureResponse> {
        Ok(CaptureResponse {
            transaction_id: Some(Uuid::new_v4().to_string()),
        })
    }

    async fn cancel(&self, _request: CancelRequest) -> GatewayResult<CancelResponse> {
        Ok(CancelResponse {
            transaction_id: Some(Uuid::new_v4().to_string()),
            settled: true,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        Ok(RefundResponse {
            reference: Some(request.reference),
        })
    }

    fn parse_notification(&self, _payload: &str) -> Result<Vec<Notification>, String> {
        Err("sandbox does not support notifications".to_string())
    }

    fn status_mapper(&self) -> &StatusMapper {
        &EMPTY_MAPPER
    }

    fn refund_settles_instantly(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CardDetails;
    use assert_matches::assert_matches;

    fn request_for(card_number: &str) -> AuthoriseRequest {
        AuthoriseRequest {
            charge_external_id: "ch_test".into(),
            transaction_id: None,
            amount: 500,
            card: CardDetails {
                card_number: card_number.into(),
                card_brand: "visa".into(),
                cardholder_name: "J Doe".into(),
                expiry_date: "12/27".into(),
                address_line1: None,
                address_city: None,
                address_postcode: None,
                address_country: None,
            },
        }
    }

    #[tokio::test]
    async fn valid_card_is_authorised_with_a_transaction_id() {
        let response = SandboxGateway::new()
            .authorise(request_for("4242424242424242"))
            .await
            .unwrap();
        assert_eq!(response.status, AuthoriseStatus::Authorised);
        assert!(response.transaction_id.is_some());
    }

    #[tokio::test]
    async fn declined_card_is_rejected_not_errored() {
        let response = SandboxGateway::new()
            .authorise(request_for("4000000000000002"))
            .await
            .unwrap();
        assert_eq!(response.status, AuthoriseStatus::Rejected);
    }

    #[tokio::test]
    async fn error_card_yields_a_generic_gateway_error() {
        let err = SandboxGateway::new()
            .authorise(request_for("4000000000000119"))
            .await
            .unwrap_err();
        assert_matches!(err.kind, crate::gateway::GatewayErrorKind::Generic);
    }

    #[tokio::test]
    async fn unknown_card_is_unsupported() {
        let err = SandboxGateway::new()
            .authorise(request_for("1111111111111111"))
            .await
            .unwrap_err();
        assert!(err.message.contains("unsupported"));
    }

    #[test]
    fn sandbox_has_no_notifications() {
        assert!(SandboxGateway::new().parse_notification("{}").is_err());
        assert!(!SandboxGateway::new().notification_source_verified());
    }
}
