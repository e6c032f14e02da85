use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::{ChargeStatus, RefundStatus};

use super::client::GatewayClient;
use super::status_mapper::StatusMapper;
use super::{
    AuthoriseRequest, AuthoriseResponse, AuthoriseStatus, CancelRequest, CancelResponse,
    CaptureRequest, CaptureResponse, GatewayAdapter, GatewayError, GatewayResult,
    Notification, PaymentGatewayName, RefundRequest, RefundResponse,
};

static STATUS_MAPPER: Lazy<StatusMapper> = Lazy::new(|| {
    StatusMapper::builder()
        .ignore("SENT_FOR_AUTHORISATION")
        .ignore("AUTHORISED")
        .map_charge("CAPTURED", ChargeStatus::Captured)
        .map_refund("SENT_FOR_REFUND", RefundStatus::RefundSubmitted)
        .map_refund("REFUNDED", RefundStatus::Refunded)
        .map_refund("REFUNDED_BY_MERCHANT", RefundStatus::Refunded)
        .map_refund("REFUND_FAILED", RefundStatus::RefundError)
        .map_charge_when(
            "CANCELLED",
            ChargeStatus::UserCancelSubmitted,
            ChargeStatus::UserCancelled,
        )
        .map_charge_when(
            "CANCELLED",
            ChargeStatus::SystemCancelSubmitted,
            ChargeStatus::SystemCancelled,
        )
        .map_charge_when(
            "CANCELLED",
            ChargeStatus::ExpireCancelSubmitted,
            ChargeStatus::Expired,
        )
        .build()
});

#[derive(Debug, Deserialize)]
struct WorldpayOrderReply {
    #[serde(rename = "lastEvent")]
    last_event: String,
    #[serde(rename = "orderCode")]
    order_code: Option<String>,
    #[serde(rename = "issuerUrl")]
    issuer_url: Option<String>,
    #[serde(rename = "paRequest")]
    pa_request: Option<String>,
    #[serde(rename = "machineCookie")]
    machine_cookie: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorldpayMaintenanceReply {
    #[serde(rename = "orderCode")]
    order_code: Option<String>,
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorldpayNotificationPayload {
    #[serde(rename = "orderCode")]
    order_code: Option<String>,
    status: String,
    reference: Option<String>,
    #[serde(rename = "bookingDate")]
    booking_date: Option<DateTime<Utc>>,
}

/// Worldpay adapter. Order codes are generated locally before the gateway
/// call; notifications carry a single event and must originate from the
/// Worldpay domain.
pub struct WorldpayGateway {
    client: GatewayClient,
    url: String,
}

impl WorldpayGateway {
    pub fn new(client: GatewayClient, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl GatewayAdapter for WorldpayGateway {
    fn name(&self) -> PaymentGatewayName {
        PaymentGatewayName::Worldpay
    }

    fn generate_transaction_id(&self) -> Option<String> {
        Some(Uuid::new_v4().to_string())
    }

    async fn authorise(&self, request: AuthoriseRequest) -> GatewayResult<AuthoriseResponse> {
        let body = json!({
            "type": "authorise",
            "orderCode": request.transaction_id,
            "description": request.charge_external_id,
            "amount": request.amount,
            "card": {
                "number": request.card.card_number,
                "brand": request.card.card_brand,
                "cardholderName": request.card.cardholder_name,
                "expiryDate": request.card.expiry_date,
            },
        });
        let reply: WorldpayOrderReply = self.client.post_json(&self.url, &body).await?;

        let status = match reply.last_event.as_str() {
            "AUTHORISED" => AuthoriseStatus::Authorised,
            "REFUSED" => AuthoriseStatus::Rejected,
            "3DS_REQUESTED" => {
                let (issuer_url, pa_request) = reply
                    .issuer_url
                    .zip(reply.pa_request)
                    .ok_or_else(|| {
                        GatewayError::malformed("3DS reply without issuerUrl/paRequest")
                    })?;
                AuthoriseStatus::Requires3ds {
                    issuer_url,
                    pa_request,
                }
            }
            other => {
                return Err(GatewayError::malformed(format!(
                    "unrecognised lastEvent '{other}' in authorise reply"
                )))
            }
        };

        Ok(AuthoriseResponse {
            status,
            transaction_id: reply.order_code,
            session_id: reply.machine_cookie,
        })
    }

    async fn capture(&self, request: CaptureRequest) -> GatewayResult<CaptureResponse> {
        let body = json!({
            "type": "capture",
            "orderCode": request.transaction_id,
            "amount": request.amount,
        });
        let reply: WorldpayMaintenanceReply = self.client.post_json(&self.url, &body).await?;
        if !reply.ok {
            return Err(GatewayError::generic(
                reply.error.unwrap_or_else(|| "capture refused".to_string()),
            ));
        }
        Ok(CaptureResponse {
            transaction_id: reply.order_code,
        })
    }

    async fn cancel(&self, request: CancelRequest) -> GatewayResult<CancelResponse> {
        let body = json!({
            "type": "cancel",
            "orderCode": request.transaction_id,
        });
        let reply: WorldpayMaintenanceReply = self.client.post_json(&self.url, &body).await?;
        if !reply.ok {
            return Err(GatewayError::generic(
                reply.error.unwrap_or_else(|| "cancel refused".to_string()),
            ));
        }
        Ok(CancelResponse {
            transaction_id: reply.order_code,
            settled: false,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        let body = json!({
            "type": "refund",
            "orderCode": request.transaction_id,
            "reference": request.reference,
            "amount": request.amount,
        });
        let reply: WorldpayMaintenanceReply = self.client.post_json(&self.url, &body).await?;
        if !reply.ok {
            return Err(GatewayError::generic(
                reply.error.unwrap_or_else(|| "refund refused".to_string()),
            ));
        }
        Ok(RefundResponse {
            reference: Some(request.reference),
        })
    }

    fn parse_notification(&self, payload: &str) -> Result<Vec<Notification>, String> {
        let parsed: WorldpayNotificationPayload = serde_json::from_str(payload)
            .map_err(|e| format!("undecodable worldpay notification: {e}"))?;
        Ok(vec![Notification {
            transaction_id: parsed.order_code,
            reference: parsed.reference,
            status: parsed.status,
            gateway_event_date: parsed.booking_date,
        }])
    }

    fn notification_source_verified(&self) -> bool {
        true
    }

    fn notification_domain(&self) -> Option<&str> {
        Some("worldpay.com")
    }

    fn status_mapper(&self) -> &StatusMapper {
        &STATUS_MAPPER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::status_mapper::InterpretedStatus;

    fn gateway() -> WorldpayGateway {
        WorldpayGateway::new(
            GatewayClient::new(5).unwrap(),
            "http://localhost:1/worldpay".to_string(),
        )
    }

    #[test]
    fn notification_parses_single_event() {
        let payload = r#"{"orderCode":"tx-1","status":"CAPTURED","bookingDate":"2024-03-01T10:00:00Z"}"#;
        let events = gateway().parse_notification(payload).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(events[0].status, "CAPTURED");
        assert!(events[0].gateway_event_date.is_some());
    }

    #[test]
    fn garbage_notification_is_a_parse_error() {
        assert!(gateway().parse_notification("<xml/>").is_err());
    }

    #[test]
    fn captured_token_maps_unconditionally() {
        assert_eq!(
            STATUS_MAPPER.from_token("CAPTURED", Some(ChargeStatus::CaptureSubmitted)),
            InterpretedStatus::Charge(ChargeStatus::Captured)
        );
    }

    #[test]
    fn cancelled_token_depends_on_cancel_flow_in_flight() {
        assert_eq!(
            STATUS_MAPPER.from_token("CANCELLED", Some(ChargeStatus::ExpireCancelSubmitted)),
            InterpretedStatus::Charge(ChargeStatus::Expired)
        );
        assert_eq!(
            STATUS_MAPPER.from_token("CANCELLED", Some(ChargeStatus::Captured)),
            InterpretedStatus::Unknown
        );
    }

    #[test]
    fn authorised_notification_is_ignored() {
        assert_eq!(
            STATUS_MAPPER.from_token("AUTHORISED", None),
            InterpretedStatus::Ignored
        );
    }
}
