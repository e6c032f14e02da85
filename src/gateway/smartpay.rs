use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;

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
        .ignore("AUTHORISATION")
        .map_charge("CAPTURE", ChargeStatus::Captured)
        .map_refund("REFUND", RefundStatus::Refunded)
        .map_refund("REFUND_FAILED", RefundStatus::RefundError)
        .map_charge_when(
            "CANCELLATION",
            ChargeStatus::UserCancelSubmitted,
            ChargeStatus::UserCancelled,
        )
        .map_charge_when(
            "CANCELLATION",
            ChargeStatus::SystemCancelSubmitted,
            ChargeStatus::SystemCancelled,
        )
        .map_charge_when(
            "CANCELLATION",
            ChargeStatus::ExpireCancelSubmitted,
            ChargeStatus::Expired,
        )
        .build()
});

#[derive(Debug, Deserialize)]
struct SmartpayPaymentReply {
    #[serde(rename = "pspReference")]
    psp_reference: Option<String>,
    #[serde(rename = "resultCode")]
    result_code: String,
    #[serde(rename = "issuerUrl")]
    issuer_url: Option<String>,
    #[serde(rename = "paRequest")]
    pa_request: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "refusalReason")]
    refusal_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SmartpayNotificationItem {
    #[serde(rename = "pspReference")]
    psp_reference: Option<String>,
    #[serde(rename = "originalReference")]
    original_reference: Option<String>,
    #[serde(rename = "merchantReference")]
    merchant_reference: Option<String>,
    #[serde(rename = "eventCode")]
    event_code: String,
    success: bool,
    #[serde(rename = "eventDate")]
    event_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SmartpayNotificationPayload {
    #[serde(rename = "notificationItems")]
    notification_items: Vec<SmartpayNotificationItem>,
}

/// Smartpay adapter. Transaction ids (psp references) are assigned by the
/// gateway only; notification payloads batch several events with no order
/// guarantee, and refunds confirm asynchronously.
pub struct SmartpayGateway {
    client: GatewayClient,
    url: String,
}

impl SmartpayGateway {
    pub fn new(client: GatewayClient, url: String) -> Self {
        Self { client, url }
    }

    async fn modification(
        &self,
        kind: &str,
        transaction_id: &str,
        extra: serde_json::Value,
    ) -> GatewayResult<SmartpayPaymentReply> {
        let mut body = json!({
            "type": kind,
            "originalReference": transaction_id,
        });
        if let (Some(body_map), Some(extra_map)) = (body.as_object_mut(), extra.as_object()) {
            body_map.extend(extra_map.clone());
        }
        self.client.post_json(&self.url, &body).await
    }
}

#[async_trait]
impl GatewayAdapter for SmartpayGateway {
    fn name(&self) -> PaymentGatewayName {
        PaymentGatewayName::Smartpay
    }

    /// Smartpay assigns psp references itself; there is no client-side id.
    fn generate_transaction_id(&self) -> Option<String> {
        None
    }

    async fn authorise(&self, request: AuthoriseRequest) -> GatewayResult<AuthoriseResponse> {
        let body = json!({
            "type": "authorise",
            "reference": request.charge_external_id,
            "amount": request.amount,
            "card": {
                "number": request.card.card_number,
                "brand": request.card.card_brand,
                "holderName": request.card.cardholder_name,
                "expiryDate": request.card.expiry_date,
            },
        });
        let reply: SmartpayPaymentReply = self.client.post_json(&self.url, &body).await?;

        let status = match reply.result_code.as_str() {
            "Authorised" => AuthoriseStatus::Authorised,
            "Refused" => AuthoriseStatus::Rejected,
            "RedirectShopper" => {
                let (issuer_url, pa_request) =
                    reply.issuer_url.zip(reply.pa_request).ok_or_else(|| {
                        GatewayError::malformed("RedirectShopper reply without challenge data")
                    })?;
                AuthoriseStatus::Requires3ds {
                    issuer_url,
                    pa_request,
                }
            }
            other => {
                return Err(GatewayError::malformed(format!(
                    "unrecognised resultCode '{other}' in authorise reply"
                )))
            }
        };

        Ok(AuthoriseResponse {
            status,
            transaction_id: reply.psp_reference,
            session_id: reply.session_id,
        })
    }

    async fn capture(&self, request: CaptureRequest) -> GatewayResult<CaptureResponse> {
        let reply = self
            .modification(
                "capture",
                &request.transaction_id,
                json!({ "amount": request.amount }),
            )
            .await?;
        if reply.result_code != "[capture-received]" {
            return Err(GatewayError::generic(
                reply
                    .refusal_reason
                    .unwrap_or_else(|| format!("capture refused: {}", reply.result_code)),
            ));
        }
        Ok(CaptureResponse {
            transaction_id: reply.psp_reference,
        })
    }

    async fn cancel(&self, request: CancelRequest) -> GatewayResult<CancelResponse> {
        let reply = self
            .modification("cancel", &request.transaction_id, json!({}))
            .await?;
        if reply.result_code != "[cancel-received]" {
            return Err(GatewayError::generic(
                reply
                    .refusal_reason
                    .unwrap_or_else(|| format!("cancel refused: {}", reply.result_code)),
            ));
        }
        Ok(CancelResponse {
            transaction_id: reply.psp_reference,
            settled: false,
        })
    }

    async fn refund(&self, request: RefundRequest) -> GatewayResult<RefundResponse> {
        let reply = self
            .modification(
                "refund",
                &request.transaction_id,
                json!({ "amount": request.amount, "merchantReference": request.reference }),
            )
            .await?;
        if reply.result_code != "[refund-received]" {
            return Err(GatewayError::generic(
                reply
                    .refusal_reason
                    .unwrap_or_else(|| format!("refund refused: {}", reply.result_code)),
            ));
        }
        Ok(RefundResponse {
            reference: Some(request.reference),
        })
    }

    fn parse_notification(&self, payload: &str) -> Result<Vec<Notification>, String> {
        let parsed: SmartpayNotificationPayload = serde_json::from_str(payload)
            .map_err(|e| format!("undecodable smartpay notification: {e}"))?;
        Ok(parsed
            .notification_items
            .into_iter()
            .map(|item| {
                let status = if item.success {
                    item.event_code.clone()
                } else {
                    format!("{}_FAILED", item.event_code)
                };
                Notification {
                    transaction_id: item.original_reference.or(item.psp_reference),
                    reference: item.merchant_reference,
                    status,
                    gateway_event_date: item.event_date,
                }
            })
            .collect())
    }

    fn notifications_ordered(&self) -> bool {
        false
    }

    fn status_mapper(&self) -> &StatusMapper {
        &STATUS_MAPPER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::status_mapper::InterpretedStatus;

    fn gateway() -> SmartpayGateway {
        SmartpayGateway::new(
            GatewayClient::new(5).unwrap(),
            "http://localhost:1/smartpay".to_string(),
        )
    }

    #[test]
    fn multi_event_payload_parses_every_item() {
        let payload = r#"{
            "notificationItems": [
                {"pspReference":"psp-2","originalReference":"tx-9","eventCode":"CAPTURE","success":true,"eventDate":"2024-03-01T10:05:00Z"},
                {"pspReference":"tx-9","eventCode":"AUTHORISATION","success":true,"eventDate":"2024-03-01T10:00:00Z"}
            ]
        }"#;
        let events = gateway().parse_notification(payload).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transaction_id.as_deref(), Some("tx-9"));
        assert_eq!(events[0].status, "CAPTURE");
        assert_eq!(events[1].transaction_id.as_deref(), Some("tx-9"));
    }

    #[test]
    fn failed_event_gets_failed_suffix_token() {
        let payload = r#"{"notificationItems":[{"pspReference":"tx-1","merchantReference":"rf-1","eventCode":"REFUND","success":false}]}"#;
        let events = gateway().parse_notification(payload).unwrap();
        assert_eq!(events[0].status, "REFUND_FAILED");
        assert_eq!(
            STATUS_MAPPER.from_token(&events[0].status, None),
            InterpretedStatus::Refund(RefundStatus::RefundError)
        );
    }

    #[test]
    fn smartpay_notifications_are_unordered() {
        assert!(!gateway().notifications_ordered());
    }

    #[test]
    fn authorisation_event_is_ignored() {
        assert_eq!(
            STATUS_MAPPER.from_token("AUTHORISATION", Some(ChargeStatus::AuthorisationSuccess)),
            InterpretedStatus::Ignored
        );
    }
}
