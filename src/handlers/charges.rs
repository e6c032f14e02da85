use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{charge, charge_event, refund};
use crate::errors::ServiceError;
use crate::gateway::CardDetails;
use crate::models::{ChargeStatus, ExternalChargeState};
use crate::services::{CancelType, NewCharge, OperationOutcome};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub charge_id: String,
    pub amount: i64,
    pub status: ChargeStatus,
    pub state: ExternalChargeState,
    pub gateway_account_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pa_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_digits_card_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<charge::Model> for ChargeResponse {
    type Error = ServiceError;

    fn try_from(model: charge::Model) -> Result<Self, ServiceError> {
        let status = model.charge_status()?;
        Ok(Self {
            charge_id: model.external_id,
            amount: model.amount,
            status,
            state: status.to_external(),
            gateway_account_id: model.gateway_account_id,
            gateway_transaction_id: model.gateway_transaction_id,
            issuer_url: model.issuer_url,
            pa_request: model.pa_request,
            card_brand: model.card_brand,
            last_digits_card_number: model.last_digits_card_number,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub refund_id: String,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<refund::Model> for RefundResponse {
    fn from(model: refund::Model) -> Self {
        Self {
            refund_id: model.external_id,
            amount: model.amount,
            status: model.status,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChargeEventResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_event_date: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

impl From<charge_event::Model> for ChargeEventResponse {
    fn from(model: charge_event::Model) -> Self {
        Self {
            status: model.status,
            gateway_event_date: model.gateway_event_date,
            updated: model.updated,
        }
    }
}

pub async fn create_charge(
    State(state): State<Arc<AppState>>,
    Json(new_charge): Json<NewCharge>,
) -> Result<impl IntoResponse, ServiceError> {
    let charge = state.charges.create_charge(new_charge).await?;
    Ok((StatusCode::CREATED, Json(ChargeResponse::try_from(charge)?)))
}

pub async fn get_charge(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<Json<ChargeResponse>, ServiceError> {
    let charge = state.charges.find_charge(&external_id).await?;
    Ok(Json(ChargeResponse::try_from(charge)?))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub new_status: String,
}

/// The payment page may only announce ENTERING_CARD_DETAILS; every other
/// status is owned by the services.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<Json<ChargeResponse>, ServiceError> {
    if body.new_status != ChargeStatus::EnteringCardDetails.to_string() {
        return Err(ServiceError::ValidationError(format!(
            "status {} cannot be set by the caller",
            body.new_status
        )));
    }
    let charge = state.charges.begin_card_details(&external_id).await?;
    Ok(Json(ChargeResponse::try_from(charge)?))
}

#[derive(Debug, Deserialize)]
pub struct AuthoriseRequestBody {
    pub card_number: String,
    pub card_brand: String,
    pub cardholder_name: String,
    pub expiry_date: String,
    #[serde(default)]
    pub address_line1: Option<String>,
    #[serde(default)]
    pub address_city: Option<String>,
    #[serde(default)]
    pub address_postcode: Option<String>,
    #[serde(default)]
    pub address_country: Option<String>,
}

impl From<AuthoriseRequestBody> for CardDetails {
    fn from(body: AuthoriseRequestBody) -> Self {
        CardDetails {
            card_number: body.card_number,
            card_brand: body.card_brand,
            cardholder_name: body.cardholder_name,
            expiry_date: body.expiry_date,
            address_line1: body.address_line1,
            address_city: body.address_city,
            address_postcode: body.address_postcode,
            address_country: body.address_country,
        }
    }
}

pub async fn authorise(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Json(body): Json<AuthoriseRequestBody>,
) -> Result<Response, ServiceError> {
    let outcome = state.authorise.authorise(&external_id, body.into()).await?;
    let (status, charge) = match outcome {
        OperationOutcome::InProgress(charge) => (StatusCode::ACCEPTED, charge),
        OperationOutcome::Completed(charge) => {
            let code = match charge.charge_status()? {
                ChargeStatus::AuthorisationSuccess | ChargeStatus::Authorisation3dsRequired => {
                    StatusCode::OK
                }
                ChargeStatus::AuthorisationRejected | ChargeStatus::AuthorisationAborted => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, charge)
        }
    };
    Ok((status, Json(ChargeResponse::try_from(charge)?)).into_response())
}

/// Approves the charge for capture; the gateway call happens asynchronously
/// from the capture sweep.
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.capture.mark_capture_approved(&external_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequestBody {
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    body: Option<Json<CancelRequestBody>>,
) -> Result<Response, ServiceError> {
    let cancel_type = match body.and_then(|Json(b)| b.cancelled_by) {
        Some(ref by) if by == "system" => CancelType::System,
        Some(ref by) if by == "user" => CancelType::User,
        None => CancelType::User,
        Some(other) => {
            return Err(ServiceError::ValidationError(format!(
                "unknown cancel principal {other}"
            )))
        }
    };
    match state.cancel.cancel(&external_id, cancel_type).await? {
        OperationOutcome::Completed(_) => Ok(StatusCode::NO_CONTENT.into_response()),
        OperationOutcome::InProgress(charge) => {
            Ok((StatusCode::ACCEPTED, Json(ChargeResponse::try_from(charge)?)).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub amount: i64,
}

pub async fn submit_refund(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Json(body): Json<RefundRequestBody>,
) -> Result<impl IntoResponse, ServiceError> {
    let refund = state.refunds.submit_refund(&external_id, body.amount).await?;
    Ok((StatusCode::ACCEPTED, Json(RefundResponse::from(refund))))
}

pub async fn list_refunds(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<Json<Vec<RefundResponse>>, ServiceError> {
    let refunds = state.refunds.refunds_for_charge(&external_id).await?;
    Ok(Json(refunds.into_iter().map(RefundResponse::from).collect()))
}

pub async fn get_refund(
    State(state): State<Arc<AppState>>,
    Path((external_id, refund_external_id)): Path<(String, String)>,
) -> Result<Json<RefundResponse>, ServiceError> {
    let refund = state
        .refunds
        .find_refund(&external_id, &refund_external_id)
        .await?;
    Ok(Json(RefundResponse::from(refund)))
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<Json<Vec<ChargeEventResponse>>, ServiceError> {
    let events = state.charges.charge_events(&external_id).await?;
    Ok(Json(
        events.into_iter().map(ChargeEventResponse::from).collect(),
    ))
}
