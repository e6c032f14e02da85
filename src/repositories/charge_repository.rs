use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};

use crate::entities::{charge, charge_event, gateway_account};
use crate::errors::ServiceError;
use crate::models::ChargeStatus;

/// Card detail snapshot persisted once, after authorisation.
#[derive(Debug, Clone, Default)]
pub struct CardSnapshot {
    pub card_brand: String,
    pub last_digits_card_number: String,
    pub cardholder_name: String,
    pub expiry_date: String,
    pub address_line1: Option<String>,
    pub address_city: Option<String>,
    pub address_postcode: Option<String>,
    pub address_country: Option<String>,
}

/// Field set applied together with a status transition. `None` leaves the
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct ChargeUpdate {
    pub gateway_transaction_id: Option<String>,
    pub provider_session_id: Option<String>,
    pub issuer_url: Option<String>,
    pub pa_request: Option<String>,
    pub card: Option<CardSnapshot>,
}

pub async fn find_by_external_id<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
) -> Result<Option<charge::Model>, ServiceError> {
    Ok(charge::Entity::find()
        .filter(charge::Column::ExternalId.eq(external_id))
        .one(conn)
        .await?)
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: i64,
) -> Result<Option<charge::Model>, ServiceError> {
    Ok(charge::Entity::find_by_id(id).one(conn).await?)
}

/// Locates a charge by the pair (gateway name, gateway transaction id), the
/// only correlation key available to notification handling.
pub async fn find_by_gateway_transaction_id<C: ConnectionTrait>(
    conn: &C,
    gateway_name: &str,
    transaction_id: &str,
) -> Result<Option<charge::Model>, ServiceError> {
    Ok(charge::Entity::find()
        .inner_join(gateway_account::Entity)
        .filter(gateway_account::Column::GatewayName.eq(gateway_name))
        .filter(charge::Column::GatewayTransactionId.eq(transaction_id))
        .one(conn)
        .await?)
}

pub async fn find_account<C: ConnectionTrait>(
    conn: &C,
    account_id: i64,
) -> Result<Option<gateway_account::Model>, ServiceError> {
    Ok(gateway_account::Entity::find_by_id(account_id)
        .one(conn)
        .await?)
}

pub async fn persist<C: ConnectionTrait>(
    conn: &C,
    charge: charge::ActiveModel,
) -> Result<charge::Model, ServiceError> {
    Ok(charge.insert(conn).await?)
}

/// Transitions a charge to `new_status` (plus any extra fields) conditioned
/// on its version being unchanged: `UPDATE .. WHERE id = ? AND version = ?`.
/// Zero affected rows means a concurrent writer won and surfaces as
/// [`ServiceError::Conflict`]. A populated gateway transaction id is never
/// overwritten with a blank value.
pub async fn update_status_with_optimistic_check<C: ConnectionTrait>(
    conn: &C,
    current: &charge::Model,
    new_status: ChargeStatus,
    update: ChargeUpdate,
) -> Result<charge::Model, ServiceError> {
    let mut stmt = charge::Entity::update_many()
        .col_expr(charge::Column::Status, Expr::value(new_status.to_string()))
        .col_expr(charge::Column::Version, Expr::value(current.version + 1))
        .col_expr(charge::Column::UpdatedAt, Expr::value(Utc::now()));

    if let Some(transaction_id) = update
        .gateway_transaction_id
        .filter(|id| !id.trim().is_empty())
    {
        stmt = stmt.col_expr(
            charge::Column::GatewayTransactionId,
            Expr::value(transaction_id),
        );
    }
    if let Some(session_id) = update.provider_session_id {
        stmt = stmt.col_expr(charge::Column::ProviderSessionId, Expr::value(session_id));
    }
    if let Some(issuer_url) = update.issuer_url {
        stmt = stmt.col_expr(charge::Column::IssuerUrl, Expr::value(issuer_url));
    }
    if let Some(pa_request) = update.pa_request {
        stmt = stmt.col_expr(charge::Column::PaRequest, Expr::value(pa_request));
    }
    if let Some(card) = update.card {
        stmt = stmt
            .col_expr(charge::Column::CardBrand, Expr::value(card.card_brand))
            .col_expr(
                charge::Column::LastDigitsCardNumber,
                Expr::value(card.last_digits_card_number),
            )
            .col_expr(
                charge::Column::CardholderName,
                Expr::value(card.cardholder_name),
            )
            .col_expr(charge::Column::ExpiryDate, Expr::value(card.expiry_date))
            .col_expr(charge::Column::AddressLine1, Expr::value(card.address_line1))
            .col_expr(charge::Column::AddressCity, Expr::value(card.address_city))
            .col_expr(
                charge::Column::AddressPostcode,
                Expr::value(card.address_postcode),
            )
            .col_expr(
                charge::Column::AddressCountry,
                Expr::value(card.address_country),
            );
    }

    let result = stmt
        .filter(charge::Column::Id.eq(current.id))
        .filter(charge::Column::Version.eq(current.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "charge {} was modified concurrently (stale version {})",
            current.external_id, current.version
        )));
    }

    find_by_id(conn, current.id)
        .await?
        .ok_or_else(|| ServiceError::ChargeNotFound(current.external_id.clone()))
}

fn capture_eligibility_condition(retry_backoff: Duration) -> Condition {
    let retry_cutoff = Utc::now() - retry_backoff;
    Condition::any()
        .add(charge::Column::Status.eq(ChargeStatus::CaptureApproved.to_string()))
        .add(
            Condition::all()
                .add(charge::Column::Status.eq(ChargeStatus::CaptureApprovedRetry.to_string()))
                .add(charge::Column::UpdatedAt.lt(retry_cutoff)),
        )
}

/// Total number of charges currently awaiting capture, including retries
/// still inside their backoff window. Drives the capture queue-size metric.
pub async fn count_eligible_for_capture<C: ConnectionTrait>(conn: &C) -> Result<u64, ServiceError> {
    Ok(charge::Entity::find()
        .filter(
            Condition::any()
                .add(charge::Column::Status.eq(ChargeStatus::CaptureApproved.to_string()))
                .add(charge::Column::Status.eq(ChargeStatus::CaptureApprovedRetry.to_string())),
        )
        .count(conn)
        .await?)
}

/// Selects a bounded batch of capture-eligible charges, oldest first so no
/// charge can be starved by newer arrivals.
pub async fn find_batch_eligible_for_capture<C: ConnectionTrait>(
    conn: &C,
    batch_size: u64,
    retry_backoff: Duration,
) -> Result<Vec<charge::Model>, ServiceError> {
    Ok(charge::Entity::find()
        .filter(capture_eligibility_condition(retry_backoff))
        .order_by_asc(charge::Column::CreatedAt)
        .limit(batch_size)
        .all(conn)
        .await?)
}

/// Number of capture attempts already made for a charge, derived from the
/// append-only event history.
pub async fn count_capture_retries<C: ConnectionTrait>(
    conn: &C,
    charge_id: i64,
) -> Result<u64, ServiceError> {
    Ok(charge_event::Entity::find()
        .filter(charge_event::Column::ChargeId.eq(charge_id))
        .filter(charge_event::Column::Status.eq(ChargeStatus::CaptureApprovedRetry.to_string()))
        .count(conn)
        .await?)
}
