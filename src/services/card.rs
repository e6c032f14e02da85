//! Shared machinery for gateway-backed charge operations.
//!
//! Authorise, capture, and cancel all follow the same three-phase shape:
//! a transactional pre-operation that reserves the charge in a ready status,
//! the gateway call on the bounded executor, and a transactional
//! post-operation that records the outcome. The helpers here implement the
//! pieces every operation shares so no service hand-rolls its own state
//! checks.

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use strum::Display;

use crate::entities::charge;
use crate::errors::ServiceError;
use crate::gateway::GatewayErrorKind;
use crate::models::ChargeStatus;
use crate::repositories::charge_event_repository;
use crate::repositories::charge_repository::{self, ChargeUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperationType {
    Authorise,
    Capture,
    Cancel,
}

/// How a synchronous gateway operation concluded from the caller's side.
#[derive(Debug)]
pub enum OperationOutcome {
    Completed(charge::Model),
    /// The caller's wait elapsed; the charge is still in its ready status
    /// and the operation finishes in the background.
    InProgress(charge::Model),
}

impl OperationOutcome {
    pub fn charge(&self) -> &charge::Model {
        match self {
            OperationOutcome::Completed(charge) | OperationOutcome::InProgress(charge) => charge,
        }
    }
}

/// Applies a status transition: checks it against the legal-transition table,
/// performs the version-conditioned update, and appends the event row. All
/// charge mutations in the crate go through here.
pub async fn transition<C: ConnectionTrait>(
    conn: &C,
    current: &charge::Model,
    next: ChargeStatus,
    update: ChargeUpdate,
    gateway_event_date: Option<DateTime<Utc>>,
) -> Result<charge::Model, ServiceError> {
    current.charge_status()?.assert_legal(next)?;
    let updated = charge_repository::update_status_with_optimistic_check(conn, current, next, update)
        .await?;
    charge_event_repository::append(conn, updated.id, next, gateway_event_date).await?;
    Ok(updated)
}

/// Transactional pre-operation: loads the charge and moves it into
/// `ready_status`, reserving it for exactly one in-flight operation.
///
/// A charge already sitting in the ready status means another request got
/// there first. A status outside `eligible_states` is a caller mistake. Both
/// are distinguished so the boundary can answer 409 versus 400.
pub async fn pre_operation_transition<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
    operation: OperationType,
    eligible_states: &[ChargeStatus],
    ready_status: ChargeStatus,
    update: ChargeUpdate,
) -> Result<charge::Model, ServiceError> {
    let charge = charge_repository::find_by_external_id(conn, external_id)
        .await?
        .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;

    let status = charge.charge_status()?;
    if status == ready_status {
        return Err(ServiceError::OperationAlreadyInProgress(
            external_id.to_string(),
        ));
    }
    if !eligible_states.contains(&status) {
        tracing::info!(
            charge = %external_id,
            %status,
            %operation,
            "charge not eligible for operation"
        );
        return Err(ServiceError::IllegalState {
            external_id: external_id.to_string(),
            status,
        });
    }

    transition(conn, &charge, ready_status, update, None).await
}

/// Resolves the gateway adapter for a charge through its account row. A
/// missing account or unregistered provider is an invariant violation, not a
/// caller error.
pub async fn adapter_for_charge<C: ConnectionTrait>(
    conn: &C,
    registry: &crate::gateway::GatewayRegistry,
    charge: &charge::Model,
) -> Result<std::sync::Arc<dyn crate::gateway::GatewayAdapter>, ServiceError> {
    let account = charge_repository::find_account(conn, charge.gateway_account_id)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "gateway account {} missing for charge {}",
                charge.gateway_account_id, charge.external_id
            ))
        })?;
    registry.resolve(&account.gateway_name).ok_or_else(|| {
        ServiceError::InternalError(format!(
            "no adapter registered for gateway {}",
            account.gateway_name
        ))
    })
}

/// Charge status recorded when an authorisation attempt fails before the
/// gateway gives a decision.
pub fn authorisation_failure_status(kind: GatewayErrorKind) -> ChargeStatus {
    match kind {
        GatewayErrorKind::Generic => ChargeStatus::AuthorisationError,
        GatewayErrorKind::ConnectionTimeout => ChargeStatus::AuthorisationTimeout,
        GatewayErrorKind::MalformedResponse
        | GatewayErrorKind::Dns
        | GatewayErrorKind::Socket
        | GatewayErrorKind::UnexpectedHttpStatus => ChargeStatus::AuthorisationUnexpectedError,
    }
}
