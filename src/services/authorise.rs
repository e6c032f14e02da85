use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::TransactionTrait;
use tracing::{info, instrument, warn};

use crate::db::DbPool;
use crate::entities::charge;
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::gateway::{
    AuthoriseRequest, AuthoriseResponse, AuthoriseStatus, CardDetails, GatewayRegistry,
    GatewayResult,
};
use crate::metrics::ConnectorMetrics;
use crate::models::ChargeStatus;
use crate::repositories::charge_repository::{self, CardSnapshot, ChargeUpdate};
use crate::services::card::{self, OperationOutcome, OperationType};
use crate::services::executor::{CardExecutor, ExecutionOutcome};

/// Card brands that can only be processed through a 3-D Secure flow.
const REQUIRES_3DS_BRANDS: &[&str] = &["maestro"];

fn brand_requires_3ds(brand: &str) -> bool {
    REQUIRES_3DS_BRANDS.contains(&brand.to_ascii_lowercase().as_str())
}

fn validate_card(card: &CardDetails) -> Result<(), ServiceError> {
    let digits = card.card_number.chars().filter(char::is_ascii_digit).count();
    if !(12..=19).contains(&digits) {
        return Err(ServiceError::ValidationError(
            "card number must be 12 to 19 digits".to_string(),
        ));
    }
    if card.cardholder_name.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "cardholder name is required".to_string(),
        ));
    }
    if card.expiry_date.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "expiry date is required".to_string(),
        ));
    }
    Ok(())
}

fn snapshot_of(card: &CardDetails) -> CardSnapshot {
    CardSnapshot {
        card_brand: card.card_brand.clone(),
        last_digits_card_number: card.last_digits(),
        cardholder_name: card.cardholder_name.clone(),
        expiry_date: card.expiry_date.clone(),
        address_line1: card.address_line1.clone(),
        address_city: card.address_city.clone(),
        address_postcode: card.address_postcode.clone(),
        address_country: card.address_country.clone(),
    }
}

/// Card authorisation, three-phase: transactional reservation, gateway call
/// on the executor, transactional reconciliation. The post-operation runs
/// inside the executor task so a caller timeout never loses the outcome.
#[derive(Clone)]
pub struct AuthoriseService {
    db: Arc<DbPool>,
    registry: Arc<GatewayRegistry>,
    executor: Arc<CardExecutor>,
    events: EventSender,
    metrics: Arc<ConnectorMetrics>,
    operation_timeout: Duration,
}

impl AuthoriseService {
    pub fn new(
        db: Arc<DbPool>,
        registry: Arc<GatewayRegistry>,
        executor: Arc<CardExecutor>,
        events: EventSender,
        metrics: Arc<ConnectorMetrics>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            executor,
            events,
            metrics,
            operation_timeout,
        }
    }

    #[instrument(skip(self, card), fields(charge = %external_id))]
    pub async fn authorise(
        &self,
        external_id: &str,
        card: CardDetails,
    ) -> Result<OperationOutcome, ServiceError> {
        validate_card(&card)?;

        let reserved = self.pre_operation(external_id, &card).await?;
        if reserved.charge_status()? == ChargeStatus::AuthorisationAborted {
            return Ok(OperationOutcome::Completed(reserved));
        }
        self.metrics.record_authorisation_attempt();

        let request = AuthoriseRequest {
            charge_external_id: reserved.external_id.clone(),
            transaction_id: reserved.gateway_transaction_id.clone(),
            amount: reserved.amount,
            card: card.clone(),
        };
        let adapter = card::adapter_for_charge(self.db.as_ref(), &self.registry, &reserved).await?;

        let db = Arc::clone(&self.db);
        let events = self.events.clone();
        let metrics = Arc::clone(&self.metrics);
        let operation = async move {
            let result = adapter.authorise(request).await;
            Self::post_operation(db, events, metrics, reserved, card, result).await
        };

        match self.executor.execute(operation, self.operation_timeout).await? {
            ExecutionOutcome::Completed(result) => result.map(OperationOutcome::Completed),
            ExecutionOutcome::InProgress => {
                let charge = charge_repository::find_by_external_id(self.db.as_ref(), external_id)
                    .await?
                    .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;
                info!(charge = %external_id, "authorisation still in progress past wait");
                Ok(OperationOutcome::InProgress(charge))
            }
        }
    }

    /// Transactional reservation. Aborts without a gateway call when the card
    /// brand demands 3-D Secure and the account cannot do it.
    pub async fn pre_operation(
        &self,
        external_id: &str,
        card: &CardDetails,
    ) -> Result<charge::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let charge = charge_repository::find_by_external_id(&txn, external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;
        let account = charge_repository::find_account(&txn, charge.gateway_account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "gateway account {} missing for charge {}",
                    charge.gateway_account_id, charge.external_id
                ))
            })?;
        let adapter = self.registry.resolve(&account.gateway_name).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "no adapter registered for gateway {}",
                account.gateway_name
            ))
        })?;

        if brand_requires_3ds(&card.card_brand) && !account.requires_3ds {
            let from = charge.charge_status()?;
            let aborted = card::transition(
                &txn,
                &charge,
                ChargeStatus::AuthorisationAborted,
                ChargeUpdate::default(),
                None,
            )
            .await?;
            txn.commit().await?;
            warn!(
                charge = %external_id,
                brand = %card.card_brand,
                "authorisation aborted: card brand requires 3-D Secure, account lacks it"
            );
            events::publish(
                &self.events,
                Event::ChargeStatusChanged {
                    external_id: aborted.external_id.clone(),
                    from,
                    to: ChargeStatus::AuthorisationAborted,
                    at: Utc::now(),
                },
            );
            return Ok(aborted);
        }

        let reserved = card::pre_operation_transition(
            &txn,
            external_id,
            OperationType::Authorise,
            &[ChargeStatus::EnteringCardDetails],
            ChargeStatus::AuthorisationReady,
            ChargeUpdate {
                gateway_transaction_id: adapter.generate_transaction_id(),
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await?;
        Ok(reserved)
    }

    /// Transactional reconciliation of the gateway's decision. The card
    /// snapshot is stored whatever the outcome, so declined and errored
    /// charges remain attributable.
    pub async fn post_operation(
        db: Arc<DbPool>,
        events: EventSender,
        metrics: Arc<ConnectorMetrics>,
        reserved: charge::Model,
        card: CardDetails,
        result: GatewayResult<AuthoriseResponse>,
    ) -> Result<charge::Model, ServiceError> {
        let snapshot = snapshot_of(&card);
        let (next, update) = match result {
            Ok(response) => {
                let base = ChargeUpdate {
                    gateway_transaction_id: response.transaction_id,
                    provider_session_id: response.session_id,
                    card: Some(snapshot),
                    ..Default::default()
                };
                match response.status {
                    AuthoriseStatus::Authorised => (ChargeStatus::AuthorisationSuccess, base),
                    AuthoriseStatus::Rejected => (ChargeStatus::AuthorisationRejected, base),
                    AuthoriseStatus::Requires3ds {
                        issuer_url,
                        pa_request,
                    } => (
                        ChargeStatus::Authorisation3dsRequired,
                        ChargeUpdate {
                            issuer_url: Some(issuer_url),
                            pa_request: Some(pa_request),
                            ..base
                        },
                    ),
                }
            }
            Err(err) => {
                warn!(
                    charge = %reserved.external_id,
                    kind = ?err.kind,
                    error = %err.message,
                    "authorisation failed at the gateway"
                );
                (
                    card::authorisation_failure_status(err.kind),
                    ChargeUpdate {
                        card: Some(snapshot),
                        ..Default::default()
                    },
                )
            }
        };

        let txn = db.begin().await?;
        let updated = card::transition(&txn, &reserved, next, update, None).await?;
        txn.commit().await?;

        match next {
            ChargeStatus::AuthorisationSuccess => metrics.record_authorisation_success(),
            ChargeStatus::AuthorisationRejected => metrics.record_authorisation_rejected(),
            ChargeStatus::Authorisation3dsRequired => {}
            _ => metrics.record_authorisation_error(),
        }
        events::publish(
            &events,
            Event::ChargeStatusChanged {
                external_id: updated.external_id.clone(),
                from: ChargeStatus::AuthorisationReady,
                to: next,
                at: Utc::now(),
            },
        );
        Ok(updated)
    }
}
