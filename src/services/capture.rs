use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::TransactionTrait;
use tracing::{info, instrument, warn};

use crate::db::DbPool;
use crate::entities::charge;
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::gateway::{CaptureRequest, CaptureResponse, GatewayRegistry, GatewayResult};
use crate::metrics::ConnectorMetrics;
use crate::models::ChargeStatus;
use crate::repositories::charge_repository::{self, ChargeUpdate};
use crate::services::card::{self, OperationOutcome, OperationType};
use crate::services::executor::{CardExecutor, ExecutionOutcome};

/// Capture orchestration. The caller-facing entry only approves the charge
/// for capture; the gateway call happens later from the batch processor, so
/// capture success means "submitted", with settlement confirmed by the
/// provider's notification.
#[derive(Clone)]
pub struct CaptureService {
    db: Arc<DbPool>,
    registry: Arc<GatewayRegistry>,
    executor: Arc<CardExecutor>,
    events: EventSender,
    metrics: Arc<ConnectorMetrics>,
    operation_timeout: Duration,
}

impl CaptureService {
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

    /// Approves an authorised charge for capture. Idempotent: re-approving
    /// an already approved charge is a no-op.
    pub async fn mark_capture_approved(
        &self,
        external_id: &str,
    ) -> Result<charge::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let charge = charge_repository::find_by_external_id(&txn, external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;

        let from = charge.charge_status()?;
        if matches!(
            from,
            ChargeStatus::CaptureApproved | ChargeStatus::CaptureApprovedRetry
        ) {
            txn.commit().await?;
            return Ok(charge);
        }
        if from != ChargeStatus::AuthorisationSuccess {
            return Err(ServiceError::IllegalState {
                external_id: external_id.to_string(),
                status: from,
            });
        }

        let updated = card::transition(
            &txn,
            &charge,
            ChargeStatus::CaptureApproved,
            ChargeUpdate::default(),
            None,
        )
        .await?;
        txn.commit().await?;
        events::publish(
            &self.events,
            Event::ChargeStatusChanged {
                external_id: updated.external_id.clone(),
                from,
                to: ChargeStatus::CaptureApproved,
                at: Utc::now(),
            },
        );
        Ok(updated)
    }

    /// One capture attempt against the gateway, driven by the batch
    /// processor. Failure parks the charge in CAPTURE_APPROVED_RETRY for a
    /// later sweep.
    #[instrument(skip(self), fields(charge = %external_id))]
    pub async fn do_capture(&self, external_id: &str) -> Result<OperationOutcome, ServiceError> {
        let reserved = self.pre_operation(external_id).await?;

        let adapter = card::adapter_for_charge(self.db.as_ref(), &self.registry, &reserved).await?;
        let transaction_id = reserved.gateway_transaction_id.clone().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "charge {} reached capture without a gateway transaction id",
                reserved.external_id
            ))
        })?;
        let request = CaptureRequest {
            charge_external_id: reserved.external_id.clone(),
            transaction_id,
            amount: reserved.amount,
        };

        let db = Arc::clone(&self.db);
        let events = self.events.clone();
        let metrics = Arc::clone(&self.metrics);
        let operation = async move {
            let result = adapter.capture(request).await;
            Self::post_operation(db, events, metrics, reserved, result).await
        };

        match self.executor.execute(operation, self.operation_timeout).await? {
            ExecutionOutcome::Completed(result) => result.map(OperationOutcome::Completed),
            ExecutionOutcome::InProgress => {
                let charge = charge_repository::find_by_external_id(self.db.as_ref(), external_id)
                    .await?
                    .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;
                info!(charge = %external_id, "capture still in progress past wait");
                Ok(OperationOutcome::InProgress(charge))
            }
        }
    }

    pub async fn pre_operation(&self, external_id: &str) -> Result<charge::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let reserved = card::pre_operation_transition(
            &txn,
            external_id,
            OperationType::Capture,
            &[
                ChargeStatus::CaptureApproved,
                ChargeStatus::CaptureApprovedRetry,
            ],
            ChargeStatus::CaptureReady,
            ChargeUpdate::default(),
        )
        .await?;
        txn.commit().await?;
        Ok(reserved)
    }

    pub async fn post_operation(
        db: Arc<DbPool>,
        events: EventSender,
        metrics: Arc<ConnectorMetrics>,
        reserved: charge::Model,
        result: GatewayResult<CaptureResponse>,
    ) -> Result<charge::Model, ServiceError> {
        let (next, update) = match result {
            Ok(response) => (
                ChargeStatus::CaptureSubmitted,
                ChargeUpdate {
                    gateway_transaction_id: response.transaction_id,
                    ..Default::default()
                },
            ),
            Err(err) => {
                warn!(
                    charge = %reserved.external_id,
                    kind = ?err.kind,
                    error = %err.message,
                    "capture failed at the gateway, scheduling retry"
                );
                (ChargeStatus::CaptureApprovedRetry, ChargeUpdate::default())
            }
        };

        let txn = db.begin().await?;
        let updated = card::transition(&txn, &reserved, next, update, None).await?;
        txn.commit().await?;

        match next {
            ChargeStatus::CaptureSubmitted => metrics.record_capture_submitted(),
            _ => metrics.record_capture_retried(),
        }
        events::publish(
            &events,
            Event::ChargeStatusChanged {
                external_id: updated.external_id.clone(),
                from: ChargeStatus::CaptureReady,
                to: next,
                at: Utc::now(),
            },
        );
        Ok(updated)
    }

    /// Abandons a charge whose capture retries are exhausted. No gateway
    /// call; the money stays authorised at the provider for manual followup.
    pub async fn mark_capture_error(
        &self,
        charge: &charge::Model,
    ) -> Result<charge::Model, ServiceError> {
        let from = charge.charge_status()?;
        let txn = self.db.begin().await?;
        let updated = card::transition(
            &txn,
            charge,
            ChargeStatus::CaptureError,
            ChargeUpdate::default(),
            None,
        )
        .await?;
        txn.commit().await?;
        self.metrics.record_capture_error();
        events::publish(
            &self.events,
            Event::ChargeStatusChanged {
                external_id: updated.external_id.clone(),
                from,
                to: ChargeStatus::CaptureError,
                at: Utc::now(),
            },
        );
        Ok(updated)
    }
}
