use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::TransactionTrait;
use strum::Display;
use tracing::{info, instrument, warn};

use crate::db::DbPool;
use crate::entities::charge;
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::gateway::{CancelRequest, CancelResponse, GatewayRegistry, GatewayResult};
use crate::models::ChargeStatus;
use crate::repositories::charge_repository::{self, ChargeUpdate};
use crate::services::card::{self, OperationOutcome, OperationType};
use crate::services::executor::{CardExecutor, ExecutionOutcome};

/// Who is cancelling. The two flavours share one implementation and differ
/// only in the status family recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CancelType {
    /// The paying user abandoning the payment.
    User,
    /// The operator voiding the payment.
    System,
}

impl CancelType {
    fn ready(self) -> ChargeStatus {
        match self {
            CancelType::User => ChargeStatus::UserCancelReady,
            CancelType::System => ChargeStatus::SystemCancelReady,
        }
    }

    fn submitted(self) -> ChargeStatus {
        match self {
            CancelType::User => ChargeStatus::UserCancelSubmitted,
            CancelType::System => ChargeStatus::SystemCancelSubmitted,
        }
    }

    fn error(self) -> ChargeStatus {
        match self {
            CancelType::User => ChargeStatus::UserCancelError,
            CancelType::System => ChargeStatus::SystemCancelError,
        }
    }

    fn cancelled(self) -> ChargeStatus {
        match self {
            CancelType::User => ChargeStatus::UserCancelled,
            CancelType::System => ChargeStatus::SystemCancelled,
        }
    }
}

/// Charges that never reached the gateway are cancelled locally.
const LOCAL_CANCEL_STATES: &[ChargeStatus] =
    &[ChargeStatus::Created, ChargeStatus::EnteringCardDetails];

/// Charges holding an authorisation must be cancelled at the gateway.
const GATEWAY_CANCEL_STATES: &[ChargeStatus] = &[
    ChargeStatus::AuthorisationSuccess,
    ChargeStatus::Authorisation3dsRequired,
];

#[derive(Clone)]
pub struct CancelService {
    db: Arc<DbPool>,
    registry: Arc<GatewayRegistry>,
    executor: Arc<CardExecutor>,
    events: EventSender,
    operation_timeout: Duration,
}

impl CancelService {
    pub fn new(
        db: Arc<DbPool>,
        registry: Arc<GatewayRegistry>,
        executor: Arc<CardExecutor>,
        events: EventSender,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            executor,
            events,
            operation_timeout,
        }
    }

    #[instrument(skip(self), fields(charge = %external_id, %cancel_type))]
    pub async fn cancel(
        &self,
        external_id: &str,
        cancel_type: CancelType,
    ) -> Result<OperationOutcome, ServiceError> {
        if let Some(cancelled) = self.try_local_cancel(external_id, cancel_type).await? {
            return Ok(OperationOutcome::Completed(cancelled));
        }

        let reserved = self.pre_operation(external_id, cancel_type).await?;
        let adapter = card::adapter_for_charge(self.db.as_ref(), &self.registry, &reserved).await?;
        let transaction_id = reserved.gateway_transaction_id.clone().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "charge {} is authorised but has no gateway transaction id",
                reserved.external_id
            ))
        })?;
        let request = CancelRequest {
            charge_external_id: reserved.external_id.clone(),
            transaction_id,
        };

        let db = Arc::clone(&self.db);
        let events = self.events.clone();
        let operation = async move {
            let result = adapter.cancel(request).await;
            Self::post_operation(db, events, reserved, cancel_type, result).await
        };

        match self.executor.execute(operation, self.operation_timeout).await? {
            ExecutionOutcome::Completed(result) => result.map(OperationOutcome::Completed),
            ExecutionOutcome::InProgress => {
                let charge = charge_repository::find_by_external_id(self.db.as_ref(), external_id)
                    .await?
                    .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;
                info!(charge = %external_id, "cancel still in progress past wait");
                Ok(OperationOutcome::InProgress(charge))
            }
        }
    }

    /// Cancels a charge that has not reached the gateway, in one transaction
    /// and without any gateway call. Returns `None` when the charge is past
    /// that point and the gateway flow must run instead.
    async fn try_local_cancel(
        &self,
        external_id: &str,
        cancel_type: CancelType,
    ) -> Result<Option<charge::Model>, ServiceError> {
        let txn = self.db.begin().await?;
        let charge = charge_repository::find_by_external_id(&txn, external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;

        let from = charge.charge_status()?;
        if !LOCAL_CANCEL_STATES.contains(&from) {
            txn.commit().await?;
            return Ok(None);
        }

        let cancelled = card::transition(
            &txn,
            &charge,
            cancel_type.cancelled(),
            ChargeUpdate::default(),
            None,
        )
        .await?;
        txn.commit().await?;
        events::publish(
            &self.events,
            Event::ChargeStatusChanged {
                external_id: cancelled.external_id.clone(),
                from,
                to: cancel_type.cancelled(),
                at: Utc::now(),
            },
        );
        Ok(Some(cancelled))
    }

    pub async fn pre_operation(
        &self,
        external_id: &str,
        cancel_type: CancelType,
    ) -> Result<charge::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let reserved = card::pre_operation_transition(
            &txn,
            external_id,
            OperationType::Cancel,
            GATEWAY_CANCEL_STATES,
            cancel_type.ready(),
            ChargeUpdate::default(),
        )
        .await?;
        txn.commit().await?;
        Ok(reserved)
    }

    pub async fn post_operation(
        db: Arc<DbPool>,
        events: EventSender,
        reserved: charge::Model,
        cancel_type: CancelType,
        result: GatewayResult<CancelResponse>,
    ) -> Result<charge::Model, ServiceError> {
        let next = match result {
            Ok(CancelResponse { settled: true, .. }) => cancel_type.cancelled(),
            Ok(CancelResponse { settled: false, .. }) => cancel_type.submitted(),
            Err(err) => {
                warn!(
                    charge = %reserved.external_id,
                    kind = ?err.kind,
                    error = %err.message,
                    "cancel failed at the gateway"
                );
                cancel_type.error()
            }
        };

        let txn = db.begin().await?;
        let updated = card::transition(&txn, &reserved, next, ChargeUpdate::default(), None).await?;
        txn.commit().await?;
        events::publish(
            &events,
            Event::ChargeStatusChanged {
                external_id: updated.external_id.clone(),
                from: cancel_type.ready(),
                to: next,
                at: Utc::now(),
            },
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_types_map_to_their_status_families() {
        assert_eq!(CancelType::User.ready(), ChargeStatus::UserCancelReady);
        assert_eq!(CancelType::User.cancelled(), ChargeStatus::UserCancelled);
        assert_eq!(CancelType::System.submitted(), ChargeStatus::SystemCancelSubmitted);
        assert_eq!(CancelType::System.error(), ChargeStatus::SystemCancelError);
    }

    #[test]
    fn every_cancel_family_transition_is_in_the_table() {
        for cancel_type in [CancelType::User, CancelType::System] {
            assert!(cancel_type.ready().can_transition(cancel_type.submitted()));
            assert!(cancel_type.ready().can_transition(cancel_type.cancelled()));
            assert!(cancel_type.ready().can_transition(cancel_type.error()));
            assert!(cancel_type.submitted().can_transition(cancel_type.cancelled()));
        }
    }
}
