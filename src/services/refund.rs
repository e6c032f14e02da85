use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use sea_orm::Set;
use strum::Display;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::refund;
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::gateway::{GatewayAdapter, GatewayRegistry, GatewayResult, RefundRequest, RefundResponse};
use crate::metrics::ConnectorMetrics;
use crate::models::{ChargeStatus, RefundStatus};
use crate::repositories::{charge_repository, refund_repository};
use crate::services::transaction::TransactionFlow;

/// Whether a charge can take a refund right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RefundAvailability {
    Available,
    /// The charge failed or was cancelled; nothing was ever taken.
    Unavailable,
    /// Money is authorised but not yet captured.
    Pending,
    /// The captured amount is fully refunded already.
    Full,
}

fn availability_of(status: ChargeStatus, remaining: i64) -> RefundAvailability {
    use ChargeStatus::*;
    match status {
        Captured => {
            if remaining > 0 {
                RefundAvailability::Available
            } else {
                RefundAvailability::Full
            }
        }
        AuthorisationSuccess | CaptureApproved | CaptureApprovedRetry | CaptureReady
        | CaptureSubmitted | CaptureUnknown => RefundAvailability::Pending,
        _ => RefundAvailability::Unavailable,
    }
}

#[derive(Default)]
struct RefundContext {
    adapter: Option<Arc<dyn GatewayAdapter>>,
    charge_external_id: String,
    refund: Option<refund::Model>,
    request: Option<RefundRequest>,
    gateway_result: Option<GatewayResult<RefundResponse>>,
}

/// Refund submission over a prepare / gateway / finish pipeline. The gateway
/// step runs outside any transaction; its result is folded back into the
/// refund row afterwards, so a gateway failure still leaves a queryable
/// REFUND_ERROR row behind.
#[derive(Clone)]
pub struct RefundService {
    db: Arc<DbPool>,
    registry: Arc<GatewayRegistry>,
    events: EventSender,
    metrics: Arc<ConnectorMetrics>,
}

impl RefundService {
    pub fn new(
        db: Arc<DbPool>,
        registry: Arc<GatewayRegistry>,
        events: EventSender,
        metrics: Arc<ConnectorMetrics>,
    ) -> Self {
        Self {
            db,
            registry,
            events,
            metrics,
        }
    }

    #[instrument(skip(self), fields(charge = %charge_external_id, amount))]
    pub async fn submit_refund(
        &self,
        charge_external_id: &str,
        amount: i64,
    ) -> Result<refund::Model, ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::ValidationError(
                "refund amount must be positive".to_string(),
            ));
        }

        let registry = Arc::clone(&self.registry);
        let charge_id = charge_external_id.to_string();
        let metrics = Arc::clone(&self.metrics);
        let events = self.events.clone();

        let context = TransactionFlow::new(Arc::clone(&self.db), RefundContext::default())
            .transactional(move |txn, ctx| {
                async move {
                    let charge = charge_repository::find_by_external_id(txn, &charge_id)
                        .await?
                        .ok_or_else(|| ServiceError::ChargeNotFound(charge_id.clone()))?;

                    let held = refund_repository::amount_held_for_charge(txn, charge.id).await?;
                    let remaining = charge.amount - held;
                    let availability = availability_of(charge.charge_status()?, remaining);
                    if availability != RefundAvailability::Available {
                        return Err(ServiceError::RefundUnavailable {
                            external_id: charge.external_id,
                            availability: availability.to_string(),
                        });
                    }
                    if amount > remaining {
                        return Err(ServiceError::InsufficientRefundAmount {
                            requested: amount,
                            available: remaining,
                        });
                    }

                    let adapter = super::card::adapter_for_charge(txn, &registry, &charge).await?;
                    let transaction_id =
                        charge.gateway_transaction_id.clone().ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "captured charge {} has no gateway transaction id",
                                charge.external_id
                            ))
                        })?;

                    let model = refund::ActiveModel {
                        external_id: Set(Uuid::new_v4().simple().to_string()),
                        charge_id: Set(charge.id),
                        amount: Set(amount),
                        status: Set(RefundStatus::Created.to_string()),
                        created_at: Set(Utc::now()),
                        ..Default::default()
                    };
                    let persisted = refund_repository::persist(txn, model).await?;
                    info!(
                        refund = %persisted.external_id,
                        charge = %charge.external_id,
                        amount,
                        remaining_before = remaining,
                        "refund created"
                    );

                    ctx.request = Some(RefundRequest {
                        reference: persisted.external_id.clone(),
                        transaction_id,
                        amount,
                    });
                    ctx.charge_external_id = charge.external_id;
                    ctx.refund = Some(persisted);
                    ctx.adapter = Some(adapter);
                    Ok(())
                }
                .boxed()
            })
            .await?
            .non_transactional(|ctx| {
                async move {
                    // Prepare always fills these before this step runs.
                    let (adapter, request) = match (&ctx.adapter, ctx.request.take()) {
                        (Some(adapter), Some(request)) => (Arc::clone(adapter), request),
                        _ => {
                            return Err(ServiceError::InternalError(
                                "refund pipeline context missing gateway request".to_string(),
                            ))
                        }
                    };
                    // The result is folded into the refund row in the finish
                    // step; a gateway failure must not abort the pipeline.
                    ctx.gateway_result = Some(adapter.refund(request).await);
                    Ok(())
                }
                .boxed()
            })
            .await?
            .transactional(move |txn, ctx| {
                async move {
                    let created = ctx.refund.take().ok_or_else(|| {
                        ServiceError::InternalError(
                            "refund pipeline context missing refund row".to_string(),
                        )
                    })?;
                    let refund = refund_repository::find_by_id(txn, created.id)
                        .await?
                        .ok_or_else(|| ServiceError::RefundNotFound(created.external_id.clone()))?;
                    // A provider notification may settle the refund before
                    // this step runs; its word is final.
                    if refund.refund_status()? != RefundStatus::Created {
                        info!(
                            refund = %refund.external_id,
                            status = %refund.status,
                            "refund already advanced by a notification"
                        );
                        ctx.refund = Some(refund);
                        return Ok(());
                    }

                    let settles_instantly = ctx
                        .adapter
                        .as_ref()
                        .map(|a| a.refund_settles_instantly())
                        .unwrap_or(false);
                    let next = match ctx.gateway_result.take() {
                        Some(Ok(_)) if settles_instantly => RefundStatus::Refunded,
                        Some(Ok(_)) => RefundStatus::RefundSubmitted,
                        Some(Err(err)) => {
                            warn!(
                                refund = %refund.external_id,
                                kind = ?err.kind,
                                error = %err.message,
                                "refund failed at the gateway"
                            );
                            RefundStatus::RefundError
                        }
                        None => RefundStatus::RefundError,
                    };

                    match refund_repository::update_status(txn, &refund, next).await {
                        Ok(updated) => {
                            if next == RefundStatus::RefundError {
                                metrics.record_refund_error();
                            } else {
                                metrics.record_refund_submitted();
                            }
                            events::publish(
                                &events,
                                Event::RefundStatusChanged {
                                    external_id: updated.external_id.clone(),
                                    charge_external_id: ctx.charge_external_id.clone(),
                                    status: next,
                                    at: Utc::now(),
                                },
                            );
                            ctx.refund = Some(updated);
                        }
                        // Lost the write race; keep whatever the winner wrote.
                        Err(ServiceError::Conflict(_)) => {
                            let current = refund_repository::find_by_id(txn, refund.id)
                                .await?
                                .ok_or_else(|| {
                                    ServiceError::RefundNotFound(refund.external_id.clone())
                                })?;
                            info!(
                                refund = %current.external_id,
                                status = %current.status,
                                "refund advanced concurrently, keeping its status"
                            );
                            ctx.refund = Some(current);
                        }
                        Err(err) => return Err(err),
                    }
                    Ok(())
                }
                .boxed()
            })
            .await?
            .complete();

        context.refund.ok_or_else(|| {
            ServiceError::InternalError("refund pipeline completed without a refund".to_string())
        })
    }

    pub async fn find_refund(
        &self,
        charge_external_id: &str,
        refund_external_id: &str,
    ) -> Result<refund::Model, ServiceError> {
        let charge = charge_repository::find_by_external_id(self.db.as_ref(), charge_external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(charge_external_id.to_string()))?;
        let refund = refund_repository::find_by_external_id(self.db.as_ref(), refund_external_id)
            .await?
            .filter(|r| r.charge_id == charge.id)
            .ok_or_else(|| ServiceError::RefundNotFound(refund_external_id.to_string()))?;
        Ok(refund)
    }

    pub async fn refunds_for_charge(
        &self,
        charge_external_id: &str,
    ) -> Result<Vec<refund::Model>, ServiceError> {
        let charge = charge_repository::find_by_external_id(self.db.as_ref(), charge_external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(charge_external_id.to_string()))?;
        refund_repository::find_for_charge(self.db.as_ref(), charge.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_captured_charges_with_remaining_balance_are_available() {
        assert_eq!(
            availability_of(ChargeStatus::Captured, 100),
            RefundAvailability::Available
        );
        assert_eq!(
            availability_of(ChargeStatus::Captured, 0),
            RefundAvailability::Full
        );
    }

    #[test]
    fn authorised_but_uncaptured_charges_are_pending() {
        for status in [
            ChargeStatus::AuthorisationSuccess,
            ChargeStatus::CaptureApproved,
            ChargeStatus::CaptureSubmitted,
        ] {
            assert_eq!(availability_of(status, 500), RefundAvailability::Pending);
        }
    }

    #[test]
    fn failed_and_early_charges_are_unavailable() {
        for status in [
            ChargeStatus::Created,
            ChargeStatus::AuthorisationRejected,
            ChargeStatus::UserCancelled,
            ChargeStatus::Expired,
        ] {
            assert_eq!(availability_of(status, 500), RefundAvailability::Unavailable);
        }
    }
}
