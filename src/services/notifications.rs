use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use sea_orm::DatabaseTransaction;
use tracing::{debug, error, info, instrument, warn};

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::gateway::{GatewayAdapter, GatewayRegistry, Notification};
use crate::gateway::status_mapper::InterpretedStatus;
use crate::metrics::ConnectorMetrics;
use crate::models::RefundStatus;
use crate::repositories::{charge_repository, refund_repository};
use crate::services::card;
use crate::services::transaction::TransactionFlow;

#[derive(Default)]
struct NotificationContext {
    notifications: Vec<Notification>,
    applied: usize,
}

/// Inbound provider webhook processing.
///
/// The provider only needs acknowledgement, so almost nothing here is a
/// caller-visible failure: undecodable payloads, unknown tokens, unmatched
/// transactions, and out-of-order replays are all logged and skipped. The
/// only hard rejections are an unknown provider and a failed source check.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DbPool>,
    registry: Arc<GatewayRegistry>,
    events: EventSender,
    metrics: Arc<ConnectorMetrics>,
}

impl NotificationService {
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

    /// Processes one webhook delivery. Returns whether it was accepted;
    /// `false` means the provider should not have sent it here (unknown
    /// gateway or failed source verification).
    #[instrument(skip(self, payload), fields(gateway = %gateway_name))]
    pub async fn handle(
        &self,
        source_addr: Option<IpAddr>,
        gateway_name: &str,
        payload: &str,
    ) -> bool {
        let Some(adapter) = self.registry.resolve(gateway_name) else {
            warn!(gateway = gateway_name, "notification for unknown gateway");
            return false;
        };

        if adapter.notification_source_verified() {
            let allowed = match source_addr {
                Some(addr) => self.source_allowed(adapter.as_ref(), addr).await,
                None => false,
            };
            if !allowed {
                warn!(
                    gateway = gateway_name,
                    source = ?source_addr,
                    "notification source failed verification, dropping"
                );
                return false;
            }
        }

        let parse_adapter = Arc::clone(&adapter);
        let apply_adapter = Arc::clone(&adapter);
        let payload = payload.to_string();
        let gateway = gateway_name.to_string();
        let events = self.events.clone();
        let metrics = Arc::clone(&self.metrics);

        let flow = TransactionFlow::new(Arc::clone(&self.db), NotificationContext::default())
            .non_transactional(move |ctx| {
                async move {
                    match parse_adapter.parse_notification(&payload) {
                        Ok(mut notifications) => {
                            if !parse_adapter.notifications_ordered() {
                                // Option orders None first, so undated events
                                // apply before any dated ones.
                                notifications.sort_by_key(|n| n.gateway_event_date);
                            }
                            ctx.notifications = notifications;
                        }
                        Err(reason) => {
                            warn!(gateway = %parse_adapter.name(), %reason, "undecodable notification payload");
                        }
                    }
                    Ok(())
                }
                .boxed()
            })
            .await;

        let flow = match flow {
            Ok(flow) => flow,
            Err(err) => {
                error!(error = %err, "notification parse step failed");
                return true;
            }
        };

        let result = flow
            .transactional(move |txn, ctx| {
                async move {
                    for notification in std::mem::take(&mut ctx.notifications) {
                        metrics.record_notification_received();
                        match apply_one(txn, apply_adapter.as_ref(), &gateway, &events, &notification)
                            .await
                        {
                            Ok(true) => ctx.applied += 1,
                            Ok(false) => metrics.record_notification_skipped(),
                            Err(err) => {
                                // One bad event must not poison its siblings.
                                warn!(
                                    gateway = %gateway,
                                    status = %notification.status,
                                    error = %err,
                                    "notification event not applied"
                                );
                                metrics.record_notification_skipped();
                            }
                        }
                    }
                    Ok(())
                }
                .boxed()
            })
            .await;

        match result {
            Ok(flow) => {
                let context = flow.complete();
                info!(
                    gateway = gateway_name,
                    applied = context.applied,
                    "notification processed"
                );
                true
            }
            Err(err) => {
                error!(error = %err, "notification apply step failed");
                true
            }
        }
    }

    /// Checks the delivery came from the provider's own infrastructure by
    /// resolving the adapter's notification domain and comparing addresses.
    async fn source_allowed(&self, adapter: &dyn GatewayAdapter, source: IpAddr) -> bool {
        let Some(domain) = adapter.notification_domain() else {
            return false;
        };
        match tokio::net::lookup_host((domain, 443)).await {
            Ok(addrs) => addrs.into_iter().any(|addr| addr.ip() == source),
            Err(err) => {
                warn!(domain, error = %err, "notification domain did not resolve");
                false
            }
        }
    }
}

/// Applies a single notification event. `Ok(true)` means a row changed,
/// `Ok(false)` means the event was deliberately skipped.
async fn apply_one(
    txn: &DatabaseTransaction,
    adapter: &dyn GatewayAdapter,
    gateway: &str,
    events: &EventSender,
    notification: &Notification,
) -> Result<bool, ServiceError> {
    let Some(transaction_id) = notification.transaction_id.as_deref() else {
        debug!(gateway, status = %notification.status, "notification without transaction id");
        return Ok(false);
    };

    let charge =
        charge_repository::find_by_gateway_transaction_id(txn, gateway, transaction_id).await?;
    let current = charge
        .as_ref()
        .map(|c| c.charge_status())
        .transpose()?;

    match adapter.status_mapper().from_token(&notification.status, current) {
        InterpretedStatus::Ignored => {
            debug!(gateway, status = %notification.status, "notification token ignored");
            Ok(false)
        }
        InterpretedStatus::Unknown => {
            warn!(gateway, status = %notification.status, ?current, "unknown notification token");
            Ok(false)
        }
        InterpretedStatus::Charge(next) => {
            let Some(charge) = charge else {
                info!(gateway, transaction_id, "notification for unknown transaction");
                return Ok(false);
            };
            let from = charge.charge_status()?;
            // Replays and late arrivals fall out of the transition table:
            // a terminal or already-advanced charge simply refuses the move,
            // so no duplicate event row is ever written.
            if let Err(illegal) = from.assert_legal(next) {
                info!(charge = %charge.external_id, %illegal, "notification transition skipped");
                return Ok(false);
            }
            let updated = card::transition(
                txn,
                &charge,
                next,
                Default::default(),
                notification.gateway_event_date,
            )
            .await?;
            events::publish(
                events,
                Event::ChargeStatusChanged {
                    external_id: updated.external_id.clone(),
                    from,
                    to: next,
                    at: Utc::now(),
                },
            );
            Ok(true)
        }
        InterpretedStatus::Refund(next) => {
            let Some(reference) = notification.reference.as_deref() else {
                info!(gateway, transaction_id, "refund notification without reference");
                return Ok(false);
            };
            let Some(refund) = refund_repository::find_by_external_id(txn, reference).await? else {
                info!(gateway, reference, "refund notification for unknown refund");
                return Ok(false);
            };
            let current = refund.refund_status()?;
            if current == next
                || matches!(current, RefundStatus::Refunded | RefundStatus::RefundError)
            {
                info!(refund = %refund.external_id, %current, %next, "refund notification skipped");
                return Ok(false);
            }
            let charge = charge_repository::find_by_id(txn, refund.charge_id).await?;
            let updated = refund_repository::update_status(txn, &refund, next).await?;
            events::publish(
                events,
                Event::RefundStatusChanged {
                    external_id: updated.external_id.clone(),
                    charge_external_id: charge
                        .map(|c| c.external_id)
                        .unwrap_or_default(),
                    status: next,
                    at: Utc::now(),
                },
            );
            Ok(true)
        }
    }
}
