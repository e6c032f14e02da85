use std::sync::Arc;

use chrono::Utc;
use sea_orm::{Set, TransactionTrait};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{charge, charge_event};
use crate::errors::ServiceError;
use crate::events::{self, Event, EventSender};
use crate::models::ChargeStatus;
use crate::repositories::{charge_event_repository, charge_repository};
use crate::services::card;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewCharge {
    pub gateway_account_id: i64,
    /// Amount in minor currency units.
    #[validate(range(min = 1))]
    pub amount: i64,
}

/// Charge creation and read access. Gateway-backed operations live in their
/// own services; this one only handles the pre-gateway lifecycle.
#[derive(Clone)]
pub struct ChargeService {
    db: Arc<DbPool>,
    events: EventSender,
}

impl ChargeService {
    pub fn new(db: Arc<DbPool>, events: EventSender) -> Self {
        Self { db, events }
    }

    pub async fn create_charge(&self, new_charge: NewCharge) -> Result<charge::Model, ServiceError> {
        new_charge
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        charge_repository::find_account(self.db.as_ref(), new_charge.gateway_account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "unknown gateway account {}",
                    new_charge.gateway_account_id
                ))
            })?;

        let now = Utc::now();
        let model = charge::ActiveModel {
            external_id: Set(Uuid::new_v4().simple().to_string()),
            amount: Set(new_charge.amount),
            status: Set(ChargeStatus::Created.to_string()),
            gateway_account_id: Set(new_charge.gateway_account_id),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(0),
            ..Default::default()
        };
        // The row and its CREATED event land together or not at all.
        let txn = self.db.begin().await?;
        let charge = charge_repository::persist(&txn, model).await?;
        charge_event_repository::append(&txn, charge.id, ChargeStatus::Created, None).await?;
        txn.commit().await?;
        tracing::info!(charge = %charge.external_id, amount = charge.amount, "charge created");
        Ok(charge)
    }

    pub async fn find_charge(&self, external_id: &str) -> Result<charge::Model, ServiceError> {
        charge_repository::find_by_external_id(self.db.as_ref(), external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))
    }

    pub async fn charge_events(
        &self,
        external_id: &str,
    ) -> Result<Vec<charge_event::Model>, ServiceError> {
        let charge = self.find_charge(external_id).await?;
        charge_event_repository::find_for_charge(self.db.as_ref(), charge.id).await
    }

    /// The only caller-driven plain status change: the payment page reporting
    /// that the user has started entering card details.
    pub async fn begin_card_details(&self, external_id: &str) -> Result<charge::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let charge = charge_repository::find_by_external_id(&txn, external_id)
            .await?
            .ok_or_else(|| ServiceError::ChargeNotFound(external_id.to_string()))?;
        let from = charge.charge_status()?;
        // Re-announcing the same step is a no-op, not an error.
        if from == ChargeStatus::EnteringCardDetails {
            txn.commit().await?;
            return Ok(charge);
        }
        let updated = card::transition(
            &txn,
            &charge,
            ChargeStatus::EnteringCardDetails,
            Default::default(),
            None,
        )
        .await?;
        txn.commit().await?;
        events::publish(
            &self.events,
            Event::ChargeStatusChanged {
                external_id: updated.external_id.clone(),
                from,
                to: ChargeStatus::EnteringCardDetails,
                at: Utc::now(),
            },
        );
        Ok(updated)
    }
}
