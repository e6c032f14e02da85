use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::ChargeStatus;

/// A single payment attempt. Never deleted; terminal charges are retained
/// for audit. `version` is the optimistic-lock counter and increments on
/// every persisted mutation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "charges")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Public identifier, opaque and never reused.
    #[sea_orm(unique)]
    pub external_id: String,

    /// Amount in minor currency units. Immutable after creation.
    pub amount: i64,

    /// Canonical `ChargeStatus` token.
    pub status: String,

    pub gateway_account_id: i64,

    /// Assigned by the gateway, or locally generated before the first
    /// gateway call so the charge stays correlatable on gateway silence.
    pub gateway_transaction_id: Option<String>,

    /// Gateway-specific session correlation token.
    pub provider_session_id: Option<String>,

    /// 3-D Secure challenge data, present only when the issuer demands a
    /// challenge round-trip.
    pub issuer_url: Option<String>,
    pub pa_request: Option<String>,

    // Card detail snapshot, written once after authorisation.
    pub card_brand: Option<String>,
    pub last_digits_card_number: Option<String>,
    pub cardholder_name: Option<String>,
    pub expiry_date: Option<String>,
    pub address_line1: Option<String>,
    pub address_city: Option<String>,
    pub address_postcode: Option<String>,
    pub address_country: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::charge_event::Entity")]
    ChargeEvents,
    #[sea_orm(has_many = "super::refund::Entity")]
    Refunds,
    #[sea_orm(
        belongs_to = "super::gateway_account::Entity",
        from = "Column::GatewayAccountId",
        to = "super::gateway_account::Column::Id"
    )]
    GatewayAccount,
}

impl Related<super::charge_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChargeEvents.def()
    }
}

impl Related<super::refund::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Refunds.def()
    }
}

impl Related<super::gateway_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GatewayAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// The persisted status token, decoded. A token outside the enumeration
    /// cannot be written through this crate, so a decoding failure means the
    /// row was touched out of band and surfaces as an internal error.
    pub fn charge_status(&self) -> Result<ChargeStatus, ServiceError> {
        ChargeStatus::from_str(&self.status).map_err(|_| {
            ServiceError::InternalError(format!(
                "charge {} has unknown status token {}",
                self.id, self.status
            ))
        })
    }
}
