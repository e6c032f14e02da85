use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::RefundStatus;

/// A partial or full refund against exactly one charge. Created inside the
/// same transaction as the availability check; never deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "refunds")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub external_id: String,
    pub charge_id: i64,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::charge::Entity",
        from = "Column::ChargeId",
        to = "super::charge::Column::Id"
    )]
    Charge,
}

impl Related<super::charge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Charge.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn refund_status(&self) -> Result<RefundStatus, ServiceError> {
        RefundStatus::from_str(&self.status).map_err(|_| {
            ServiceError::InternalError(format!(
                "refund {} has unknown status token {}",
                self.id, self.status
            ))
        })
    }
}
