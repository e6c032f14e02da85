use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only record of a charge status transition. `gateway_event_date`
/// carries the gateway-reported time when the transition came in via a
/// notification.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "charge_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub charge_id: i64,
    pub status: String,
    pub gateway_event_date: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
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
