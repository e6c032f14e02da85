use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A merchant's account with one payment gateway. Credential management is
/// handled elsewhere; the connector only needs the provider name and the
/// account's 3-D Secure capability.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateway_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub gateway_name: String,
    pub service_name: Option<String>,
    pub requires_3ds: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::charge::Entity")]
    Charges,
}

impl Related<super::charge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Charges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
