use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entities::charge_event;
use crate::errors::ServiceError;
use crate::models::ChargeStatus;

/// Appends one event row for a status transition. `gateway_event_date` is
/// the gateway-reported time when the transition arrived via a notification.
pub async fn append<C: ConnectionTrait>(
    conn: &C,
    charge_id: i64,
    status: ChargeStatus,
    gateway_event_date: Option<DateTime<Utc>>,
) -> Result<charge_event::Model, ServiceError> {
    let event = charge_event::ActiveModel {
        charge_id: Set(charge_id),
        status: Set(status.to_string()),
        gateway_event_date: Set(gateway_event_date),
        updated: Set(Utc::now()),
        ..Default::default()
    };
    Ok(event.insert(conn).await?)
}

pub async fn find_for_charge<C: ConnectionTrait>(
    conn: &C,
    charge_id: i64,
) -> Result<Vec<charge_event::Model>, ServiceError> {
    Ok(charge_event::Entity::find()
        .filter(charge_event::Column::ChargeId.eq(charge_id))
        .order_by_asc(charge_event::Column::Updated)
        .order_by_asc(charge_event::Column::Id)
        .all(conn)
        .await?)
}
