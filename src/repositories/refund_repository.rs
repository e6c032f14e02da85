use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::entities::refund;
use crate::errors::ServiceError;
use crate::models::RefundStatus;

pub async fn persist<C: ConnectionTrait>(
    conn: &C,
    refund: refund::ActiveModel,
) -> Result<refund::Model, ServiceError> {
    Ok(refund.insert(conn).await?)
}

pub async fn find_by_external_id<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
) -> Result<Option<refund::Model>, ServiceError> {
    Ok(refund::Entity::find()
        .filter(refund::Column::ExternalId.eq(external_id))
        .one(conn)
        .await?)
}

pub async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: i64,
) -> Result<Option<refund::Model>, ServiceError> {
    Ok(refund::Entity::find_by_id(id).one(conn).await?)
}

pub async fn find_for_charge<C: ConnectionTrait>(
    conn: &C,
    charge_id: i64,
) -> Result<Vec<refund::Model>, ServiceError> {
    Ok(refund::Entity::find()
        .filter(refund::Column::ChargeId.eq(charge_id))
        .all(conn)
        .await?)
}

/// Sum of refund amounts still holding against the charge's refundable
/// balance (everything except failed refunds).
pub async fn amount_held_for_charge<C: ConnectionTrait>(
    conn: &C,
    charge_id: i64,
) -> Result<i64, ServiceError> {
    let refunds = find_for_charge(conn, charge_id).await?;
    let mut held = 0;
    for refund in &refunds {
        if refund.refund_status()?.holds_amount() {
            held += refund.amount;
        }
    }
    Ok(held)
}

/// Conditional status write keyed on the status the caller loaded. Zero rows
/// affected means another writer (the pipeline or a notification) got there
/// first and the caller's snapshot is stale.
pub async fn update_status<C: ConnectionTrait>(
    conn: &C,
    refund: &refund::Model,
    new_status: RefundStatus,
) -> Result<refund::Model, ServiceError> {
    let result = refund::Entity::update_many()
        .col_expr(refund::Column::Status, Expr::value(new_status.to_string()))
        .filter(refund::Column::Id.eq(refund.id))
        .filter(refund::Column::Status.eq(refund.status.clone()))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "refund {} was updated concurrently (expected status {})",
            refund.external_id, refund.status
        )));
    }
    find_by_id(conn, refund.id)
        .await?
        .ok_or_else(|| ServiceError::RefundNotFound(refund.external_id.clone()))
}
