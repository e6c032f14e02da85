use std::sync::Arc;

use futures::future::BoxFuture;
use sea_orm::{DatabaseTransaction, TransactionTrait};

use crate::db::DbPool;
use crate::errors::ServiceError;

/// Ordered composition of transactional and non-transactional steps sharing
/// one typed context.
///
/// Transactional steps run inside a database transaction and roll back on
/// error; non-transactional steps (gateway I/O) run outside any transaction
/// so no locks are held across slow network calls. Any step error aborts the
/// remaining steps and propagates to the caller. This is a single-request
/// saga without automatic compensation: each step must leave durable state
/// consistent on its own.
///
/// ```ignore
/// let context = TransactionFlow::new(db, RefundContext::default())
///     .transactional(|txn, ctx| Box::pin(prepare(txn, ctx)))
///     .await?
///     .non_transactional(|ctx| Box::pin(call_gateway(ctx)))
///     .await?
///     .complete();
/// ```
pub struct TransactionFlow<C> {
    db: Arc<DbPool>,
    context: C,
}

impl<C: Send> TransactionFlow<C> {
    pub fn new(db: Arc<DbPool>, context: C) -> Self {
        Self { db, context }
    }

    /// Runs the step inside a transaction; commits on success, rolls back
    /// and aborts the flow on error.
    pub async fn transactional<F>(mut self, step: F) -> Result<Self, ServiceError>
    where
        F: for<'a> FnOnce(
                &'a DatabaseTransaction,
                &'a mut C,
            ) -> BoxFuture<'a, Result<(), ServiceError>>
            + Send,
    {
        let txn = self.db.begin().await?;
        match step(&txn, &mut self.context).await {
            Ok(()) => {
                txn.commit().await?;
                Ok(self)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Runs the step with no transaction open.
    pub async fn non_transactional<F>(mut self, step: F) -> Result<Self, ServiceError>
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), ServiceError>> + Send,
    {
        step(&mut self.context).await?;
        Ok(self)
    }

    pub fn complete(self) -> C {
        self.context
    }
}
