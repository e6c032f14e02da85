//! Persistence operations for charges, charge events, and refunds.
//!
//! Functions are generic over [`sea_orm::ConnectionTrait`] so the same
//! operation can run on the pool or inside a caller-owned transaction, which
//! the pre/post-operation steps require.

pub mod charge_event_repository;
pub mod charge_repository;
pub mod refund_repository;
