use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Refund lifecycle status.
///
/// `Refunded` is the instant-settlement success (Sandbox), `RefundSubmitted`
/// the asynchronous one confirmed later by a provider notification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Created,
    RefundSubmitted,
    RefundError,
    Refunded,
}

impl RefundStatus {
    /// Statuses that count against the charge's refundable balance. A failed
    /// refund releases its amount back to the pool.
    pub fn holds_amount(self) -> bool {
        !matches!(self, RefundStatus::RefundError)
    }
}
