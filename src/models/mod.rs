pub mod charge_status;
pub mod refund_status;

pub use charge_status::{ChargeStatus, ExternalChargeState, InvalidStateTransition};
pub use refund_status::RefundStatus;
