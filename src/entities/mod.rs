pub mod charge;
pub mod charge_event;
pub mod gateway_account;
pub mod refund;
