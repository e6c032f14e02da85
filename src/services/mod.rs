//! Charge and refund lifecycle orchestration.
//!
//! Gateway-backed operations (authorise, capture, cancel) share the
//! three-phase pre-operation / operation / post-operation shape in [`card`];
//! refunds and notifications compose their steps through
//! [`transaction::TransactionFlow`]; the gateway call itself always runs on
//! the bounded [`executor::CardExecutor`].

pub mod authorise;
pub mod cancel;
pub mod capture;
pub mod capture_process;
pub mod card;
pub mod charges;
pub mod executor;
pub mod notifications;
pub mod refund;
pub mod transaction;

pub use authorise::AuthoriseService;
pub use cancel::{CancelService, CancelType};
pub use capture::CaptureService;
pub use capture_process::{CaptureProcess, CaptureSweepSummary};
pub use card::{OperationOutcome, OperationType};
pub use charges::{ChargeService, NewCharge};
pub use executor::{CardExecutor, ExecutionOutcome};
pub use notifications::NotificationService;
pub use refund::{RefundAvailability, RefundService};
pub use transaction::TransactionFlow;
