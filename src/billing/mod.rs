//! Payment reconciliation and the business transitions it drives.

pub mod coordinator;
pub mod ledger;
pub mod requests;
pub mod sweep;

pub use coordinator::{
    ApplyOutcome, Conversion, CoordinatorError, Settlement, apply_callback, convert, convert_in,
};
pub use ledger::{LedgerError, UsageReceipt, record_usage, sweep_expired};
pub use requests::{request_plan_change, retry_payment, subscribe_addon};
pub use sweep::{SweepReport, run_sweeps};
