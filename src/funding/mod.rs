//! Funding - money in (deposits) and money out (withdrawals)
//!
//! Both workflows share one state machine:
//!
//! ```text
//! PENDING ──approve──→ APPROVED   (ledger effect, exactly once)
//!    └──────reject───→ REJECTED   (no effect)
//! ```
//!
//! Approval writes the status and the ledger entry in one atomic unit, keyed
//! by the record id. Re-approving an approved record is a no-op.

pub mod deposit;
pub mod types;
pub mod withdraw;

pub use deposit::{Deposit, DepositWorkflow};
pub use types::FundingStatus;
pub use withdraw::{Withdrawal, WithdrawalWorkflow};
