//! Credit ledger and lifecycle core for a music-services marketplace
//!
//! Users pay for requests from a prepaid credit balance, collaborators are
//! assigned to fulfil them, deposits bring money in and withdrawals pay
//! collaborators out.
//!
//! # Modules
//!
//! - [`ledger`] - The only writer of balances (atomic, idempotent)
//! - [`request`] - Request lifecycle: debit at creation, refund on cancel
//! - [`assignment`] - Fan-out of requests to collaborators
//! - [`funding`] - Deposit and withdrawal approval workflows
//! - [`referral`] - Referral pairs and their one-time bonus
//! - [`account`] - Accounts, roles and signup
//! - [`store`] - Persistence seam (in-memory and PostgreSQL)
//! - [`reconcile`] - Balance conservation check
//! - [`app`] - Service wiring

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod money;

// Infrastructure
pub mod blob;
pub mod config;
pub mod db;
pub mod logging;
pub mod notify;
pub mod store;

// Domain services
pub mod account;
pub mod assignment;
pub mod authz;
pub mod funding;
pub mod ledger;
pub mod reconcile;
pub mod referral;
pub mod request;

pub mod app;

// Convenient re-exports at crate root
pub use account::{Account, AccountRegistry, NewAccount, Role, Roles};
pub use app::Core;
pub use assignment::{Assignment, AssignmentStatus, AssignmentWorkflow, Decision};
pub use blob::{BlobRef, BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::{AppConfig, AssignmentPolicy, ReferralTrigger};
pub use core_types::{
    AccountId, AssignmentId, Credits, DepositId, EntryId, ExternalAmount, ReferralId, RequestId,
    WithdrawalId,
};
pub use error::CoreError;
pub use funding::{Deposit, DepositWorkflow, FundingStatus, Withdrawal, WithdrawalWorkflow};
pub use ledger::{EntryReason, Ledger, LedgerEntry};
pub use notify::{MemoryNotifier, Notifier, NullNotifier, TracingNotifier};
pub use reconcile::Reconciliation;
pub use referral::{Referral, ReferralLedger};
pub use request::{NewRequest, Request, RequestLifecycle, RequestStatus};
pub use store::{FailurePoint, LedgerStore, MemoryStore, PgStore};
