//! Ledger - the single chokepoint for balance changes
//!
//! Every credit or debit is an [`Adjustment`] carrying an idempotency key.
//! The store applies it as one atomic read-modify-write on the account and
//! appends an immutable [`LedgerEntry`]. Replaying a key returns the entry
//! recorded the first time without touching the balance again.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core_types::{AccountId, Credits, EntryId};
use crate::error::CoreError;
use crate::money::CREDIT_DECIMALS;
use crate::store::LedgerStore;

/// Why a balance changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    SignupBonus,
    RequestDebit,
    RequestRefund,
    DepositCredit,
    WithdrawalDebit,
    ReferralBonus,
    /// Operator correction outside any workflow
    ManualAdjustment,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryReason::SignupBonus => "signup_bonus",
            EntryReason::RequestDebit => "request_debit",
            EntryReason::RequestRefund => "request_refund",
            EntryReason::DepositCredit => "deposit_credit",
            EntryReason::WithdrawalDebit => "withdrawal_debit",
            EntryReason::ReferralBonus => "referral_bonus",
            EntryReason::ManualAdjustment => "manual_adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signup_bonus" => Some(EntryReason::SignupBonus),
            "request_debit" => Some(EntryReason::RequestDebit),
            "request_refund" => Some(EntryReason::RequestRefund),
            "deposit_credit" => Some(EntryReason::DepositCredit),
            "withdrawal_debit" => Some(EntryReason::WithdrawalDebit),
            "referral_bonus" => Some(EntryReason::ReferralBonus),
            "manual_adjustment" => Some(EntryReason::ManualAdjustment),
            _ => None,
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A requested balance change
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub account: AccountId,
    /// Positive credits, negative debits
    pub delta: Credits,
    pub reason: EntryReason,
    /// Unique per account; replays return the original entry
    pub idempotency_key: String,
}

impl Adjustment {
    pub fn new(
        account: AccountId,
        delta: Credits,
        reason: EntryReason,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            account,
            delta,
            reason,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn credit(
        account: AccountId,
        amount: Credits,
        reason: EntryReason,
        key: impl Into<String>,
    ) -> Self {
        Self::new(account, amount, reason, key)
    }

    pub fn debit(
        account: AccountId,
        amount: Credits,
        reason: EntryReason,
        key: impl Into<String>,
    ) -> Self {
        Self::new(account, -amount, reason, key)
    }

    /// Reject zero deltas, blank keys and over-precise amounts
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.delta.is_zero() {
            return Err(CoreError::validation("adjustment delta must be non-zero"));
        }
        if self.delta.normalize().scale() > CREDIT_DECIMALS {
            return Err(CoreError::validation(format!(
                "adjustment delta {} exceeds {} decimal places",
                self.delta, CREDIT_DECIMALS
            )));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(CoreError::validation("idempotency key is required"));
        }
        Ok(())
    }

    /// Compute the resulting entry against `balance`, or fail without effect
    pub fn apply_to(&self, balance: Credits) -> Result<LedgerEntry, CoreError> {
        let balance_after = balance + self.delta;
        if self.delta < Decimal::ZERO && balance_after < Decimal::ZERO {
            return Err(CoreError::InsufficientBalance {
                available: balance,
                required: -self.delta,
            });
        }
        Ok(LedgerEntry {
            entry_id: EntryId::new(),
            account: self.account,
            delta: self.delta,
            reason: self.reason,
            idempotency_key: self.idempotency_key.clone(),
            balance_after,
            created_at: Utc::now(),
        })
    }
}

/// Immutable audit record of one applied adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: AccountId,
    pub delta: Credits,
    pub reason: EntryReason,
    pub idempotency_key: String,
    pub balance_after: Credits,
    pub created_at: DateTime<Utc>,
}

/// Result of applying an adjustment
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The delta was applied now
    New(LedgerEntry),
    /// The key was seen before; the original entry is returned unchanged
    Replayed(LedgerEntry),
}

impl Applied {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Applied::New(e) | Applied::Replayed(e) => e,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Applied::New(e) | Applied::Replayed(e) => e,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Applied::Replayed(_))
    }
}

/// Idempotency keys derived from workflow record ids
pub mod keys {
    use crate::core_types::{AccountId, DepositId, ReferralId, RequestId, WithdrawalId};

    pub fn signup(account: AccountId) -> String {
        format!("signup:{}", account)
    }

    pub fn request_debit(id: RequestId) -> String {
        format!("request:{}:debit", id)
    }

    pub fn request_refund(id: RequestId) -> String {
        format!("request:{}:refund", id)
    }

    pub fn deposit(id: DepositId) -> String {
        format!("deposit:{}", id)
    }

    pub fn withdrawal(id: WithdrawalId) -> String {
        format!("withdrawal:{}", id)
    }

    pub fn referral(id: ReferralId) -> String {
        format!("referral:{}", id)
    }
}

/// Ledger service - the only component that writes balances
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Apply `delta` to an account atomically and idempotently.
    ///
    /// # Errors
    /// * `InsufficientBalance` - debit would go negative (no effect)
    /// * `NotFound` - unknown account
    /// * `Validation` - zero delta or empty key
    pub async fn adjust(
        &self,
        account: AccountId,
        delta: Credits,
        reason: EntryReason,
        idempotency_key: &str,
    ) -> Result<LedgerEntry, CoreError> {
        let adj = Adjustment::new(account, delta, reason, idempotency_key);
        self.apply(&adj).await
    }

    pub async fn apply(&self, adj: &Adjustment) -> Result<LedgerEntry, CoreError> {
        adj.validate()?;
        match self.store.adjust(adj).await {
            Ok(Applied::New(entry)) => {
                info!(
                    account = %entry.account,
                    delta = %entry.delta,
                    reason = %entry.reason,
                    balance = %entry.balance_after,
                    "Ledger adjusted"
                );
                Ok(entry)
            }
            Ok(Applied::Replayed(entry)) => {
                debug!(account = %adj.account, key = %adj.idempotency_key, "Ledger replay - returning original entry");
                Ok(entry)
            }
            Err(e) => {
                warn!(account = %adj.account, key = %adj.idempotency_key, error = %e, "Ledger adjustment rejected");
                Err(e)
            }
        }
    }

    /// Current server-authoritative balance
    pub async fn balance(&self, account: AccountId) -> Result<Credits, CoreError> {
        self.store
            .get_account(account)
            .await?
            .map(|a| a.balance)
            .ok_or_else(|| CoreError::not_found("Account", account))
    }

    /// All entries for an account, oldest first
    pub async fn history(&self, account: AccountId) -> Result<Vec<LedgerEntry>, CoreError> {
        self.store.entries(account).await
    }
}
