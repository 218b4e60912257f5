//! Reconciliation
//!
//! Recomputes an account's balance two independent ways and compares both
//! with the stored balance:
//!
//! - from workflow records: signup bonus + approved deposits + awarded
//!   referral bonuses + manual adjustments − costs of requests not cancelled
//!   − approved withdrawal debits
//! - from the ledger: sum of all entry deltas

use rust_decimal::Decimal;
use std::fmt;

use crate::core_types::{AccountId, Credits};
use crate::error::CoreError;
use crate::funding::{Deposit, FundingStatus, Withdrawal};
use crate::ledger::EntryReason;
use crate::referral::Referral;
use crate::request::{Request, RequestStatus};
use crate::store::{self, LedgerStore, RecordFilter, RecordKind};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub account: AccountId,
    /// Stored balance
    pub balance: Credits,
    pub signup_bonus: Credits,
    pub approved_deposits: Credits,
    pub awarded_referrals: Credits,
    pub manual_adjustments: Credits,
    pub open_request_costs: Credits,
    pub approved_withdrawals: Credits,
    /// Sum of ledger entry deltas
    pub ledger_sum: Credits,
    /// `balance_after` of the newest entry (zero without entries)
    pub last_balance_after: Credits,
}

impl Reconciliation {
    /// Balance implied by the workflow records
    pub fn expected(&self) -> Credits {
        self.signup_bonus + self.approved_deposits + self.awarded_referrals
            + self.manual_adjustments
            - self.open_request_costs
            - self.approved_withdrawals
    }

    /// Human-readable mismatches; empty when the account reconciles
    pub fn discrepancies(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.balance < Decimal::ZERO {
            out.push(format!("negative balance {}", self.balance));
        }
        if self.balance != self.expected() {
            out.push(format!(
                "balance {} != records {}",
                self.balance,
                self.expected()
            ));
        }
        if self.balance != self.ledger_sum {
            out.push(format!(
                "balance {} != ledger sum {}",
                self.balance, self.ledger_sum
            ));
        }
        if self.balance != self.last_balance_after {
            out.push(format!(
                "balance {} != last entry balance {}",
                self.balance, self.last_balance_after
            ));
        }
        out
    }

    pub fn is_consistent(&self) -> bool {
        self.discrepancies().is_empty()
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reconciliation[{}] balance={} expected={} ledger={}",
            self.account,
            self.balance,
            self.expected(),
            self.ledger_sum
        )
    }
}

pub async fn reconcile(
    store: &dyn LedgerStore,
    account: AccountId,
) -> Result<Reconciliation, CoreError> {
    let balance = store
        .get_account(account)
        .await?
        .ok_or_else(|| CoreError::not_found("Account", account))?
        .balance;

    let entries = store.entries(account).await?;
    let sum_reason = |reason: EntryReason| -> Decimal {
        entries
            .iter()
            .filter(|e| e.reason == reason)
            .map(|e| e.delta)
            .sum()
    };
    let signup_bonus = sum_reason(EntryReason::SignupBonus);
    let manual_adjustments = sum_reason(EntryReason::ManualAdjustment);
    let ledger_sum = entries.iter().map(|e| e.delta).sum();
    let last_balance_after = entries
        .last()
        .map(|e| e.balance_after)
        .unwrap_or(Decimal::ZERO);

    let deposits: Vec<Deposit> =
        store::list(store, RecordFilter::kind(RecordKind::Deposit).owner(account)).await?;
    let approved_deposits = deposits
        .iter()
        .filter(|d| d.status == FundingStatus::Approved)
        .map(|d| d.credited_amount)
        .sum();

    let referrals: Vec<Referral> =
        store::list(store, RecordFilter::kind(RecordKind::Referral).owner(account)).await?;
    let awarded_referrals = referrals
        .iter()
        .filter(|r| r.bonus_awarded)
        .map(|r| r.bonus_amount)
        .sum();

    let requests: Vec<Request> =
        store::list(store, RecordFilter::kind(RecordKind::Request).owner(account)).await?;
    let open_request_costs = requests
        .iter()
        .filter(|r| r.status != RequestStatus::Cancelled)
        .map(|r| r.cost)
        .sum();

    let withdrawals: Vec<Withdrawal> =
        store::list(store, RecordFilter::kind(RecordKind::Withdrawal).owner(account)).await?;
    let approved_withdrawals = withdrawals
        .iter()
        .filter(|w| w.status == FundingStatus::Approved)
        .filter_map(|w| w.debited_amount)
        .sum();

    Ok(Reconciliation {
        account,
        balance,
        signup_bonus,
        approved_deposits,
        awarded_referrals,
        manual_adjustments,
        open_request_costs,
        approved_withdrawals,
        ledger_sum,
        last_balance_after,
    })
}
