use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::FundingStatus;
use crate::account::validation::required_text;
use crate::authz::{self, Capability};
use crate::config::WithdrawalConfig;
use crate::core_types::{AccountId, Credits, ExternalAmount, WithdrawalId};
use crate::error::CoreError;
use crate::ledger::{Adjustment, EntryReason, keys};
use crate::money::{EXTERNAL_DECIMALS, Rounding, check_amount, external_to_credits};
use crate::notify::Notifier;
use crate::store::{self, LedgerStore, Record, RecordFilter, RecordKind};

const MAX_PAYOUT_DETAILS: usize = 500;
const MAX_REASON: usize = 500;
/// Attempts to re-read the balance when it moves under a clamped approval
const APPROVE_ATTEMPTS: usize = 3;

/// Collaborator payout request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_id: WithdrawalId,
    pub collaborator: AccountId,
    pub external_amount: ExternalAmount,
    /// `external_amount / credit_rate`, rounded up, fixed at creation
    pub credit_amount: Credits,
    /// Actually debited at approval; below `credit_amount` when clamped
    pub debited_amount: Option<Credits>,
    /// Destination for the payout (IBAN, phone, ...)
    pub payout_details: String,
    pub status: FundingStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Withdrawal {
    fn decide(&self, status: FundingStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.decided_at = Some(Utc::now());
        next.version += 1;
        next
    }
}

impl Record for Withdrawal {
    const KIND: RecordKind = RecordKind::Withdrawal;

    fn record_id(&self) -> String {
        self.withdrawal_id.to_string()
    }

    fn owner(&self) -> AccountId {
        self.collaborator
    }

    fn status_str(&self) -> &'static str {
        self.status.as_str()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// One pending withdrawal per collaborator
    fn guard(&self) -> Option<String> {
        (self.status == FundingStatus::Pending).then(|| format!("withdrawal:{}", self.collaborator))
    }
}

#[derive(Clone)]
pub struct WithdrawalWorkflow {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    credit_rate: Credits,
    window: WithdrawalConfig,
}

impl WithdrawalWorkflow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        credit_rate: Credits,
        window: WithdrawalConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            credit_rate,
            window,
        }
    }

    async fn load(&self, id: WithdrawalId) -> Result<Withdrawal, CoreError> {
        store::load(self.store.as_ref(), &id.to_string()).await
    }

    /// Request a payout of `external_amount` from the caller's balance.
    ///
    /// # Errors
    /// * `Validation` - amount outside the configured window, a pending
    ///   withdrawal already exists, or the balance does not cover it
    pub async fn create(
        &self,
        actor: AccountId,
        external_amount: ExternalAmount,
        payout_details: &str,
    ) -> Result<Withdrawal, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::CreateWithdrawal)?;

        let external_amount = check_amount(external_amount, EXTERNAL_DECIMALS)?;
        if external_amount < self.window.min || external_amount > self.window.max {
            return Err(CoreError::validation(format!(
                "withdrawal amount {} is outside [{}, {}]",
                external_amount, self.window.min, self.window.max
            )));
        }
        let payout_details = required_text("payout_details", payout_details, MAX_PAYOUT_DETAILS)?;

        let credit_amount = external_to_credits(external_amount, self.credit_rate, Rounding::Up)?;
        let balance = actor.account().balance;
        if credit_amount > balance {
            return Err(CoreError::validation(format!(
                "withdrawal needs {} credits but the balance is {}",
                credit_amount, balance
            )));
        }

        let withdrawal = Withdrawal {
            withdrawal_id: WithdrawalId::new(),
            collaborator: actor.id(),
            external_amount,
            credit_amount,
            debited_amount: None,
            payout_details,
            status: FundingStatus::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            decided_at: None,
            version: 0,
        };
        match store::insert(self.store.as_ref(), std::slice::from_ref(&withdrawal), None).await {
            Ok(_) => {}
            Err(CoreError::Conflict(_)) => {
                return Err(CoreError::validation(
                    "a pending withdrawal already exists for this account",
                ));
            }
            Err(e) => return Err(e),
        }

        info!(
            withdrawal_id = %withdrawal.withdrawal_id,
            collaborator = %withdrawal.collaborator,
            external = %external_amount,
            credits = %credit_amount,
            "Withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// PENDING → APPROVED, debiting `credit_amount` clamped to the current balance.
    ///
    /// Approving an already approved withdrawal returns it unchanged.
    pub async fn approve(
        &self,
        actor: AccountId,
        id: WithdrawalId,
    ) -> Result<Withdrawal, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::DecideFunding)?;

        let current = self.load(id).await?;
        match current.status {
            FundingStatus::Approved => {
                debug!(withdrawal_id = %id, "Withdrawal already approved - no-op");
                return Ok(current);
            }
            FundingStatus::Rejected => {
                return Err(CoreError::conflict(format!(
                    "withdrawal {} was rejected and cannot be approved",
                    id
                )));
            }
            FundingStatus::Pending => {}
        }

        let mut attempt = 0;
        let next = loop {
            attempt += 1;
            let balance = self
                .store
                .get_account(current.collaborator)
                .await?
                .ok_or_else(|| CoreError::not_found("Account", current.collaborator))?
                .balance;
            let debit = current.credit_amount.min(balance).max(Decimal::ZERO);

            let mut next = current.decide(FundingStatus::Approved);
            next.debited_amount = Some(debit);
            let effect = (!debit.is_zero()).then(|| {
                Adjustment::debit(
                    current.collaborator,
                    debit,
                    EntryReason::WithdrawalDebit,
                    keys::withdrawal(id),
                )
            });

            match store::transition(self.store.as_ref(), &current, &next, effect.as_ref()).await {
                Ok(_) => break next,
                // Balance dropped between the read and the write
                Err(CoreError::InsufficientBalance { .. }) if attempt < APPROVE_ATTEMPTS => {
                    debug!(withdrawal_id = %id, attempt, "Balance moved during approval, retrying");
                }
                Err(CoreError::Conflict(msg)) => {
                    // A concurrent approval won; same outcome as the no-op path
                    let reloaded = self.load(id).await?;
                    if reloaded.status == FundingStatus::Approved {
                        debug!(withdrawal_id = %id, "Withdrawal approved concurrently");
                        return Ok(reloaded);
                    }
                    warn!(withdrawal_id = %id, error = %msg, "Withdrawal approval lost a race");
                    return Err(CoreError::Conflict(msg));
                }
                Err(e) => {
                    warn!(withdrawal_id = %id, error = %e, "Withdrawal approval failed");
                    return Err(e);
                }
            }
        };

        if next.debited_amount != Some(next.credit_amount) {
            warn!(
                withdrawal_id = %id,
                requested = %next.credit_amount,
                debited = ?next.debited_amount,
                "Withdrawal debit clamped to balance"
            );
        }
        info!(
            withdrawal_id = %id,
            collaborator = %next.collaborator,
            debited = ?next.debited_amount,
            "Withdrawal approved"
        );

        self.notifier
            .notify(
                next.collaborator,
                "Withdrawal approved",
                &format!(
                    "Your withdrawal of {} was approved and will be paid to {}.",
                    next.external_amount, next.payout_details
                ),
            )
            .await;
        Ok(next)
    }

    /// PENDING → REJECTED with a reason; no balance effect
    pub async fn reject(
        &self,
        actor: AccountId,
        id: WithdrawalId,
        reason: &str,
    ) -> Result<Withdrawal, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::DecideFunding)?;
        let reason = required_text("rejection_reason", reason, MAX_REASON)?;

        let current = self.load(id).await?;
        if current.status != FundingStatus::Pending {
            return Err(CoreError::conflict(format!(
                "withdrawal {} is already {}",
                id, current.status
            )));
        }

        let mut next = current.decide(FundingStatus::Rejected);
        next.rejection_reason = Some(reason);
        if let Err(e) = store::transition(self.store.as_ref(), &current, &next, None).await {
            warn!(withdrawal_id = %id, error = %e, "Withdrawal rejection failed");
            return Err(e);
        }
        info!(withdrawal_id = %id, collaborator = %next.collaborator, "Withdrawal rejected");

        self.notifier
            .notify(
                next.collaborator,
                "Withdrawal rejected",
                &format!(
                    "Your withdrawal of {} was rejected: {}",
                    next.external_amount,
                    next.rejection_reason.as_deref().unwrap_or_default()
                ),
            )
            .await;
        Ok(next)
    }

    pub async fn get(&self, actor: AccountId, id: WithdrawalId) -> Result<Withdrawal, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        let withdrawal = self.load(id).await?;
        actor.require_self_or_admin(withdrawal.collaborator)?;
        Ok(withdrawal)
    }

    pub async fn list_pending(&self, actor: AccountId) -> Result<Vec<Withdrawal>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::DecideFunding)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Withdrawal).status(FundingStatus::Pending.as_str()),
        )
        .await
    }

    pub async fn list_for_account(
        &self,
        actor: AccountId,
        account: AccountId,
    ) -> Result<Vec<Withdrawal>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(account)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Withdrawal).owner(account),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending() -> Withdrawal {
        Withdrawal {
            withdrawal_id: WithdrawalId::new(),
            collaborator: AccountId::new(),
            external_amount: dec!(1500),
            credit_amount: dec!(10),
            debited_amount: None,
            payout_details: "AO06 0040 0000".into(),
            status: FundingStatus::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            decided_at: None,
            version: 0,
        }
    }

    #[test]
    fn test_guard_only_while_pending() {
        let w = pending();
        assert_eq!(w.guard(), Some(format!("withdrawal:{}", w.collaborator)));
        let done = w.decide(FundingStatus::Approved);
        assert_eq!(done.guard(), None);
        assert_eq!(done.version, 1);
        assert!(done.decided_at.is_some());
    }
}
