use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::FundingStatus;
use crate::account::validation::required_text;
use crate::authz::{self, Capability};
use crate::blob::{BlobRef, BlobStore, sanitize_file_name};
use crate::core_types::{AccountId, Credits, DepositId, ExternalAmount};
use crate::error::CoreError;
use crate::ledger::{Adjustment, EntryReason, keys};
use crate::money::{
    EXTERNAL_DECIMALS, Rounding, check_amount, external_to_credits, format_credits,
};
use crate::notify::Notifier;
use crate::referral::ReferralLedger;
use crate::store::{self, LedgerStore, Record, RecordFilter, RecordKind};

const MAX_REASON: usize = 500;

/// Funding request: external payment awaiting admin verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub deposit_id: DepositId,
    pub account: AccountId,
    pub external_amount: ExternalAmount,
    /// `external_amount / credit_rate`, rounded down
    pub credited_amount: Credits,
    pub proof_ref: BlobRef,
    pub status: FundingStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Deposit {
    fn decide(&self, status: FundingStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.decided_at = Some(Utc::now());
        next.version += 1;
        next
    }
}

impl Record for Deposit {
    const KIND: RecordKind = RecordKind::Deposit;

    fn record_id(&self) -> String {
        self.deposit_id.to_string()
    }

    fn owner(&self) -> AccountId {
        self.account
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
}

#[derive(Clone)]
pub struct DepositWorkflow {
    store: Arc<dyn LedgerStore>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    credit_rate: Credits,
    /// Set when approval of a first deposit awards the pending referral
    referrals: Option<ReferralLedger>,
}

impl DepositWorkflow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
        credit_rate: Credits,
    ) -> Self {
        Self {
            store,
            blobs,
            notifier,
            credit_rate,
            referrals: None,
        }
    }

    /// Award the depositor's pending referral on approval
    pub fn with_referral_trigger(mut self, referrals: ReferralLedger) -> Self {
        self.referrals = Some(referrals);
        self
    }

    async fn load(&self, id: DepositId) -> Result<Deposit, CoreError> {
        store::load(self.store.as_ref(), &id.to_string()).await
    }

    /// Submit a deposit for the caller's own account with a payment proof
    pub async fn create(
        &self,
        actor: AccountId,
        external_amount: ExternalAmount,
        proof_name: &str,
        proof: Vec<u8>,
    ) -> Result<Deposit, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::CreateDeposit)?;

        let external_amount = check_amount(external_amount, EXTERNAL_DECIMALS)?;
        let credited_amount =
            external_to_credits(external_amount, self.credit_rate, Rounding::Down)?;
        if credited_amount.is_zero() {
            return Err(CoreError::validation(format!(
                "deposit of {} is worth less than the smallest credit unit",
                external_amount
            )));
        }
        if proof.is_empty() {
            return Err(CoreError::validation("payment proof is required"));
        }

        let deposit_id = DepositId::new();
        let path = format!("deposits/{}/{}", deposit_id, sanitize_file_name(proof_name));
        let proof_ref = self.blobs.put(&path, proof).await?;

        let deposit = Deposit {
            deposit_id,
            account: actor.id(),
            external_amount,
            credited_amount,
            proof_ref,
            status: FundingStatus::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            decided_at: None,
            version: 0,
        };
        if let Err(e) = store::insert(self.store.as_ref(), std::slice::from_ref(&deposit), None).await
        {
            if let Err(blob_err) = self.blobs.delete(&deposit.proof_ref).await {
                warn!(blob = %deposit.proof_ref, error = %blob_err, "Failed to delete orphaned proof");
            }
            return Err(e);
        }

        info!(
            deposit_id = %deposit_id,
            account = %deposit.account,
            external = %external_amount,
            credits = %credited_amount,
            "Deposit submitted"
        );
        Ok(deposit)
    }

    /// PENDING → APPROVED, crediting `credited_amount` once.
    ///
    /// Approving an already approved deposit returns it unchanged.
    pub async fn approve(&self, actor: AccountId, id: DepositId) -> Result<Deposit, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::DecideFunding)?;

        let current = self.load(id).await?;
        let approved = match current.status {
            FundingStatus::Approved => {
                debug!(deposit_id = %id, "Deposit already approved - no-op");
                current
            }
            FundingStatus::Rejected => {
                return Err(CoreError::conflict(format!(
                    "deposit {} was rejected and cannot be approved",
                    id
                )));
            }
            FundingStatus::Pending => {
                let next = current.decide(FundingStatus::Approved);
                let credit = Adjustment::credit(
                    current.account,
                    current.credited_amount,
                    EntryReason::DepositCredit,
                    keys::deposit(id),
                );
                match store::transition(self.store.as_ref(), &current, &next, Some(&credit)).await {
                    Ok(_) => {}
                    Err(CoreError::Conflict(msg)) => {
                        // A concurrent approval won; same outcome as the no-op path
                        let reloaded = self.load(id).await?;
                        if reloaded.status != FundingStatus::Approved {
                            warn!(deposit_id = %id, error = %msg, "Deposit approval lost a race");
                            return Err(CoreError::Conflict(msg));
                        }
                        debug!(deposit_id = %id, "Deposit approved concurrently");
                        return Ok(self.award_referral(reloaded).await);
                    }
                    Err(e) => {
                        warn!(deposit_id = %id, error = %e, "Deposit approval failed");
                        return Err(e);
                    }
                }
                info!(
                    deposit_id = %id,
                    account = %next.account,
                    credits = %next.credited_amount,
                    "Deposit approved"
                );
                self.notifier
                    .notify(
                        next.account,
                        "Deposit approved",
                        &format!(
                            "{} credits were added to your balance.",
                            format_credits(next.credited_amount)
                        ),
                    )
                    .await;
                next
            }
        };

        Ok(self.award_referral(approved).await)
    }

    /// Award the depositor's pending referral, if this workflow triggers it.
    ///
    /// Runs after the approval committed. A failure leaves the referral
    /// pending; the next approval for the account picks it up again.
    async fn award_referral(&self, approved: Deposit) -> Deposit {
        if let Some(referrals) = &self.referrals
            && let Err(e) = referrals.award_for_referred(approved.account).await
        {
            warn!(
                deposit_id = %approved.deposit_id,
                account = %approved.account,
                error = %e,
                "Referral award after deposit approval failed"
            );
        }
        approved
    }

    /// PENDING → REJECTED with a reason; no balance effect
    pub async fn reject(
        &self,
        actor: AccountId,
        id: DepositId,
        reason: &str,
    ) -> Result<Deposit, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::DecideFunding)?;
        let reason = required_text("rejection_reason", reason, MAX_REASON)?;

        let current = self.load(id).await?;
        if current.status != FundingStatus::Pending {
            return Err(CoreError::conflict(format!(
                "deposit {} is already {}",
                id, current.status
            )));
        }

        let mut next = current.decide(FundingStatus::Rejected);
        next.rejection_reason = Some(reason);
        if let Err(e) = store::transition(self.store.as_ref(), &current, &next, None).await {
            warn!(deposit_id = %id, error = %e, "Deposit rejection failed");
            return Err(e);
        }
        info!(deposit_id = %id, account = %next.account, "Deposit rejected");

        self.notifier
            .notify(
                next.account,
                "Deposit rejected",
                &format!(
                    "Your deposit of {} was rejected: {}",
                    next.external_amount,
                    next.rejection_reason.as_deref().unwrap_or_default()
                ),
            )
            .await;
        Ok(next)
    }

    pub async fn get(&self, actor: AccountId, id: DepositId) -> Result<Deposit, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        let deposit = self.load(id).await?;
        actor.require_self_or_admin(deposit.account)?;
        Ok(deposit)
    }

    /// Proof bytes (owner or admin)
    pub async fn download_proof(&self, actor: AccountId, id: DepositId) -> Result<Vec<u8>, CoreError> {
        let deposit = self.get(actor, id).await?;
        Ok(self.blobs.get(&deposit.proof_ref).await?)
    }

    /// Admin review queue, oldest first
    pub async fn list_pending(&self, actor: AccountId) -> Result<Vec<Deposit>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::DecideFunding)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Deposit).status(FundingStatus::Pending.as_str()),
        )
        .await
    }

    pub async fn list_for_account(
        &self,
        actor: AccountId,
        account: AccountId,
    ) -> Result<Vec<Deposit>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(account)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Deposit).owner(account),
        )
        .await
    }
}
