//! Referral Ledger
//!
//! A referral pairs a referrer with the account they brought in. The bonus
//! goes to the referrer, once, when the referral is awarded. Awarding is an
//! external hook: an admin call, or deposit approval when configured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::authz::{self, Capability};
use crate::core_types::{AccountId, Credits, ReferralId};
use crate::error::CoreError;
use crate::ledger::{Adjustment, EntryReason, keys};
use crate::money::{CREDIT_DECIMALS, check_amount, format_credits};
use crate::notify::Notifier;
use crate::store::{self, LedgerStore, Record, RecordFilter, RecordKind};

const STATUS_PENDING: &str = "pending";
const STATUS_AWARDED: &str = "awarded";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub referral_id: ReferralId,
    pub referrer: AccountId,
    pub referred: AccountId,
    pub bonus_amount: Credits,
    pub bonus_awarded: bool,
    pub awarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl Referral {
    /// A pending referral, not yet stored
    pub(crate) fn new(
        referrer: AccountId,
        referred: AccountId,
        bonus_amount: Credits,
    ) -> Result<Self, CoreError> {
        if referrer == referred {
            return Err(CoreError::validation("an account cannot refer itself"));
        }
        Ok(Self {
            referral_id: ReferralId::new(),
            referrer,
            referred,
            bonus_amount: check_amount(bonus_amount, CREDIT_DECIMALS)?,
            bonus_awarded: false,
            awarded_at: None,
            created_at: Utc::now(),
            version: 0,
        })
    }

    fn awarded(&self) -> Self {
        let mut next = self.clone();
        next.bonus_awarded = true;
        next.awarded_at = Some(Utc::now());
        next.version += 1;
        next
    }
}

impl Record for Referral {
    const KIND: RecordKind = RecordKind::Referral;

    fn record_id(&self) -> String {
        self.referral_id.to_string()
    }

    fn owner(&self) -> AccountId {
        self.referrer
    }

    fn status_str(&self) -> &'static str {
        if self.bonus_awarded {
            STATUS_AWARDED
        } else {
            STATUS_PENDING
        }
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn parent(&self) -> Option<String> {
        Some(self.referred.to_string())
    }

    /// An account can be referred once
    fn guard(&self) -> Option<String> {
        Some(format!("referral:{}", self.referred))
    }
}

#[derive(Clone)]
pub struct ReferralLedger {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl ReferralLedger {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Record a referral (admin)
    pub async fn create(
        &self,
        actor: AccountId,
        referrer: AccountId,
        referred: AccountId,
        bonus_amount: Credits,
    ) -> Result<Referral, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::ManageReferrals)?;
        let referral = Referral::new(referrer, referred, bonus_amount)?;
        for id in [referrer, referred] {
            if self.store.get_account(id).await?.is_none() {
                return Err(CoreError::not_found("Account", id));
            }
        }

        match store::insert(self.store.as_ref(), std::slice::from_ref(&referral), None).await {
            Ok(_) => {}
            Err(CoreError::Conflict(_)) => {
                return Err(CoreError::conflict(format!(
                    "account {} already has a referrer",
                    referred
                )));
            }
            Err(e) => return Err(e),
        }

        info!(
            referral_id = %referral.referral_id,
            referrer = %referrer,
            referred = %referred,
            bonus = %referral.bonus_amount,
            "Referral recorded"
        );
        Ok(referral)
    }

    /// Credit the referrer once (admin); no-op if already awarded
    pub async fn award(&self, actor: AccountId, id: ReferralId) -> Result<Referral, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::ManageReferrals)?;
        self.award_unchecked(id).await
    }

    pub(crate) async fn award_unchecked(&self, id: ReferralId) -> Result<Referral, CoreError> {
        let current: Referral = store::load(self.store.as_ref(), &id.to_string()).await?;
        if current.bonus_awarded {
            debug!(referral_id = %id, "Referral already awarded - no-op");
            return Ok(current);
        }

        let next = current.awarded();
        let credit = Adjustment::credit(
            current.referrer,
            current.bonus_amount,
            EntryReason::ReferralBonus,
            keys::referral(id),
        );
        match store::transition(self.store.as_ref(), &current, &next, Some(&credit)).await {
            Ok(_) => {}
            Err(CoreError::Conflict(msg)) => {
                // A concurrent award won; that is the outcome we wanted
                let reloaded: Referral = store::load(self.store.as_ref(), &id.to_string()).await?;
                if reloaded.bonus_awarded {
                    debug!(referral_id = %id, "Referral awarded concurrently");
                    return Ok(reloaded);
                }
                return Err(CoreError::Conflict(msg));
            }
            Err(e) => return Err(e),
        }

        info!(
            referral_id = %id,
            referrer = %next.referrer,
            bonus = %next.bonus_amount,
            "Referral bonus awarded"
        );
        self.notifier
            .notify(
                next.referrer,
                "Referral bonus",
                &format!(
                    "You earned {} credits for a referral.",
                    format_credits(next.bonus_amount)
                ),
            )
            .await;
        Ok(next)
    }

    /// Award the pending referral of `referred`, if there is one
    pub(crate) async fn award_for_referred(
        &self,
        referred: AccountId,
    ) -> Result<Option<Referral>, CoreError> {
        match self.find_pending(referred).await? {
            Some(referral) => Ok(Some(self.award_unchecked(referral.referral_id).await?)),
            None => Ok(None),
        }
    }

    /// The not-yet-awarded referral of `referred` (self or admin)
    pub async fn pending_for(
        &self,
        actor: AccountId,
        referred: AccountId,
    ) -> Result<Option<Referral>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(referred)?;
        self.find_pending(referred).await
    }

    pub async fn list_for_referrer(
        &self,
        actor: AccountId,
        referrer: AccountId,
    ) -> Result<Vec<Referral>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(referrer)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Referral).owner(referrer),
        )
        .await
    }

    async fn find_pending(&self, referred: AccountId) -> Result<Option<Referral>, CoreError> {
        let mut pending: Vec<Referral> = store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Referral)
                .parent(referred)
                .status(STATUS_PENDING),
        )
        .await?;
        Ok(pending.pop())
    }
}
