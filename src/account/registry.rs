//! Signup and account lookup

use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{Account, Roles};
use super::validation::{ReferralCode, required_text};
use crate::authz;
use crate::core_types::{AccountId, Credits};
use crate::error::CoreError;
use crate::ledger::{Adjustment, EntryReason, keys};
use crate::referral::Referral;
use crate::store::{self, LedgerStore};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;
const CODE_ATTEMPTS: usize = 5;
const MAX_DISPLAY_NAME: usize = 64;

/// Signup input
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub display_name: String,
    pub roles: Roles,
    /// Code of the account that referred this one
    pub referral_code: Option<String>,
}

#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn LedgerStore>,
    signup_bonus: Credits,
    referral_bonus: Credits,
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

impl AccountRegistry {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        signup_bonus: Credits,
        referral_bonus: Credits,
    ) -> Self {
        Self {
            store,
            signup_bonus,
            referral_bonus,
        }
    }

    /// Create an account holding the signup bonus.
    ///
    /// The account, its bonus entry and the referral named by `referral_code`
    /// commit together. An unknown or malformed code is ignored; a failed
    /// lookup is returned and nothing is created.
    pub async fn register(&self, new: NewAccount) -> Result<Account, CoreError> {
        let display_name = required_text("display_name", &new.display_name, MAX_DISPLAY_NAME)?;
        if new.roles.is_empty() {
            return Err(CoreError::validation("an account needs at least one role"));
        }
        let referrer = match new.referral_code.as_deref() {
            Some(code) => self.find_referrer(code).await?,
            None => None,
        };

        let mut attempt = 0;
        let (account, referral) = loop {
            attempt += 1;
            let candidate = Account::new(display_name.clone(), new.roles, generate_code());
            let opening = (self.signup_bonus > Credits::ZERO).then(|| {
                Adjustment::credit(
                    candidate.account_id,
                    self.signup_bonus,
                    EntryReason::SignupBonus,
                    keys::signup(candidate.account_id),
                )
            });
            let referral = referrer
                .map(|referrer| Referral::new(referrer, candidate.account_id, self.referral_bonus))
                .transpose()?;
            let linked = referral.iter().map(store::encode).collect::<Result<Vec<_>, _>>()?;

            match self
                .store
                .insert_account(&candidate, opening.as_ref(), &linked)
                .await
            {
                Ok(account) => break (account, referral),
                // Referral code collision
                Err(CoreError::Conflict(msg)) if attempt < CODE_ATTEMPTS => {
                    warn!(attempt, error = %msg, "Signup conflict, regenerating referral code");
                }
                Err(e) => return Err(e),
            }
        };
        info!(
            account_id = %account.account_id,
            roles = account.roles.bits(),
            balance = %account.balance,
            "Account registered"
        );
        if let Some(referral) = referral {
            info!(
                referral_id = %referral.referral_id,
                referrer = %referral.referrer,
                referred = %account.account_id,
                bonus = %referral.bonus_amount,
                "Referral recorded"
            );
        }
        Ok(account)
    }

    /// Referrer behind `code`; `None` for a code that names nobody
    async fn find_referrer(&self, code: &str) -> Result<Option<AccountId>, CoreError> {
        let code = match ReferralCode::new(code) {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed referral code");
                return Ok(None);
            }
        };
        match self.store.find_by_referral_code(code.as_str()).await? {
            Some(referrer) => Ok(Some(referrer.account_id)),
            None => {
                warn!(code = %code, "Ignoring unknown referral code");
                Ok(None)
            }
        }
    }

    /// Account with its current balance (self or admin)
    pub async fn get(&self, actor: AccountId, id: AccountId) -> Result<Account, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(id)?;
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Account", id))
    }
}
