//! Capability checks
//!
//! Every workflow operation resolves its caller to an [`Actor`] from the
//! store (never from caller-supplied role claims) and checks one capability
//! before touching any state.

use std::fmt;

use crate::account::{Account, Role, Roles};
use crate::core_types::AccountId;
use crate::error::CoreError;
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Create and pay for a service request
    SubmitRequest,
    /// Start, complete, cancel any request; assign collaborators; view everything
    ManageRequests,
    /// Accept or reject an assignment
    RespondAssignment,
    /// Attach result artifacts to a request in progress
    UploadResult,
    /// Submit a funding request
    CreateDeposit,
    /// Approve or reject deposits and withdrawals
    DecideFunding,
    /// Request a payout
    CreateWithdrawal,
    /// Create or award referrals by hand
    ManageReferrals,
}

impl Capability {
    /// Roles that grant this capability
    pub fn granted_to(&self) -> Roles {
        match self {
            Capability::SubmitRequest => Roles::from([Role::Requester]),
            Capability::ManageRequests
            | Capability::DecideFunding
            | Capability::ManageReferrals => Roles::from([Role::Admin]),
            Capability::RespondAssignment | Capability::CreateWithdrawal => {
                Roles::from([Role::Collaborator])
            }
            Capability::UploadResult => Roles::from([Role::Admin, Role::Collaborator]),
            Capability::CreateDeposit => Roles::from([Role::Requester, Role::Collaborator]),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SubmitRequest => "submit_request",
            Capability::ManageRequests => "manage_requests",
            Capability::RespondAssignment => "respond_assignment",
            Capability::UploadResult => "upload_result",
            Capability::CreateDeposit => "create_deposit",
            Capability::DecideFunding => "decide_funding",
            Capability::CreateWithdrawal => "create_withdrawal",
            Capability::ManageReferrals => "manage_referrals",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The account performing an operation, as known to the store
#[derive(Debug, Clone)]
pub struct Actor {
    account: Account,
}

impl Actor {
    pub fn new(account: Account) -> Self {
        Self { account }
    }

    pub fn id(&self) -> AccountId {
        self.account.account_id
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn is_admin(&self) -> bool {
        self.account.is_admin()
    }

    pub fn can(&self, cap: Capability) -> bool {
        self.account.roles.intersects(cap.granted_to())
    }

    pub fn require(&self, cap: Capability) -> Result<(), CoreError> {
        if self.can(cap) {
            Ok(())
        } else {
            Err(CoreError::unauthorized(format!(
                "account {} lacks capability {}",
                self.id(),
                cap
            )))
        }
    }

    /// The actor must be `owner` or an admin
    pub fn require_self_or_admin(&self, owner: AccountId) -> Result<(), CoreError> {
        if self.id() == owner || self.is_admin() {
            Ok(())
        } else {
            Err(CoreError::unauthorized(format!(
                "account {} may not act on behalf of {}",
                self.id(),
                owner
            )))
        }
    }
}

/// Load the caller; unknown accounts are unauthorized, not "not found"
pub async fn resolve(store: &dyn LedgerStore, id: AccountId) -> Result<Actor, CoreError> {
    store
        .get_account(id)
        .await?
        .map(Actor::new)
        .ok_or_else(|| CoreError::unauthorized(format!("unknown account {}", id)))
}
