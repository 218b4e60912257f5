//! Data models for accounts and roles

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{AccountId, Credits};

// ============================================================================
// Role Flags (bitmask)
// ============================================================================
pub mod role_flags {
    pub const REQUESTER: i16 = 0x01;
    pub const COLLABORATOR: i16 = 0x02;
    pub const ADMIN: i16 = 0x04;
    pub const ALL: i16 = REQUESTER | COLLABORATOR | ADMIN;
}

/// A single role an account may hold. Roles are not mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Collaborator,
    Admin,
}

impl Role {
    #[inline]
    pub fn flag(&self) -> i16 {
        match self {
            Role::Requester => role_flags::REQUESTER,
            Role::Collaborator => role_flags::COLLABORATOR,
            Role::Admin => role_flags::ADMIN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Requester => "requester",
            Role::Collaborator => "collaborator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of roles stored as a bitmask (SMALLINT in PostgreSQL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(i16);

impl Roles {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw bits, dropping unknown flags
    pub fn from_bits(bits: i16) -> Self {
        Self(bits & role_flags::ALL)
    }

    pub fn bits(&self) -> i16 {
        self.0
    }

    pub fn with(mut self, role: Role) -> Self {
        self.0 |= role.flag();
        self
    }

    #[inline]
    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.flag() != 0
    }

    /// True if any role in `other` is held
    #[inline]
    pub fn intersects(&self, other: Roles) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<&[Role]> for Roles {
    fn from(roles: &[Role]) -> Self {
        roles.iter().fold(Roles::empty(), |acc, r| acc.with(*r))
    }
}

impl<const N: usize> From<[Role; N]> for Roles {
    fn from(roles: [Role; N]) -> Self {
        Roles::from(&roles[..])
    }
}

/// Account with its server-authoritative credit balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub display_name: String,
    /// Code other users present at signup to name this account as referrer
    pub referral_code: String,
    pub roles: Roles,
    /// Mutated only through the ledger
    pub balance: Credits,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A fresh account with zero balance; opening credits go through the ledger
    pub fn new(display_name: impl Into<String>, roles: Roles, referral_code: String) -> Self {
        Self {
            account_id: AccountId::new(),
            display_name: display_name.into(),
            referral_code,
            roles,
            balance: Credits::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(Role::Admin)
    }

    pub fn is_collaborator(&self) -> bool {
        self.roles.contains(Role::Collaborator)
    }

    pub fn is_requester(&self) -> bool {
        self.roles.contains(Role::Requester)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_bitmask() {
        let roles = Roles::from([Role::Requester, Role::Collaborator]);
        assert!(roles.contains(Role::Requester));
        assert!(roles.contains(Role::Collaborator));
        assert!(!roles.contains(Role::Admin));
        assert_eq!(
            roles.bits(),
            role_flags::REQUESTER | role_flags::COLLABORATOR
        );
    }

    #[test]
    fn test_unknown_bits_dropped() {
        assert_eq!(Roles::from_bits(0x7F).bits(), role_flags::ALL);
    }

    #[test]
    fn test_intersects() {
        let staff = Roles::from([Role::Admin, Role::Collaborator]);
        assert!(Roles::from([Role::Admin]).intersects(staff));
        assert!(!Roles::from([Role::Requester]).intersects(staff));
    }

    #[test]
    fn test_new_account_starts_empty() {
        let account = Account::new("ana", Roles::from([Role::Requester]), "ABCD2345".into());
        assert_eq!(account.balance, Credits::ZERO);
        assert!(account.is_requester());
        assert!(!account.is_admin());
    }
}
