//! Core types used throughout the system
//!
//! Identifiers are ULID-based newtypes: monotonic, sortable, generated without
//! coordination. Each record family gets its own type so an assignment id can
//! never be passed where a request id is expected.

use rust_decimal::Decimal;

/// Credit amount - the internal unit of account balance.
///
/// # Constraints:
/// - **Non-negative** when used as a balance
/// - **Scale**: at most [`crate::money::CREDIT_DECIMALS`] decimal places
pub type Credits = Decimal;

/// Amount in the external currency (Kz), converted to credits at a fixed rate.
pub type ExternalAmount = Decimal;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique id
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Account ID - primary key for balances and roles
    AccountId
);
ulid_id!(
    /// Service request ID
    RequestId
);
ulid_id!(
    /// Request-to-collaborator assignment ID
    AssignmentId
);
ulid_id!(
    /// Deposit (funding request) ID
    DepositId
);
ulid_id!(
    /// Withdrawal (collaborator payout) ID
    WithdrawalId
);
ulid_id!(
    /// Referral pair ID
    ReferralId
);
ulid_id!(
    /// Ledger entry ID
    EntryId
);
