//! Accounts: roles, balances, signup

pub mod models;
pub mod registry;
pub mod validation;

pub use models::{Account, Role, Roles, role_flags};
pub use registry::{AccountRegistry, NewAccount};
pub use validation::{ReferralCode, ServiceKind, ValidationError, required_text};
