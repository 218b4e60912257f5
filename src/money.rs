//! Money Conversion Module
//!
//! Conversion between the external currency (Kz) and internal credits, plus
//! precision checks on client-supplied amounts. All conversions MUST go
//! through this module.
//!
//! ## Design Principles
//! 1. Fixed rate: `credits = external / credit_rate`
//! 2. Explicit Error Handling: No silent truncation of client input
//! 3. Rounding direction is always in the ledger's favour: deposits round
//!    down, withdrawals round up
//!
//! ## Usage
//! ```rust
//! use credit_ledger::money::{check_amount, external_to_credits, format_credits, Rounding, EXTERNAL_DECIMALS};
//! use rust_decimal::Decimal;
//!
//! let kz = check_amount(Decimal::from(1500), EXTERNAL_DECIMALS).unwrap();
//! let credits = external_to_credits(kz, Decimal::from(150), Rounding::Down).unwrap();
//! assert_eq!(credits, Decimal::from(10));
//! assert_eq!(format_credits(credits), "10.00");
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Decimal places kept on credit amounts
pub const CREDIT_DECIMALS: u32 = 4;

/// Decimal places accepted on external currency amounts
pub const EXTERNAL_DECIMALS: u32 = 2;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Conversion rate must be positive")]
    InvalidRate,
}

/// Rounding direction for currency conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Toward zero - used when crediting an account
    Down,
    /// Away from zero - used when debiting an account
    Up,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::Down => RoundingStrategy::ToZero,
            Rounding::Up => RoundingStrategy::AwayFromZero,
        }
    }
}

// ============================================================================
// Validate: Client → Internal
// ============================================================================

/// Validate an already-typed amount: positive, within precision.
pub fn check_amount(value: Decimal, decimals: u32) -> Result<Decimal, MoneyError> {
    if value.is_sign_negative() || value.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = value.normalize();
    if normalized.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: decimals,
        });
    }

    Ok(normalized)
}

// ============================================================================
// Convert: External ↔ Credits
// ============================================================================

/// Convert an external currency amount to credits at `rate` external units
/// per credit, rounded to [`CREDIT_DECIMALS`].
pub fn external_to_credits(
    external: Decimal,
    rate: Decimal,
    rounding: Rounding,
) -> Result<Decimal, MoneyError> {
    if rate <= Decimal::ZERO {
        return Err(MoneyError::InvalidRate);
    }
    if external.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }

    let credits = external.checked_div(rate).ok_or(MoneyError::Overflow)?;
    Ok(credits
        .round_dp_with_strategy(CREDIT_DECIMALS, rounding.strategy())
        .normalize())
}

/// Credit amount for display: at least two decimals, at most [`CREDIT_DECIMALS`]
pub fn format_credits(credits: Decimal) -> String {
    let value = credits
        .round_dp_with_strategy(CREDIT_DECIMALS, RoundingStrategy::ToZero)
        .normalize();
    let prec = value.scale().max(2) as usize;
    format!("{:.prec$}", value)
}
