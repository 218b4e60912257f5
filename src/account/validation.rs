//! Input validation for names, codes and free-text fields
//!
//! Validated types keep their field private to force construction through
//! `new()`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

// ============================================================================
// Validation Errors
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("Invalid length for {field}: expected {min}-{max}, got {actual}")]
    InvalidLength {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Invalid format for {field}: '{value}' (expected: {expected})")]
    InvalidFormat {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl From<ValidationError> for CoreError {
    fn from(e: ValidationError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

/// Trim and bound a required free-text field (reasons, names, payout details)
pub fn required_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::InvalidLength {
            field,
            min: 1,
            max,
            actual: len,
        });
    }
    Ok(value.to_string())
}

// ============================================================================
// ServiceKind - Validated service slug
// ============================================================================

/// Kind of music-processing service (e.g. `mixing`, `mastering`)
///
/// # Validation Rules
/// - Lowercase ASCII letters, digits, `_` or `-`
/// - Length: 1-32 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceKind(String);

impl ServiceKind {
    pub fn new(kind: &str) -> Result<Self, ValidationError> {
        let kind = kind.trim();
        if kind.is_empty() || kind.len() > 32 {
            return Err(ValidationError::InvalidLength {
                field: "service_kind",
                min: 1,
                max: 32,
                actual: kind.len(),
            });
        }
        if !kind
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(ValidationError::InvalidFormat {
                field: "service_kind",
                value: kind.to_string(),
                expected: "lowercase letters, digits, '_' or '-'",
            });
        }
        Ok(Self(kind.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceKind {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ServiceKind::new(&value)
    }
}

impl From<ServiceKind> for String {
    fn from(kind: ServiceKind) -> String {
        kind.0
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ReferralCode - Normalized referral code
// ============================================================================

/// Referral code, normalized to uppercase
///
/// # Validation Rules
/// - ASCII alphanumeric
/// - Length: 6-12 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferralCode(String);

impl ReferralCode {
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() < 6 || code.len() > 12 {
            return Err(ValidationError::InvalidLength {
                field: "referral_code",
                min: 6,
                max: 12,
                actual: code.len(),
            });
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidFormat {
                field: "referral_code",
                value: code,
                expected: "letters and digits",
            });
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
