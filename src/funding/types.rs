use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status shared by deposits and withdrawals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingStatus {
    Pending,
    /// Terminal: ledger effect applied
    Approved,
    /// Terminal: no effect
    Rejected,
}

impl FundingStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FundingStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FundingStatus::Pending => "pending",
            FundingStatus::Approved => "approved",
            FundingStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FundingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FundingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(FundingStatus::Pending),
            "approved" => Ok(FundingStatus::Approved),
            "rejected" => Ok(FundingStatus::Rejected),
            _ => Err(format!("Invalid funding status: {}", s)),
        }
    }
}
