//! Request status definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal states: COMPLETED, CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Paid, waiting for an admin to start work
    Pending,
    /// Work underway; results may be attached
    InProgress,
    /// Terminal: delivered
    Completed,
    /// Terminal: refunded
    Cancelled,
}

impl RequestStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    #[inline]
    pub fn is_cancellable(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
