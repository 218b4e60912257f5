use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::RequestStatus;
use crate::account::ServiceKind;
use crate::blob::BlobRef;
use crate::core_types::{AccountId, Credits, RequestId};
use crate::store::{Record, RecordKind};

/// A paid unit of work submitted by an account owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub owner: AccountId,
    pub service_kind: ServiceKind,
    pub description: String,
    /// Fixed at creation
    pub cost: Credits,
    pub status: RequestStatus,
    pub cancellation_reason: Option<String>,
    /// Uploaded result artifacts
    pub result_refs: Vec<BlobRef>,
    /// Client idempotency key for creation
    pub client_ref: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn new(
        owner: AccountId,
        service_kind: ServiceKind,
        description: String,
        cost: Credits,
        client_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: RequestId::new(),
            owner,
            service_kind,
            description,
            cost,
            status: RequestStatus::Pending,
            cancellation_reason: None,
            result_refs: Vec::new(),
            client_ref,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy for the next CAS write
    pub fn next(&self, status: RequestStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.version += 1;
        next.updated_at = Utc::now();
        next
    }

    pub fn with_result(&self, blob: BlobRef) -> Self {
        let mut next = self.next(self.status);
        next.result_refs.push(blob);
        next
    }
}

impl Record for Request {
    const KIND: RecordKind = RecordKind::Request;

    fn record_id(&self) -> String {
        self.request_id.to_string()
    }

    fn owner(&self) -> AccountId {
        self.owner
    }

    fn status_str(&self) -> &'static str {
        self.status.as_str()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Held for the record's lifetime so a retried create finds the original
    fn guard(&self) -> Option<String> {
        self.client_ref
            .as_ref()
            .map(|r| format!("request-ref:{}:{}", self.owner, r))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request[{}] owner={} kind={} cost={} status={}",
            self.request_id, self.owner, self.service_kind, self.cost, self.status
        )
    }
}
