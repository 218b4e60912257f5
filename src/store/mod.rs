//! Persistence seam
//!
//! [`LedgerStore`] is the only interface the workflows use to read and write
//! state. Implementations must guarantee:
//!
//! 1. **Atomic adjust**: one read-modify-write per account, never a separate
//!    read-then-write visible to other callers
//! 2. **Idempotency**: an adjustment key seen before returns the original
//!    entry without reapplying
//! 3. **CAS transitions**: a record moves only if its stored (status, version)
//!    still matches what the caller read
//! 4. **All-or-nothing**: a record write and its ledger effect commit together
//! 5. **Guards**: a non-null guard key is unique across all live records

pub mod memory;
pub mod postgres;

pub use memory::{FailurePoint, MemoryStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::account::{Account, Role};
use crate::core_types::AccountId;
use crate::error::CoreError;
use crate::ledger::{Adjustment, Applied, LedgerEntry};

/// Record family, stored as SMALLINT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum RecordKind {
    Request = 1,
    Assignment = 2,
    Deposit = 3,
    Withdrawal = 4,
    Referral = 5,
}

impl RecordKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(RecordKind::Request),
            2 => Some(RecordKind::Assignment),
            3 => Some(RecordKind::Deposit),
            4 => Some(RecordKind::Withdrawal),
            5 => Some(RecordKind::Referral),
            _ => None,
        }
    }

    /// Human-readable name, used in NotFound errors
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Request => "Request",
            RecordKind::Assignment => "Assignment",
            RecordKind::Deposit => "Deposit",
            RecordKind::Withdrawal => "Withdrawal",
            RecordKind::Referral => "Referral",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Type-erased workflow record as the store sees it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub kind: RecordKind,
    pub id: String,
    /// Account the record belongs to (owner, collaborator, referrer)
    pub owner: AccountId,
    /// Secondary lookup key (request id for assignments, referred account for referrals)
    pub parent: Option<String>,
    pub status: String,
    pub version: i64,
    pub guard: Option<String>,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Selection for `list_records`; unset fields match everything
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    pub kind: RecordKind,
    pub owner: Option<AccountId>,
    pub parent: Option<String>,
    pub status: Option<String>,
}

impl RecordFilter {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind,
            owner: None,
            parent: None,
            status: None,
        }
    }

    pub fn owner(mut self, owner: AccountId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn parent(mut self, parent: impl ToString) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        record.kind == self.kind
            && self.owner.is_none_or(|o| o == record.owner)
            && self
                .parent
                .as_ref()
                .is_none_or(|p| record.parent.as_ref() == Some(p))
            && self.status.as_ref().is_none_or(|s| *s == record.status)
    }
}

/// Compare-and-set request: replace the record with `next` only if the
/// stored status and version still equal the expected ones
#[derive(Debug, Clone)]
pub struct Transition {
    pub expected_status: String,
    pub expected_version: i64,
    pub next: StoredRecord,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Get store name for logging
    fn name(&self) -> &'static str;

    /// Create an account (balance zero), apply its opening adjustment and
    /// insert `records` in one atomic unit
    async fn insert_account(
        &self,
        account: &Account,
        opening: Option<&Adjustment>,
        records: &[StoredRecord],
    ) -> Result<Account, CoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, CoreError>;

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>, CoreError>;

    async fn accounts_with_role(&self, role: Role) -> Result<Vec<Account>, CoreError>;

    /// Atomic, idempotent balance adjustment
    async fn adjust(&self, adj: &Adjustment) -> Result<Applied, CoreError>;

    /// Ledger entries of an account, oldest first
    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, CoreError>;

    /// Insert records and apply `effect` in one atomic unit
    async fn insert_records(
        &self,
        records: &[StoredRecord],
        effect: Option<&Adjustment>,
    ) -> Result<Option<Applied>, CoreError>;

    async fn get_record(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<StoredRecord>, CoreError>;

    /// Guarded transition plus optional ledger effect in one atomic unit
    async fn compare_and_set(
        &self,
        transition: &Transition,
        effect: Option<&Adjustment>,
    ) -> Result<Option<Applied>, CoreError>;

    /// Matching records, oldest first
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<StoredRecord>, CoreError>;
}

/// Resolve a replayed key against the original entry
///
/// Reusing a key with different parameters is a caller bug, reported as a conflict.
pub(crate) fn replay(existing: LedgerEntry, adj: &Adjustment) -> Result<Applied, CoreError> {
    if existing.delta != adj.delta || existing.reason != adj.reason {
        return Err(CoreError::conflict(format!(
            "idempotency key '{}' already used for {} {}",
            adj.idempotency_key, existing.reason, existing.delta
        )));
    }
    Ok(Applied::Replayed(existing))
}

pub(crate) fn stale(transition: &Transition) -> CoreError {
    CoreError::conflict(format!(
        "{} {} is no longer {} (v{})",
        transition.next.kind,
        transition.next.id,
        transition.expected_status,
        transition.expected_version
    ))
}

pub(crate) fn guard_taken(guard: &str) -> CoreError {
    CoreError::conflict(format!("guard '{}' is held by another record", guard))
}

// ============================================================================
// Typed records
// ============================================================================

/// A workflow record that can be stored as a [`StoredRecord`]
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: RecordKind;

    fn record_id(&self) -> String;
    fn owner(&self) -> AccountId;
    fn status_str(&self) -> &'static str;
    fn version(&self) -> i64;
    fn created_at(&self) -> DateTime<Utc>;

    fn parent(&self) -> Option<String> {
        None
    }

    /// Uniqueness key held while the record is in its current state
    fn guard(&self) -> Option<String> {
        None
    }
}

pub fn encode<R: Record>(record: &R) -> Result<StoredRecord, CoreError> {
    Ok(StoredRecord {
        kind: R::KIND,
        id: record.record_id(),
        owner: record.owner(),
        parent: record.parent(),
        status: record.status_str().to_string(),
        version: record.version(),
        guard: record.guard(),
        body: serde_json::to_value(record)?,
        created_at: record.created_at(),
    })
}

pub fn decode<R: Record>(stored: &StoredRecord) -> Result<R, CoreError> {
    if stored.kind != R::KIND {
        return Err(CoreError::Storage(format!(
            "expected {} record, found {}",
            R::KIND,
            stored.kind
        )));
    }
    Ok(serde_json::from_value(stored.body.clone())?)
}

/// Load a record or fail with `NotFound`
pub async fn load<R: Record>(store: &dyn LedgerStore, id: &str) -> Result<R, CoreError> {
    match store.get_record(R::KIND, id).await? {
        Some(stored) => decode(&stored),
        None => Err(CoreError::not_found(R::KIND.label(), id)),
    }
}

pub async fn insert<R: Record>(
    store: &dyn LedgerStore,
    records: &[R],
    effect: Option<&Adjustment>,
) -> Result<Option<Applied>, CoreError> {
    let stored = records.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
    store.insert_records(&stored, effect).await
}

/// Move `current` to `next` (whose version must be `current.version() + 1`)
pub async fn transition<R: Record>(
    store: &dyn LedgerStore,
    current: &R,
    next: &R,
    effect: Option<&Adjustment>,
) -> Result<Option<Applied>, CoreError> {
    debug_assert_eq!(next.version(), current.version() + 1);
    let t = Transition {
        expected_status: current.status_str().to_string(),
        expected_version: current.version(),
        next: encode(next)?,
    };
    store.compare_and_set(&t, effect).await
}

pub async fn list<R: Record>(
    store: &dyn LedgerStore,
    filter: RecordFilter,
) -> Result<Vec<R>, CoreError> {
    debug_assert_eq!(filter.kind, R::KIND);
    store
        .list_records(&filter)
        .await?
        .iter()
        .map(decode)
        .collect()
}
