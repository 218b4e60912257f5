//! In-memory store
//!
//! One mutex over the whole state: every operation, including a transition
//! with its ledger effect, runs as a single critical section, which makes the
//! store trivially serializable. Used for tests and embedded deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    LedgerStore, RecordFilter, RecordKind, StoredRecord, Transition, guard_taken, replay, stale,
};
use crate::account::{Account, Role};
use crate::core_types::AccountId;
use crate::error::CoreError;
use crate::ledger::{Adjustment, Applied, LedgerEntry};

/// Where an injected failure strikes the next write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Fail before anything is written (nothing committed)
    BeforeCommit,
    /// Commit, then report a failure (lost response)
    AfterCommit,
}

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    codes: HashMap<String, AccountId>,
    entries: Vec<LedgerEntry>,
    /// (account, idempotency key) -> index into `entries`
    keys: HashMap<(AccountId, String), usize>,
    records: HashMap<(RecordKind, String), StoredRecord>,
    /// Insertion order for listing
    order: Vec<(RecordKind, String)>,
    guards: HashMap<String, (RecordKind, String)>,
    failure: Option<FailurePoint>,
}

enum Planned {
    Replay(LedgerEntry),
    Apply(LedgerEntry),
}

impl State {
    /// Validate an adjustment against current state without mutating it
    fn plan(&self, adj: &Adjustment) -> Result<Planned, CoreError> {
        adj.validate()?;
        let account = self
            .accounts
            .get(&adj.account)
            .ok_or_else(|| CoreError::not_found("Account", adj.account))?;

        if let Some(&idx) = self.keys.get(&(adj.account, adj.idempotency_key.clone())) {
            return match replay(self.entries[idx].clone(), adj)? {
                Applied::Replayed(e) | Applied::New(e) => Ok(Planned::Replay(e)),
            };
        }

        Ok(Planned::Apply(adj.apply_to(account.balance)?))
    }

    fn commit(&mut self, planned: Planned) -> Applied {
        match planned {
            Planned::Replay(entry) => Applied::Replayed(entry),
            Planned::Apply(entry) => {
                if let Some(account) = self.accounts.get_mut(&entry.account) {
                    account.balance = entry.balance_after;
                }
                self.keys.insert(
                    (entry.account, entry.idempotency_key.clone()),
                    self.entries.len(),
                );
                self.entries.push(entry.clone());
                Applied::New(entry)
            }
        }
    }

    /// Reject ids or guards already in use, including within `records`
    fn check_new(&self, records: &[StoredRecord]) -> Result<(), CoreError> {
        let mut new_guards: Vec<&str> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let key = (record.kind, record.id.clone());
            if self.records.contains_key(&key)
                || records[..i]
                    .iter()
                    .any(|r| r.kind == record.kind && r.id == record.id)
            {
                return Err(CoreError::conflict(format!(
                    "{} {} already exists",
                    record.kind, record.id
                )));
            }
            if let Some(guard) = &record.guard {
                if self.guards.contains_key(guard) || new_guards.contains(&guard.as_str()) {
                    return Err(guard_taken(guard));
                }
                new_guards.push(guard);
            }
        }
        Ok(())
    }

    fn put_records(&mut self, records: &[StoredRecord]) {
        for record in records {
            let key = (record.kind, record.id.clone());
            if let Some(guard) = &record.guard {
                self.guards.insert(guard.clone(), key.clone());
            }
            self.order.push(key.clone());
            self.records.insert(key, record.clone());
        }
    }

    fn guard_free(&self, guard: &str, owner: &(RecordKind, String)) -> bool {
        self.guards.get(guard).is_none_or(|holder| holder == owner)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write fail at `point` (one-shot)
    pub fn fail_next(&self, point: FailurePoint) {
        self.lock().failure = Some(point);
    }

    /// Number of ledger entries across all accounts
    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied write:
        // every mutation is planned first, then committed without fallible steps.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a write under the lock, honouring any injected failure
    fn write<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut State) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut state = self.lock();
        match state.failure.take() {
            Some(FailurePoint::BeforeCommit) => {
                debug!(op, "Injected failure before commit");
                Err(CoreError::Storage(format!("injected failure before {}", op)))
            }
            Some(FailurePoint::AfterCommit) => {
                f(&mut *state)?;
                debug!(op, "Injected failure after commit");
                Err(CoreError::Storage(format!("injected failure after {}", op)))
            }
            None => f(&mut *state),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_account(
        &self,
        account: &Account,
        opening: Option<&Adjustment>,
        records: &[StoredRecord],
    ) -> Result<Account, CoreError> {
        self.write("insert_account", |state| {
            if state.accounts.contains_key(&account.account_id) {
                return Err(CoreError::conflict(format!(
                    "account {} already exists",
                    account.account_id
                )));
            }
            if state.codes.contains_key(&account.referral_code) {
                return Err(CoreError::conflict(format!(
                    "referral code {} already taken",
                    account.referral_code
                )));
            }
            if let Some(adj) = opening
                && adj.account != account.account_id
            {
                return Err(CoreError::validation(
                    "opening adjustment must target the new account",
                ));
            }
            state.check_new(records)?;

            let mut fresh = account.clone();
            fresh.balance = rust_decimal::Decimal::ZERO;
            state.accounts.insert(fresh.account_id, fresh);

            if let Some(adj) = opening {
                match state.plan(adj) {
                    Ok(planned) => {
                        state.commit(planned);
                    }
                    Err(e) => {
                        state.accounts.remove(&account.account_id);
                        return Err(e);
                    }
                }
            }
            state.put_records(records);
            state
                .codes
                .insert(account.referral_code.clone(), account.account_id);
            Ok(state.accounts[&account.account_id].clone())
        })
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
        Ok(self.lock().accounts.get(&id).cloned())
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>, CoreError> {
        let state = self.lock();
        Ok(state
            .codes
            .get(code)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn accounts_with_role(&self, role: Role) -> Result<Vec<Account>, CoreError> {
        let state = self.lock();
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.roles.contains(role))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.account_id);
        Ok(accounts)
    }

    async fn adjust(&self, adj: &Adjustment) -> Result<Applied, CoreError> {
        self.write("adjust", |state| {
            let planned = state.plan(adj)?;
            Ok(state.commit(planned))
        })
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, CoreError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.account == account)
            .cloned()
            .collect())
    }

    async fn insert_records(
        &self,
        records: &[StoredRecord],
        effect: Option<&Adjustment>,
    ) -> Result<Option<Applied>, CoreError> {
        self.write("insert_records", |state| {
            state.check_new(records)?;
            let planned = effect.map(|adj| state.plan(adj)).transpose()?;
            state.put_records(records);
            Ok(planned.map(|p| state.commit(p)))
        })
    }

    async fn get_record(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<StoredRecord>, CoreError> {
        Ok(self.lock().records.get(&(kind, id.to_string())).cloned())
    }

    async fn compare_and_set(
        &self,
        transition: &Transition,
        effect: Option<&Adjustment>,
    ) -> Result<Option<Applied>, CoreError> {
        self.write("compare_and_set", |state| {
            let next = &transition.next;
            let key = (next.kind, next.id.clone());
            let current = state
                .records
                .get(&key)
                .ok_or_else(|| CoreError::not_found(next.kind.label(), &next.id))?;

            if current.status != transition.expected_status
                || current.version != transition.expected_version
            {
                return Err(stale(transition));
            }
            if let Some(guard) = &next.guard
                && !state.guard_free(guard, &key)
            {
                return Err(guard_taken(guard));
            }

            let planned = effect.map(|adj| state.plan(adj)).transpose()?;

            let old_guard = current.guard.clone();
            let created_at = current.created_at;
            if let Some(old) = old_guard {
                state.guards.remove(&old);
            }
            if let Some(guard) = &next.guard {
                state.guards.insert(guard.clone(), key.clone());
            }
            let mut stored = next.clone();
            stored.created_at = created_at;
            state.records.insert(key, stored);

            Ok(planned.map(|p| state.commit(p)))
        })
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<StoredRecord>, CoreError> {
        let state = self.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|key| state.records.get(key))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
