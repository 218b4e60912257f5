#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use credit_ledger::ledger::{Adjustment, Applied};
use credit_ledger::store::{RecordFilter, RecordKind, StoredRecord, Transition};
use credit_ledger::{
    Account, AccountId, AppConfig, Core, CoreError, Credits, EntryReason, LedgerEntry,
    LedgerStore, MemoryBlobStore, MemoryNotifier, MemoryStore, NewAccount, Role, Roles,
};

pub struct Harness {
    pub core: Core,
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub admin: AccountId,
}

/// Config with no signup bonus, so balances start at exactly zero
pub fn zero_bonus_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.signup_bonus = Decimal::ZERO;
    config
}

pub async fn harness(config: AppConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    build(config, store.clone(), store).await
}

/// Harness whose core runs on a [`FlakyStore`] over the harness store
pub async fn flaky_harness(config: AppConfig) -> (Harness, Arc<FlakyStore>) {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    (build(config, store, flaky.clone()).await, flaky)
}

async fn build(config: AppConfig, store: Arc<MemoryStore>, backend: Arc<dyn LedgerStore>) -> Harness {
    let blobs = Arc::new(MemoryBlobStore::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let core = Core::new(&config, backend, blobs.clone(), notifier.clone());
    let admin = core
        .accounts
        .register(NewAccount {
            display_name: "Admin".into(),
            roles: Roles::from([Role::Admin]),
            referral_code: None,
        })
        .await
        .unwrap()
        .account_id;
    Harness {
        core,
        store,
        blobs,
        notifier,
        admin,
    }
}

impl Harness {
    pub async fn signup(&self, name: &str, roles: &[Role]) -> AccountId {
        self.core
            .accounts
            .register(NewAccount {
                display_name: name.into(),
                roles: Roles::from(roles),
                referral_code: None,
            })
            .await
            .unwrap()
            .account_id
    }

    pub async fn requester(&self) -> AccountId {
        self.signup("Requester", &[Role::Requester]).await
    }

    pub async fn collaborator(&self) -> AccountId {
        self.signup("Collaborator", &[Role::Collaborator]).await
    }

    /// Operator top-up outside any workflow
    pub async fn fund(&self, account: AccountId, amount: Credits) {
        self.core
            .ledger
            .adjust(
                account,
                amount,
                EntryReason::ManualAdjustment,
                &format!("seed:{}", ulid::Ulid::new()),
            )
            .await
            .unwrap();
    }

    pub async fn balance(&self, account: AccountId) -> Credits {
        self.core.ledger.balance(account).await.unwrap()
    }

    pub async fn assert_reconciled(&self, account: AccountId) {
        let report = self.core.reconcile(account).await.unwrap();
        assert!(
            report.is_consistent(),
            "{}: {:?}",
            report,
            report.discrepancies()
        );
    }
}

/// Store operations a [`FlakyStore`] can take down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outage {
    /// `find_by_referral_code`
    ReferralLookup,
    /// Any write that inserts or moves a referral record
    ReferralWrites,
    /// `accounts_with_role`
    RoleLookup,
}

/// Memory store that answers `Storage` errors for the operations switched off
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    down: Mutex<HashSet<Outage>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            down: Mutex::new(HashSet::new()),
        }
    }

    pub fn set(&self, outage: Outage, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(outage);
        } else {
            set.remove(&outage);
        }
    }

    fn check(&self, outage: Outage) -> Result<(), CoreError> {
        if self.down.lock().unwrap().contains(&outage) {
            return Err(CoreError::Storage(format!("{:?} unavailable", outage)));
        }
        Ok(())
    }

    fn check_records(&self, records: &[StoredRecord]) -> Result<(), CoreError> {
        if records.iter().any(|r| r.kind == RecordKind::Referral) {
            self.check(Outage::ReferralWrites)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn insert_account(
        &self,
        account: &Account,
        opening: Option<&Adjustment>,
        records: &[StoredRecord],
    ) -> Result<Account, CoreError> {
        self.check_records(records)?;
        self.inner.insert_account(account, opening, records).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
        self.inner.get_account(id).await
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>, CoreError> {
        self.check(Outage::ReferralLookup)?;
        self.inner.find_by_referral_code(code).await
    }

    async fn accounts_with_role(&self, role: Role) -> Result<Vec<Account>, CoreError> {
        self.check(Outage::RoleLookup)?;
        self.inner.accounts_with_role(role).await
    }

    async fn adjust(&self, adj: &Adjustment) -> Result<Applied, CoreError> {
        self.inner.adjust(adj).await
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<LedgerEntry>, CoreError> {
        self.inner.entries(account).await
    }

    async fn insert_records(
        &self,
        records: &[StoredRecord],
        effect: Option<&Adjustment>,
    ) -> Result<Option<Applied>, CoreError> {
        self.check_records(records)?;
        self.inner.insert_records(records, effect).await
    }

    async fn get_record(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<StoredRecord>, CoreError> {
        self.inner.get_record(kind, id).await
    }

    async fn compare_and_set(
        &self,
        transition: &Transition,
        effect: Option<&Adjustment>,
    ) -> Result<Option<Applied>, CoreError> {
        self.check_records(std::slice::from_ref(&transition.next))?;
        self.inner.compare_and_set(transition, effect).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<StoredRecord>, CoreError> {
        self.inner.list_records(filter).await
    }
}
