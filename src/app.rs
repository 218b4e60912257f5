//! Service wiring
//!
//! [`Core`] holds one instance of every service over a shared store, blob
//! store and notifier. Each operation takes the acting account id first.

use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use crate::account::AccountRegistry;
use crate::assignment::AssignmentWorkflow;
use crate::blob::{BlobStore, FsBlobStore};
use crate::config::{AppConfig, ReferralTrigger};
use crate::core_types::AccountId;
use crate::db::Database;
use crate::error::CoreError;
use crate::funding::{DepositWorkflow, WithdrawalWorkflow};
use crate::ledger::Ledger;
use crate::logging::init_logging;
use crate::notify::{Notifier, TracingNotifier};
use crate::reconcile::{Reconciliation, reconcile};
use crate::referral::ReferralLedger;
use crate::request::RequestLifecycle;
use crate::store::{LedgerStore, MemoryStore, PgStore};

#[derive(Clone)]
pub struct Core {
    pub store: Arc<dyn LedgerStore>,
    pub ledger: Ledger,
    pub accounts: AccountRegistry,
    pub requests: RequestLifecycle,
    pub assignments: AssignmentWorkflow,
    pub deposits: DepositWorkflow,
    pub withdrawals: WithdrawalWorkflow,
    pub referrals: ReferralLedger,
}

impl Core {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let rate = config.ledger.credit_rate;
        let referrals = ReferralLedger::new(store.clone(), notifier.clone());

        let mut deposits = DepositWorkflow::new(store.clone(), blobs.clone(), notifier.clone(), rate);
        if config.referral_trigger == ReferralTrigger::FirstApprovedDeposit {
            deposits = deposits.with_referral_trigger(referrals.clone());
        }

        Self {
            ledger: Ledger::new(store.clone()),
            accounts: AccountRegistry::new(
                store.clone(),
                config.ledger.signup_bonus,
                config.ledger.referral_bonus,
            ),
            requests: RequestLifecycle::new(store.clone(), blobs, notifier.clone()),
            assignments: AssignmentWorkflow::new(
                store.clone(),
                notifier.clone(),
                config.assignment_policy,
            ),
            deposits,
            withdrawals: WithdrawalWorkflow::new(
                store.clone(),
                notifier,
                rate,
                config.withdrawal.clone(),
            ),
            referrals,
            store,
        }
    }

    /// PostgreSQL when `postgres_url` is set, in-memory otherwise; blobs on disk
    pub async fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        config
            .validate()
            .map_err(|e| CoreError::validation(e.to_string()))?;

        let store: Arc<dyn LedgerStore> = match &config.postgres_url {
            Some(url) => {
                let db = Database::connect(url).await?;
                db.health_check().await?;
                let pg = PgStore::new(db.pool().clone());
                pg.migrate().await?;
                Arc::new(pg)
            }
            None => Arc::new(MemoryStore::new()),
        };
        let blobs = Arc::new(FsBlobStore::new(&config.blob_root));
        info!(
            store = store.name(),
            blob_root = %config.blob_root,
            policy = ?config.assignment_policy,
            trigger = ?config.referral_trigger,
            "Core initialized"
        );
        Ok(Self::new(config, store, blobs, Arc::new(TracingNotifier)))
    }

    /// Process entry point: load `config/<env>.yaml`, install logging, build
    /// the core. Hold the guard for as long as the process runs.
    pub async fn start(env: &str) -> Result<(Self, WorkerGuard), CoreError> {
        let config = AppConfig::load(env).map_err(|e| CoreError::validation(e.to_string()))?;
        let guard = init_logging(&config).map_err(|e| CoreError::validation(e.to_string()))?;
        info!(env, "Starting credit ledger");
        let core = Self::from_config(&config).await?;
        Ok((core, guard))
    }

    pub async fn reconcile(&self, account: AccountId) -> Result<Reconciliation, CoreError> {
        reconcile(self.store.as_ref(), account).await
    }
}
