//! Notification sink
//!
//! Delivery is outside the consistency boundary: the core calls `notify`
//! after a transition has committed and never inspects the outcome.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use crate::core_types::AccountId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, account: AccountId, title: &str, message: &str);
}

/// Writes notifications to the log
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, account: AccountId, title: &str, message: &str) {
        info!(account = %account, title, message, "Notification");
    }
}

/// Drops every notification
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _account: AccountId, _title: &str, _message: &str) {}
}

/// A delivered notification, as captured by [`MemoryNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub account: AccountId,
    pub title: String,
    pub message: String,
}

/// Keeps notifications in memory for inspection
#[derive(Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn for_account(&self, account: AccountId) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(|n| n.account == account)
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, account: AccountId, title: &str, message: &str) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(Notice {
                account,
                title: title.to_string(),
                message: message.to_string(),
            });
        }
    }
}

/// Send the same notice to several accounts concurrently
pub async fn notify_all(notifier: &dyn Notifier, accounts: &[AccountId], title: &str, message: &str) {
    futures::future::join_all(
        accounts
            .iter()
            .map(|account| notifier.notify(*account, title, message)),
    )
    .await;
}
