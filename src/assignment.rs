//! Assignment Workflow
//!
//! Fans a request out to collaborators. Each assignment is independent:
//!
//! ```text
//! PENDING ──accept──→ ACCEPTED
//!    └─────reject──→ REJECTED
//! ```
//!
//! Assignments never touch balances. Uniqueness is held by store guards:
//! one pending assignment per (request, collaborator), and under
//! [`AssignmentPolicy::ClaimExclusive`] one accepted assignment per request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::account::Role;
use crate::authz::{self, Capability};
use crate::config::AssignmentPolicy;
use crate::core_types::{AccountId, AssignmentId, RequestId};
use crate::error::CoreError;
use crate::notify::{Notifier, notify_all};
use crate::request::{Request, RequestStatus};
use crate::store::{self, LedgerStore, Record, RecordFilter, RecordKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
}

impl AssignmentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AssignmentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A collaborator's answer to an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    fn outcome(self) -> AssignmentStatus {
        match self {
            Decision::Accept => AssignmentStatus::Accepted,
            Decision::Reject => AssignmentStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: AssignmentId,
    pub request_id: RequestId,
    pub collaborator: AccountId,
    pub status: AssignmentStatus,
    /// Accepting claims the request exclusively
    pub exclusive: bool,
    pub assigned_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Assignment {
    pub fn new(request_id: RequestId, collaborator: AccountId, exclusive: bool) -> Self {
        Self {
            assignment_id: AssignmentId::new(),
            request_id,
            collaborator,
            status: AssignmentStatus::Pending,
            exclusive,
            assigned_at: Utc::now(),
            responded_at: None,
            version: 0,
        }
    }

    fn respond(&self, decision: Decision) -> Self {
        let mut next = self.clone();
        next.status = decision.outcome();
        next.responded_at = Some(Utc::now());
        next.version += 1;
        next
    }
}

impl Record for Assignment {
    const KIND: RecordKind = RecordKind::Assignment;

    fn record_id(&self) -> String {
        self.assignment_id.to_string()
    }

    fn owner(&self) -> AccountId {
        self.collaborator
    }

    fn status_str(&self) -> &'static str {
        self.status.as_str()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.assigned_at
    }

    fn parent(&self) -> Option<String> {
        Some(self.request_id.to_string())
    }

    fn guard(&self) -> Option<String> {
        match self.status {
            AssignmentStatus::Pending => Some(format!(
                "assignment:{}:{}",
                self.request_id, self.collaborator
            )),
            AssignmentStatus::Accepted if self.exclusive => {
                Some(format!("claim:{}", self.request_id))
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AssignmentWorkflow {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    policy: AssignmentPolicy,
}

impl AssignmentWorkflow {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        policy: AssignmentPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> AssignmentPolicy {
        self.policy
    }

    /// Create one pending assignment per collaborator, all or none.
    ///
    /// # Errors
    /// * `Conflict` - request is terminal, or a collaborator already holds a
    ///   pending or accepted assignment on it
    /// * `Validation` - empty list or a non-collaborator account
    pub async fn assign(
        &self,
        actor: AccountId,
        request_id: RequestId,
        collaborators: &[AccountId],
    ) -> Result<Vec<Assignment>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::ManageRequests)?;

        if collaborators.is_empty() {
            return Err(CoreError::validation("at least one collaborator is required"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = collaborators.iter().find(|c| !seen.insert(**c)) {
            return Err(CoreError::validation(format!(
                "collaborator {} listed more than once",
                dup
            )));
        }

        let request: Request = store::load(self.store.as_ref(), &request_id.to_string()).await?;
        if !matches!(
            request.status,
            RequestStatus::Pending | RequestStatus::InProgress
        ) {
            return Err(CoreError::conflict(format!(
                "request {} is {} and cannot be assigned",
                request_id, request.status
            )));
        }

        for id in collaborators {
            let account = self
                .store
                .get_account(*id)
                .await?
                .ok_or_else(|| CoreError::not_found("Account", id))?;
            if !account.is_collaborator() {
                return Err(CoreError::validation(format!(
                    "account {} is not a collaborator",
                    id
                )));
            }
        }

        let existing = self.assignments_on(request_id).await?;
        if let Some(taken) = existing.iter().find(|a| {
            a.status == AssignmentStatus::Accepted && collaborators.contains(&a.collaborator)
        }) {
            return Err(CoreError::conflict(format!(
                "collaborator {} already accepted request {}",
                taken.collaborator, request_id
            )));
        }

        let exclusive = self.policy == AssignmentPolicy::ClaimExclusive;
        let batch: Vec<Assignment> = collaborators
            .iter()
            .map(|c| Assignment::new(request_id, *c, exclusive))
            .collect();

        if let Err(e) = store::insert(self.store.as_ref(), &batch, None).await {
            warn!(request_id = %request_id, error = %e, "Assign failed");
            return Err(e);
        }
        info!(
            request_id = %request_id,
            count = batch.len(),
            policy = ?self.policy,
            "Collaborators assigned"
        );

        notify_all(
            self.notifier.as_ref(),
            collaborators,
            "New assignment",
            &format!("You were assigned a {} request.", request.service_kind),
        )
        .await;
        Ok(batch)
    }

    /// Accept or reject a pending assignment (the assigned collaborator only)
    pub async fn respond(
        &self,
        actor: AccountId,
        assignment_id: AssignmentId,
        decision: Decision,
    ) -> Result<Assignment, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::RespondAssignment)?;

        let current: Assignment =
            store::load(self.store.as_ref(), &assignment_id.to_string()).await?;
        if current.collaborator != actor.id() {
            return Err(CoreError::unauthorized(format!(
                "assignment {} belongs to another collaborator",
                assignment_id
            )));
        }
        if current.status != AssignmentStatus::Pending {
            return Err(CoreError::conflict(format!(
                "assignment {} is already {}",
                assignment_id, current.status
            )));
        }
        if decision == Decision::Accept {
            let request: Request =
                store::load(self.store.as_ref(), &current.request_id.to_string()).await?;
            if request.status.is_terminal() {
                return Err(CoreError::conflict(format!(
                    "request {} is {}",
                    request.request_id, request.status
                )));
            }
        }

        let next = current.respond(decision);
        if let Err(e) = store::transition(self.store.as_ref(), &current, &next, None).await {
            warn!(assignment_id = %assignment_id, error = %e, "Respond failed");
            return Err(e);
        }
        info!(
            assignment_id = %assignment_id,
            request_id = %next.request_id,
            collaborator = %next.collaborator,
            status = %next.status,
            "Assignment answered"
        );

        let admins: Vec<AccountId> = match self.store.accounts_with_role(Role::Admin).await {
            Ok(admins) => admins.into_iter().map(|a| a.account_id).collect(),
            Err(e) => {
                warn!(
                    assignment_id = %assignment_id,
                    error = %e,
                    "Admin lookup failed, answer not announced"
                );
                Vec::new()
            }
        };
        notify_all(
            self.notifier.as_ref(),
            &admins,
            "Assignment answered",
            &format!(
                "{} {} request {}",
                actor.account().display_name,
                next.status,
                next.request_id
            ),
        )
        .await;
        Ok(next)
    }

    /// All assignments on a request (admin or request owner)
    pub async fn list_for_request(
        &self,
        actor: AccountId,
        request_id: RequestId,
    ) -> Result<Vec<Assignment>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        let request: Request = store::load(self.store.as_ref(), &request_id.to_string()).await?;
        actor.require_self_or_admin(request.owner)?;
        self.assignments_on(request_id).await
    }

    pub async fn list_for_collaborator(
        &self,
        actor: AccountId,
        collaborator: AccountId,
    ) -> Result<Vec<Assignment>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(collaborator)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Assignment).owner(collaborator),
        )
        .await
    }

    async fn assignments_on(&self, request_id: RequestId) -> Result<Vec<Assignment>, CoreError> {
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Assignment).parent(request_id),
        )
        .await
    }
}
