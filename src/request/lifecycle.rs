//! Request lifecycle service

use std::sync::Arc;
use tracing::{info, warn};

use super::state::RequestStatus;
use super::types::Request;
use crate::account::validation::required_text;
use crate::account::{ServiceKind, validation::ValidationError};
use crate::assignment::{Assignment, AssignmentStatus};
use crate::authz::{self, Actor, Capability};
use crate::blob::{BlobRef, BlobStore, sanitize_file_name};
use crate::core_types::{AccountId, Credits, RequestId};
use crate::error::CoreError;
use crate::ledger::{Adjustment, EntryReason, keys};
use crate::money::{CREDIT_DECIMALS, check_amount, format_credits};
use crate::notify::Notifier;
use crate::store::{self, LedgerStore, RecordFilter, RecordKind};

const MAX_DESCRIPTION: usize = 2000;
const MAX_REASON: usize = 500;
const MAX_CLIENT_REF: usize = 64;

/// Input for [`RequestLifecycle::create`]
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub service_kind: String,
    pub description: String,
    pub cost: Credits,
    /// Optional client idempotency key; a retried create returns the original
    pub client_ref: Option<String>,
}

#[derive(Clone)]
pub struct RequestLifecycle {
    store: Arc<dyn LedgerStore>,
    blobs: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
}

impl RequestLifecycle {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        blobs: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            blobs,
            notifier,
        }
    }

    async fn load(&self, id: RequestId) -> Result<Request, CoreError> {
        store::load(self.store.as_ref(), &id.to_string()).await
    }

    async fn find_by_client_ref(
        &self,
        owner: AccountId,
        client_ref: &str,
    ) -> Result<Option<Request>, CoreError> {
        let requests: Vec<Request> = store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Request).owner(owner),
        )
        .await?;
        Ok(requests
            .into_iter()
            .find(|r| r.client_ref.as_deref() == Some(client_ref)))
    }

    /// Debit `cost` and create the request in PENDING, atomically.
    ///
    /// # Errors
    /// * `InsufficientBalance` - balance below cost; nothing is created
    /// * `Validation` - bad service kind, cost or description
    pub async fn create(&self, actor: AccountId, new: NewRequest) -> Result<Request, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::SubmitRequest)?;

        let service_kind = ServiceKind::new(&new.service_kind)?;
        let cost = check_amount(new.cost, CREDIT_DECIMALS)?;
        let description = new.description.trim().to_string();
        if description.chars().count() > MAX_DESCRIPTION {
            return Err(ValidationError::InvalidLength {
                field: "description",
                min: 0,
                max: MAX_DESCRIPTION,
                actual: description.chars().count(),
            }
            .into());
        }
        let client_ref = new
            .client_ref
            .as_deref()
            .map(|r| required_text("client_ref", r, MAX_CLIENT_REF))
            .transpose()?;

        if let Some(cref) = &client_ref
            && let Some(existing) = self.find_by_client_ref(actor.id(), cref).await?
        {
            info!(request_id = %existing.request_id, client_ref = %cref, "IDEMPOTENCY: returning existing request");
            return Ok(existing);
        }

        let request = Request::new(actor.id(), service_kind, description, cost, client_ref);
        let debit = Adjustment::debit(
            actor.id(),
            cost,
            EntryReason::RequestDebit,
            keys::request_debit(request.request_id),
        );

        if let Err(e) =
            store::insert(self.store.as_ref(), std::slice::from_ref(&request), Some(&debit)).await
        {
            // Lost the race against a concurrent retry with the same client_ref
            if let (CoreError::Conflict(_), Some(cref)) = (&e, request.client_ref.as_deref())
                && let Some(existing) = self.find_by_client_ref(actor.id(), cref).await?
            {
                return Ok(existing);
            }
            return Err(e);
        }

        info!(
            request_id = %request.request_id,
            owner = %request.owner,
            cost = %request.cost,
            kind = %request.service_kind,
            "Request created"
        );
        Ok(request)
    }

    /// PENDING → IN_PROGRESS (admin)
    pub async fn start(&self, actor: AccountId, id: RequestId) -> Result<Request, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::ManageRequests)?;

        let current = self.load(id).await?;
        expect_status(&current, RequestStatus::Pending)?;

        let next = current.next(RequestStatus::InProgress);
        store::transition(self.store.as_ref(), &current, &next, None).await?;
        info!(request_id = %id, "Request started");

        self.notifier
            .notify(
                next.owner,
                "Request in progress",
                &format!("Work on your {} request has started.", next.service_kind),
            )
            .await;
        Ok(next)
    }

    /// Upload a result artifact while IN_PROGRESS (admin or accepted collaborator)
    pub async fn attach_result(
        &self,
        actor: AccountId,
        id: RequestId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Request, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::UploadResult)?;

        let current = self.load(id).await?;
        if !actor.is_admin() && !self.has_accepted(actor.id(), id).await? {
            return Err(CoreError::unauthorized(format!(
                "account {} has no accepted assignment on request {}",
                actor.id(),
                id
            )));
        }
        expect_status(&current, RequestStatus::InProgress)?;
        if bytes.is_empty() {
            return Err(CoreError::validation("result artifact is empty"));
        }

        let path = format!(
            "requests/{}/results/{}-{}",
            id,
            ulid::Ulid::new(),
            sanitize_file_name(file_name)
        );
        let blob = self.blobs.put(&path, bytes).await?;

        let next = current.with_result(blob.clone());
        if let Err(e) = store::transition(self.store.as_ref(), &current, &next, None).await {
            self.discard_blob(&blob).await;
            return Err(e);
        }

        info!(request_id = %id, blob = %blob, "Result artifact attached");
        Ok(next)
    }

    /// Read back a result artifact (owner, admin, or accepted collaborator)
    pub async fn download_result(
        &self,
        actor: AccountId,
        id: RequestId,
        blob: &BlobRef,
    ) -> Result<Vec<u8>, CoreError> {
        let request = self.get(actor, id).await?;
        if !request.result_refs.contains(blob) {
            return Err(CoreError::not_found("Result", blob));
        }
        Ok(self.blobs.get(blob).await?)
    }

    /// IN_PROGRESS → COMPLETED (admin); requires at least one result artifact
    pub async fn complete(&self, actor: AccountId, id: RequestId) -> Result<Request, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::ManageRequests)?;

        let current = self.load(id).await?;
        expect_status(&current, RequestStatus::InProgress)?;
        if current.result_refs.is_empty() {
            return Err(CoreError::validation(
                "at least one result artifact is required to complete a request",
            ));
        }

        let next = current.next(RequestStatus::Completed);
        store::transition(self.store.as_ref(), &current, &next, None).await?;
        info!(request_id = %id, results = next.result_refs.len(), "Request completed");

        self.notifier
            .notify(
                next.owner,
                "Request completed",
                &format!("Your {} request is ready.", next.service_kind),
            )
            .await;
        Ok(next)
    }

    /// PENDING | IN_PROGRESS → CANCELLED with a refund of `cost`.
    ///
    /// Admins may cancel either state; the owner may cancel only while PENDING.
    /// Of two racing cancels exactly one succeeds, the other gets `Conflict`.
    pub async fn cancel(
        &self,
        actor: AccountId,
        id: RequestId,
        reason: &str,
    ) -> Result<Request, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        let reason = required_text("cancellation_reason", reason, MAX_REASON)?;

        let current = self.load(id).await?;
        if !actor.can(Capability::ManageRequests) {
            if current.owner != actor.id() {
                return Err(CoreError::unauthorized(format!(
                    "account {} may not cancel request {}",
                    actor.id(),
                    id
                )));
            }
            if current.status == RequestStatus::InProgress {
                return Err(CoreError::unauthorized(
                    "owners may only cancel requests that have not started",
                ));
            }
        }
        if !current.status.is_cancellable() {
            return Err(CoreError::conflict(format!(
                "request {} is {} and cannot be cancelled",
                id, current.status
            )));
        }

        let mut next = current.next(RequestStatus::Cancelled);
        next.cancellation_reason = Some(reason);
        let refund = Adjustment::credit(
            current.owner,
            current.cost,
            EntryReason::RequestRefund,
            keys::request_refund(id),
        );

        if let Err(e) =
            store::transition(self.store.as_ref(), &current, &next, Some(&refund)).await
        {
            warn!(request_id = %id, error = %e, "Cancel failed");
            return Err(e);
        }
        info!(request_id = %id, refund = %current.cost, "Request cancelled and refunded");

        self.notifier
            .notify(
                next.owner,
                "Request cancelled",
                &format!(
                    "Your {} request was cancelled and {} credits were refunded. Reason: {}",
                    next.service_kind,
                    format_credits(next.cost),
                    next.cancellation_reason.as_deref().unwrap_or_default()
                ),
            )
            .await;
        Ok(next)
    }

    /// Owner, admin, or any collaborator assigned to the request
    pub async fn get(&self, actor: AccountId, id: RequestId) -> Result<Request, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        let request = self.load(id).await?;
        if request.owner == actor.id()
            || actor.is_admin()
            || self.is_assigned(&actor, id).await?
        {
            Ok(request)
        } else {
            Err(CoreError::unauthorized(format!(
                "account {} may not view request {}",
                actor.id(),
                id
            )))
        }
    }

    pub async fn list_for_owner(
        &self,
        actor: AccountId,
        owner: AccountId,
    ) -> Result<Vec<Request>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require_self_or_admin(owner)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Request).owner(owner),
        )
        .await
    }

    /// Admin work queue
    pub async fn list_by_status(
        &self,
        actor: AccountId,
        status: RequestStatus,
    ) -> Result<Vec<Request>, CoreError> {
        let actor = authz::resolve(self.store.as_ref(), actor).await?;
        actor.require(Capability::ManageRequests)?;
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Request).status(status.as_str()),
        )
        .await
    }

    async fn assignments_of(
        &self,
        collaborator: AccountId,
        id: RequestId,
    ) -> Result<Vec<Assignment>, CoreError> {
        store::list(
            self.store.as_ref(),
            RecordFilter::kind(RecordKind::Assignment)
                .owner(collaborator)
                .parent(id),
        )
        .await
    }

    async fn has_accepted(&self, collaborator: AccountId, id: RequestId) -> Result<bool, CoreError> {
        Ok(self
            .assignments_of(collaborator, id)
            .await?
            .iter()
            .any(|a| a.status == AssignmentStatus::Accepted))
    }

    async fn is_assigned(&self, actor: &Actor, id: RequestId) -> Result<bool, CoreError> {
        if !actor.account().is_collaborator() {
            return Ok(false);
        }
        Ok(!self.assignments_of(actor.id(), id).await?.is_empty())
    }

    async fn discard_blob(&self, blob: &BlobRef) {
        if let Err(e) = self.blobs.delete(blob).await {
            warn!(blob = %blob, error = %e, "Failed to delete orphaned blob");
        }
    }
}

fn expect_status(request: &Request, expected: RequestStatus) -> Result<(), CoreError> {
    if request.status == expected {
        Ok(())
    } else {
        Err(CoreError::conflict(format!(
            "request {} is {}, expected {}",
            request.request_id, request.status, expected
        )))
    }
}
