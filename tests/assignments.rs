mod common;

use common::{Harness, Outage, flaky_harness, harness, zero_bonus_config};
use credit_ledger::{
    AppConfig, AssignmentPolicy, AssignmentStatus, CoreError, Decision, NewRequest, RequestId,
};
use rust_decimal_macros::dec;

async fn paid_request(h: &Harness) -> RequestId {
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;
    h.core
        .requests
        .create(
            user,
            NewRequest {
                service_kind: "vocal-tuning".into(),
                description: "lead vocal".into(),
                cost: dec!(2),
                client_ref: None,
            },
        )
        .await
        .unwrap()
        .request_id
}

fn exclusive_config() -> AppConfig {
    let mut config = zero_bonus_config();
    config.assignment_policy = AssignmentPolicy::ClaimExclusive;
    config
}

#[tokio::test]
async fn test_assign_and_respond() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let (c1, c2) = (h.collaborator().await, h.collaborator().await);

    let batch = h.core.assignments.assign(h.admin, req, &[c1, c2]).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|a| a.status == AssignmentStatus::Pending));
    assert_eq!(h.notifier.for_account(c1)[0].title, "New assignment");

    let accepted = h
        .core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(accepted.status, AssignmentStatus::Accepted);
    assert!(accepted.responded_at.is_some());

    let rejected = h
        .core
        .assignments
        .respond(c2, batch[1].assignment_id, Decision::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.status, AssignmentStatus::Rejected);

    let answered = h
        .notifier
        .for_account(h.admin)
        .into_iter()
        .filter(|n| n.title == "Assignment answered")
        .count();
    assert_eq!(answered, 2);

    let err = h
        .core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    assert_eq!(
        h.core.assignments.list_for_request(h.admin, req).await.unwrap().len(),
        2
    );
    assert_eq!(
        h.core.assignments.list_for_collaborator(c2, c2).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_respond_commits_when_admin_lookup_fails() {
    let (h, flaky) = flaky_harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let c1 = h.collaborator().await;
    let batch = h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();

    flaky.set(Outage::RoleLookup, true);
    let accepted = h
        .core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(accepted.status, AssignmentStatus::Accepted);
    assert!(
        h.notifier
            .for_account(h.admin)
            .iter()
            .all(|n| n.title != "Assignment answered")
    );

    let stored = h.core.assignments.list_for_collaborator(c1, c1).await.unwrap();
    assert_eq!(stored[0].status, AssignmentStatus::Accepted);
}

#[tokio::test]
async fn test_duplicate_pending_assignment_conflicts() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let (c1, c2) = (h.collaborator().await, h.collaborator().await);

    h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();
    let err = h
        .core
        .assignments
        .assign(h.admin, req, &[c2, c1])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    // Batch is all-or-nothing: c2 was not assigned either
    assert!(
        h.core
            .assignments
            .list_for_collaborator(c2, c2)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_reassign_after_rejection() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let c1 = h.collaborator().await;

    let first = h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();
    h.core
        .assignments
        .respond(c1, first[0].assignment_id, Decision::Reject)
        .await
        .unwrap();
    h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();
}

#[tokio::test]
async fn test_assign_validation() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let requester = h.requester().await;
    let c1 = h.collaborator().await;

    assert!(matches!(
        h.core.assignments.assign(h.admin, req, &[]).await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        h.core.assignments.assign(h.admin, req, &[c1, c1]).await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        h.core.assignments.assign(h.admin, req, &[requester]).await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        h.core.assignments.assign(c1, req, &[c1]).await,
        Err(CoreError::Unauthorized(_))
    ));

    h.core.requests.cancel(h.admin, req, "withdrawn").await.unwrap();
    assert!(matches!(
        h.core.assignments.assign(h.admin, req, &[c1]).await,
        Err(CoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_only_assignee_responds() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let (c1, c2) = (h.collaborator().await, h.collaborator().await);
    let batch = h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();

    let err = h
        .core
        .assignments
        .respond(c2, batch[0].assignment_id, Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
}

#[tokio::test]
async fn test_accept_on_cancelled_request_conflicts() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let c1 = h.collaborator().await;
    let batch = h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();
    h.core.requests.cancel(h.admin, req, "withdrawn").await.unwrap();

    let err = h
        .core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    // Declining is still possible
    h.core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Reject)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_allow_multiple_acceptances() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let (c1, c2) = (h.collaborator().await, h.collaborator().await);
    let batch = h.core.assignments.assign(h.admin, req, &[c1, c2]).await.unwrap();

    for (collab, a) in [c1, c2].into_iter().zip(&batch) {
        h.core
            .assignments
            .respond(collab, a.assignment_id, Decision::Accept)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_claim_exclusive_blocks_second_acceptance() {
    let h = harness(exclusive_config()).await;
    let req = paid_request(&h).await;
    let (c1, c2) = (h.collaborator().await, h.collaborator().await);
    let batch = h.core.assignments.assign(h.admin, req, &[c1, c2]).await.unwrap();

    h.core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Accept)
        .await
        .unwrap();
    let err = h
        .core
        .assignments
        .respond(c2, batch[1].assignment_id, Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let second = h.core.assignments.list_for_collaborator(c2, c2).await.unwrap();
    assert_eq!(second[0].status, AssignmentStatus::Pending);
    h.core
        .assignments
        .respond(c2, batch[1].assignment_id, Decision::Reject)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reassigning_accepted_collaborator_conflicts() {
    let h = harness(zero_bonus_config()).await;
    let req = paid_request(&h).await;
    let c1 = h.collaborator().await;
    let batch = h.core.assignments.assign(h.admin, req, &[c1]).await.unwrap();
    h.core
        .assignments
        .respond(c1, batch[0].assignment_id, Decision::Accept)
        .await
        .unwrap();

    assert!(matches!(
        h.core.assignments.assign(h.admin, req, &[c1]).await,
        Err(CoreError::Conflict(_))
    ));
}
