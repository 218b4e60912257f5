mod common;

use common::{harness, zero_bonus_config};
use credit_ledger::{
    CoreError, Decision, EntryReason, FailurePoint, NewRequest, RequestStatus, Role,
};
use rust_decimal_macros::dec;

fn new_request(client_ref: Option<&str>) -> NewRequest {
    NewRequest {
        service_kind: "mixing".into(),
        description: "stems attached".into(),
        cost: dec!(1.5),
        client_ref: client_ref.map(str::to_string),
    }
}

#[tokio::test]
async fn test_full_lifecycle_with_results() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;
    let req = h.core.requests.create(user, new_request(None)).await.unwrap();

    let started = h.core.requests.start(h.admin, req.request_id).await.unwrap();
    assert_eq!(started.status, RequestStatus::InProgress);

    let err = h.core.requests.complete(h.admin, req.request_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let with_result = h
        .core
        .requests
        .attach_result(h.admin, req.request_id, "final mix.wav", b"RIFF".to_vec())
        .await
        .unwrap();
    assert_eq!(with_result.result_refs.len(), 1);
    assert!(with_result.result_refs[0].as_str().ends_with("final_mix.wav"));

    let done = h.core.requests.complete(h.admin, req.request_id).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert_eq!(h.balance(user).await, dec!(3.5));

    let bytes = h
        .core
        .requests
        .download_result(user, req.request_id, &done.result_refs[0])
        .await
        .unwrap();
    assert_eq!(bytes, b"RIFF".to_vec());

    let err = h
        .core
        .requests
        .cancel(h.admin, req.request_id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let titles: Vec<String> = h
        .notifier
        .for_account(user)
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(titles, vec!["Request in progress", "Request completed"]);
    h.assert_reconciled(user).await;
}

#[tokio::test]
async fn test_invalid_transitions_conflict() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;
    let req = h.core.requests.create(user, new_request(None)).await.unwrap();

    let err = h.core.requests.complete(h.admin, req.request_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    let err = h
        .core
        .requests
        .attach_result(h.admin, req.request_id, "a.wav", b"x".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert!(h.blobs.is_empty());

    h.core.requests.start(h.admin, req.request_id).await.unwrap();
    let err = h.core.requests.start(h.admin, req.request_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn test_owner_cancels_only_pending() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;

    let first = h.core.requests.create(user, new_request(None)).await.unwrap();
    h.core
        .requests
        .cancel(user, first.request_id, "ordered by mistake")
        .await
        .unwrap();
    assert_eq!(h.balance(user).await, dec!(5));

    let second = h.core.requests.create(user, new_request(None)).await.unwrap();
    h.core.requests.start(h.admin, second.request_id).await.unwrap();
    let err = h
        .core
        .requests
        .cancel(user, second.request_id, "changed mind")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));

    h.core
        .requests
        .cancel(h.admin, second.request_id, "artist unavailable")
        .await
        .unwrap();
    assert_eq!(h.balance(user).await, dec!(5));
    h.assert_reconciled(user).await;
}

#[tokio::test]
async fn test_cancel_requires_reason() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;
    let req = h.core.requests.create(user, new_request(None)).await.unwrap();

    let err = h
        .core
        .requests
        .cancel(h.admin, req.request_id, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(h.balance(user).await, dec!(3.5));
}

#[tokio::test]
async fn test_other_users_are_unauthorized() {
    let h = harness(zero_bonus_config()).await;
    let owner = h.requester().await;
    let stranger = h.requester().await;
    h.fund(owner, dec!(5)).await;
    let req = h.core.requests.create(owner, new_request(None)).await.unwrap();

    let err = h.core.requests.get(stranger, req.request_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
    let err = h
        .core
        .requests
        .cancel(stranger, req.request_id, "mine now")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
    let err = h.core.requests.start(owner, req.request_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));

    let collab = h.collaborator().await;
    let err = h
        .core
        .requests
        .create(collab, new_request(None))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));

    let ghost = credit_ledger::AccountId::new();
    let err = h.core.requests.get(ghost, req.request_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));
}

#[tokio::test]
async fn test_create_with_client_ref_is_idempotent() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;

    let first = h
        .core
        .requests
        .create(user, new_request(Some("order-7")))
        .await
        .unwrap();
    let retry = h
        .core
        .requests
        .create(user, new_request(Some("order-7")))
        .await
        .unwrap();
    assert_eq!(first.request_id, retry.request_id);
    assert_eq!(h.balance(user).await, dec!(3.5));
    assert_eq!(h.core.requests.list_for_owner(user, user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lost_create_response_retried_with_client_ref() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;

    h.store.fail_next(FailurePoint::AfterCommit);
    let err = h
        .core
        .requests
        .create(user, new_request(Some("order-8")))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let retry = h
        .core
        .requests
        .create(user, new_request(Some("order-8")))
        .await
        .unwrap();
    assert_eq!(retry.status, RequestStatus::Pending);
    assert_eq!(h.balance(user).await, dec!(3.5));
    h.assert_reconciled(user).await;
}

#[tokio::test]
async fn test_failed_create_leaves_no_trace() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;

    h.store.fail_next(FailurePoint::BeforeCommit);
    let err = h.core.requests.create(user, new_request(None)).await.unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert_eq!(h.balance(user).await, dec!(5));
    assert!(h.core.requests.list_for_owner(user, user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_accepted_collaborator_uploads_results() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    let collab = h.collaborator().await;
    let outsider = h.collaborator().await;
    h.fund(user, dec!(5)).await;
    let req = h.core.requests.create(user, new_request(None)).await.unwrap();

    let assignments = h
        .core
        .assignments
        .assign(h.admin, req.request_id, &[collab])
        .await
        .unwrap();
    h.core
        .assignments
        .respond(collab, assignments[0].assignment_id, Decision::Accept)
        .await
        .unwrap();
    h.core.requests.start(h.admin, req.request_id).await.unwrap();

    let err = h
        .core
        .requests
        .attach_result(outsider, req.request_id, "x.wav", b"x".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unauthorized(_)));

    let updated = h
        .core
        .requests
        .attach_result(collab, req.request_id, "take1.wav", b"audio".to_vec())
        .await
        .unwrap();
    assert_eq!(updated.result_refs.len(), 1);
    assert!(h.core.requests.get(collab, req.request_id).await.is_ok());
}

#[tokio::test]
async fn test_list_by_status_is_admin_only() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(5)).await;
    h.core.requests.create(user, new_request(None)).await.unwrap();

    let pending = h
        .core
        .requests
        .list_by_status(h.admin, RequestStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert!(matches!(
        h.core.requests.list_by_status(user, RequestStatus::Pending).await,
        Err(CoreError::Unauthorized(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_cancels_refund_once() {
    let h = harness(zero_bonus_config()).await;
    let user = h.signup("Requester", &[Role::Requester]).await;
    h.fund(user, dec!(2)).await;

    for _ in 0..20 {
        let req = h
            .core
            .requests
            .create(user, new_request(None))
            .await
            .unwrap();
        let (a, b) = (h.core.clone(), h.core.clone());
        let (admin, id) = (h.admin, req.request_id);
        let first = tokio::spawn(async move { a.requests.cancel(admin, id, "race one").await });
        let second = tokio::spawn(async move { b.requests.cancel(admin, id, "race two").await });
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(CoreError::Conflict(_))))
        );
        assert_eq!(h.balance(user).await, dec!(2));
    }
    h.assert_reconciled(user).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_never_overdraw() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(10)).await;

    // 12 x 1.5 = 18 credits asked of a balance of 10
    let handles: Vec<_> = (0..12)
        .map(|_| {
            let core = h.core.clone();
            tokio::spawn(async move { core.requests.create(user, new_request(None)).await })
        })
        .collect();
    let mut created = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(CoreError::InsufficientBalance { .. }) => refused += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(created, 6);
    assert_eq!(refused, 6);
    assert_eq!(h.balance(user).await, dec!(1));
    let open = h.core.requests.list_for_owner(user, user).await.unwrap();
    assert_eq!(open.len(), 6);
    h.assert_reconciled(user).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adjustments_lose_no_updates() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let core = h.core.clone();
            tokio::spawn(async move {
                core.ledger
                    .adjust(user, dec!(0.25), EntryReason::ManualAdjustment, &format!("topup:{}", i))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.balance(user).await, dec!(12.5));
    let history = h.core.ledger.history(user).await.unwrap();
    assert_eq!(history.len(), 50);
    assert_eq!(history.last().unwrap().balance_after, dec!(12.5));
    h.assert_reconciled(user).await;
}
