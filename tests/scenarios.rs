//! End-to-end scenarios over the in-memory store

mod common;

use common::{harness, zero_bonus_config};
use credit_ledger::{CoreError, FundingStatus, NewRequest, Role, RequestStatus};
use rust_decimal_macros::dec;

fn mastering(cost: rust_decimal::Decimal) -> NewRequest {
    NewRequest {
        service_kind: "mastering".into(),
        description: "one track".into(),
        cost,
        client_ref: None,
    }
}

#[tokio::test]
async fn scenario_a_insufficient_balance_creates_nothing() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    assert_eq!(h.balance(user).await, dec!(0));

    let err = h.core.requests.create(user, mastering(dec!(1.5))).await.unwrap_err();
    assert!(matches!(err, CoreError::InsufficientBalance { .. }));

    assert_eq!(h.balance(user).await, dec!(0));
    assert!(h.core.requests.list_for_owner(user, user).await.unwrap().is_empty());
    assert!(h.core.ledger.history(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_b_create_debits_cost() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(2.0)).await;

    let request = h.core.requests.create(user, mastering(dec!(1.5))).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(h.balance(user).await, dec!(0.5));
    h.assert_reconciled(user).await;
}

#[tokio::test]
async fn scenario_c_cancel_refunds_once() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;
    h.fund(user, dec!(2.0)).await;
    let request = h.core.requests.create(user, mastering(dec!(1.5))).await.unwrap();

    let cancelled = h
        .core
        .requests
        .cancel(h.admin, request.request_id, "customer changed mind")
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("customer changed mind")
    );
    assert_eq!(h.balance(user).await, dec!(2.0));

    let again = h
        .core
        .requests
        .cancel(h.admin, request.request_id, "again")
        .await
        .unwrap_err();
    assert!(matches!(again, CoreError::Conflict(_)));
    assert_eq!(h.balance(user).await, dec!(2.0));

    let notices = h.notifier.for_account(user);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Request cancelled");
    h.assert_reconciled(user).await;
}

#[tokio::test]
async fn scenario_d_deposit_credits_at_rate() {
    let h = harness(zero_bonus_config()).await;
    let user = h.requester().await;

    let deposit = h
        .core
        .deposits
        .create(user, dec!(1500), "receipt.pdf", b"%PDF".to_vec())
        .await
        .unwrap();
    assert_eq!(deposit.credited_amount, dec!(10));
    assert_eq!(deposit.status, FundingStatus::Pending);
    assert_eq!(h.balance(user).await, dec!(0));

    let approved = h.core.deposits.approve(h.admin, deposit.deposit_id).await.unwrap();
    assert_eq!(approved.status, FundingStatus::Approved);
    assert!(approved.decided_at.is_some());
    assert_eq!(h.balance(user).await, dec!(10.0));

    let err = h
        .core
        .deposits
        .reject(h.admin, deposit.deposit_id, "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(h.balance(user).await, dec!(10.0));
    h.assert_reconciled(user).await;
}

#[tokio::test]
async fn scenario_e_withdrawal_above_max_rejected() {
    let h = harness(zero_bonus_config()).await;
    let collab = h.signup("Collaborator", &[Role::Collaborator]).await;
    h.fund(collab, dec!(500)).await;

    let err = h
        .core
        .withdrawals
        .create(collab, dec!(20000), "AO06 0040 0000 1234")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(
        h.core
            .withdrawals
            .list_for_account(collab, collab)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.balance(collab).await, dec!(500));
}

#[tokio::test]
async fn signup_grants_configured_bonus() {
    let h = harness(credit_ledger::AppConfig::default()).await;
    let user = h.requester().await;
    assert_eq!(h.balance(user).await, dec!(1.5));

    let history = h.core.ledger.history(user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].idempotency_key, format!("signup:{}", user));
    h.assert_reconciled(user).await;
}
