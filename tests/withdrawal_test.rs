mod common;

use anyhow::Result;
use common::{assert_consistent, funded_user, mobile_money, test_service, test_service_with, test_config};
use taskwallet::application::AppError;
use taskwallet::domain::{
    PayoutMethod, TransactionStatus, TransactionType, WithdrawalDestination, WithdrawalStatus,
};
use taskwallet::settings::LedgerConfig;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_withdraw_debits_and_opens_request() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let result = service.withdraw("ada", 60, mobile_money()).await?;

    assert_eq!(service.get_balance("ada").await?, 40);
    assert_eq!(result.transaction.tx_type, TransactionType::Withdrawal);
    assert_eq!(result.transaction.status, TransactionStatus::Pending);
    assert_eq!(result.transaction.amount_cents, -60);
    assert_eq!(result.request.amount_cents, 60);
    assert_eq!(result.request.status, WithdrawalStatus::Pending);
    assert_eq!(result.request.transaction_id, result.transaction.id);

    let stored = service.get_transaction(result.transaction.id).await?;
    assert_eq!(stored.destination, Some(mobile_money()));
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_withdraw_saves_destination() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    service.withdraw("ada", 10, mobile_money()).await?;

    let profile = service.get_profile("ada").await?;
    assert_eq!(profile.saved_withdrawal_details, Some(mobile_money()));
    Ok(())
}

#[tokio::test]
async fn test_withdraw_over_balance_changes_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let err = service.withdraw("ada", 150, mobile_money()).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { balance: 100, .. }));

    assert_eq!(service.get_balance("ada").await?, 100);
    assert!(service.list_withdrawals(None, Some("ada")).await?.is_empty());
    assert_eq!(service.get_profile("ada").await?.saved_withdrawal_details, None);
    Ok(())
}

#[tokio::test]
async fn test_withdraw_enforces_minimum_and_destination() -> Result<()> {
    let config = LedgerConfig {
        min_withdrawal: 500,
        ..test_config()
    };
    let (service, _temp) = test_service_with(config).await?;
    funded_user(&service, "ada", 1000).await?;

    let err = service.withdraw("ada", 499, mobile_money()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let incomplete = WithdrawalDestination::new(PayoutMethod::Paypal, "Ada", "  ");
    let err = service.withdraw("ada", 500, incomplete).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidOperation(_)));

    assert_eq!(service.get_balance("ada").await?, 1000);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_exactly_one_succeeds() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let mut tasks = JoinSet::new();
    for _ in 0..2 {
        let service = service.clone();
        tasks.spawn(async move { service.withdraw("ada", 60, mobile_money()).await });
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientBalance { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((succeeded, insufficient), (1, 1));
    assert_eq!(service.get_balance("ada").await?, 40);
    assert_eq!(service.list_withdrawals(None, Some("ada")).await?.len(), 1);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_approve_withdrawal_completes_row() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    let result = service.withdraw("ada", 60, mobile_money()).await?;

    let request = service.settle_withdrawal(result.request.id, true).await?;

    assert_eq!(request.status, WithdrawalStatus::Approved);
    assert!(request.settled_at.is_some());
    let row = service.get_transaction(result.transaction.id).await?;
    assert_eq!(row.status, TransactionStatus::Completed);
    assert_eq!(service.get_balance("ada").await?, 40);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_reject_withdrawal_refunds_and_fails_row() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    let result = service.withdraw("ada", 60, mobile_money()).await?;

    let request = service.settle_withdrawal(result.request.id, false).await?;

    assert_eq!(request.status, WithdrawalStatus::Rejected);
    let row = service.get_transaction(result.transaction.id).await?;
    assert_eq!(row.status, TransactionStatus::Failed);
    assert_eq!(service.get_balance("ada").await?, 100);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_refund_that_would_overflow_leaves_request_pending() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    let result = service.withdraw("ada", 60, mobile_money()).await?;
    service
        .credit("ada", i64::MAX - 70, TransactionType::Earning, "Jackpot")
        .await?;

    let err = service
        .settle_withdrawal(result.request.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let request = service.get_withdrawal(result.request.id).await?;
    assert_eq!(request.status, WithdrawalStatus::Pending);
    let row = service.get_transaction(result.transaction.id).await?;
    assert_eq!(row.status, TransactionStatus::Pending);
    assert_eq!(service.get_balance("ada").await?, i64::MAX - 30);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_settlement_happens_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    let result = service.withdraw("ada", 60, mobile_money()).await?;

    service.settle_withdrawal(result.request.id, false).await?;
    let err = service
        .settle_withdrawal(result.request.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyCompleted(_)));

    let err = service
        .settle_withdrawal(result.request.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyCompleted(_)));

    // Refunded exactly once
    assert_eq!(service.get_balance("ada").await?, 100);
    assert_consistent(&service, "ada").await?;

    let err = service
        .settle_withdrawal(uuid::Uuid::new_v4(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { kind: "Withdrawal", .. }));
    Ok(())
}

#[tokio::test]
async fn test_list_withdrawals_filters_by_status() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    funded_user(&service, "bob", 100).await?;

    let first = service.withdraw("ada", 10, mobile_money()).await?;
    service.withdraw("ada", 20, mobile_money()).await?;
    service.withdraw("bob", 30, mobile_money()).await?;
    service.settle_withdrawal(first.request.id, true).await?;

    let pending = service
        .list_withdrawals(Some(WithdrawalStatus::Pending), None)
        .await?;
    assert_eq!(pending.len(), 2);

    let ada_pending = service
        .list_withdrawals(Some(WithdrawalStatus::Pending), Some("ada"))
        .await?;
    assert_eq!(ada_pending.len(), 1);
    assert_eq!(ada_pending[0].amount_cents, 20);

    let approved = service
        .list_withdrawals(Some(WithdrawalStatus::Approved), None)
        .await?;
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, first.request.id);
    Ok(())
}
