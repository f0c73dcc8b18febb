mod common;

use anyhow::Result;
use common::{assert_consistent, funded_user, test_service};
use taskwallet::application::{AppError, TaskCompletion};
use taskwallet::domain::{TransactionStatus, TransactionType};
use tokio::task::JoinSet;

#[tokio::test]
async fn test_credit_appends_one_completed_row() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let entry = service
        .credit("ada", 25, TransactionType::Earning, "Survey")
        .await?;

    assert_eq!(entry.amount_cents, 25);
    assert_eq!(entry.status, TransactionStatus::Completed);
    assert_eq!(service.get_balance("ada").await?, 125);

    let log = service.list_transactions("ada", None).await?;
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].id, entry.id);
    assert!(log[0].sequence < log[1].sequence);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_debit_over_balance_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let err = service
        .debit("ada", 150, TransactionType::Adjustment, "Too much")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::InsufficientBalance {
            balance: 100,
            required: 150
        }
    ));
    assert_eq!(service.get_balance("ada").await?, 100);
    assert_eq!(service.list_transactions("ada", None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_debit_records_negative_row() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let entry = service
        .debit("ada", 40, TransactionType::Adjustment, "Correction")
        .await?;
    assert_eq!(entry.amount_cents, -40);
    assert_eq!(service.get_balance("ada").await?, 60);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_amounts_must_be_positive() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    for amount in [0, -5] {
        let err = service
            .credit("ada", amount, TransactionType::Earning, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
        let err = service
            .debit("ada", amount, TransactionType::Adjustment, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
    }
    assert_eq!(service.get_balance("ada").await?, 100);
    Ok(())
}

#[tokio::test]
async fn test_unknown_user_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service
        .credit("ghost", 10, TransactionType::Earning, "x")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { kind: "Profile", .. }));

    let err = service
        .debit("ghost", 10, TransactionType::Adjustment, "x")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_profile_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service
        .create_profile("u1", "ada", "ada@example.com", None)
        .await?;

    let err = service
        .create_profile("u2", "ada", "other@example.com", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UsernameTaken(_)));

    let err = service
        .create_profile("u1", "grace", "grace@example.com", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProfileAlreadyExists(_)));

    let profile = service.find_profile("ada").await?;
    assert_eq!(profile.id, "u1");
    assert_eq!(profile.referral_code, "ADA");
    assert_eq!(service.list_profiles().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_usernames_ignore_case() -> Result<()> {
    let (service, _temp) = test_service().await?;
    service
        .create_profile("u1", "alice", "alice@example.com", None)
        .await?;

    let err = service
        .create_profile("u2", "Alice", "other@example.com", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UsernameTaken(ref name) if name == "Alice"));
    assert!(err.to_string().contains("ignore case"));

    assert_eq!(service.find_profile("ALICE").await?.id, "u1");
    assert_eq!(service.list_profiles().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_credit_past_integer_range_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", i64::MAX - 5).await?;

    let err = service
        .credit("ada", 10, TransactionType::Earning, "Survey")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = service
        .mark_task_completed("ada", "survey-1", 10)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));
    assert!(!service.is_task_completed("ada", "survey-1").await?);

    assert_eq!(service.get_balance("ada").await?, i64::MAX - 5);
    assert_eq!(service.list_transactions("ada", None).await?.len(), 1);
    assert_consistent(&service, "ada").await?;

    // Filling the balance exactly to the limit still works
    service.deposit("ada", 5, "top-up").await?;
    assert_eq!(service.get_balance("ada").await?, i64::MAX);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_mark_task_completed_credits_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;

    let first = service.mark_task_completed("ada", "survey-42", 75).await?;
    assert!(first.was_credited());

    let second = service.mark_task_completed("ada", "survey-42", 75).await?;
    assert_eq!(second, TaskCompletion::AlreadyCompleted);

    assert_eq!(service.get_balance("ada").await?, 75);
    assert_eq!(service.list_transactions("ada", None).await?.len(), 1);
    assert!(service.is_task_completed("ada", "survey-42").await?);
    assert_eq!(service.list_completed_tasks("ada").await?, vec!["survey-42"]);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_task_completion_pays_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let service = service.clone();
        tasks.spawn(async move { service.mark_task_completed("ada", "daily-checkin", 50).await });
    }

    let mut credited = 0;
    while let Some(result) = tasks.join_next().await {
        if result??.was_credited() {
            credited += 1;
        }
    }

    assert_eq!(credited, 1);
    assert_eq!(service.get_balance("ada").await?, 50);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let service = service.clone();
        tasks.spawn(async move {
            service
                .debit("ada", 30, TransactionType::Adjustment, "race")
                .await
        });
    }

    let mut succeeded = 0;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientBalance { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(service.get_balance("ada").await?, 10);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_list_transactions_limit_returns_newest_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;
    for amount in [10, 20, 30] {
        service
            .credit("ada", amount, TransactionType::Earning, "task")
            .await?;
    }

    let recent = service.list_transactions("ada", Some(2)).await?;
    let amounts: Vec<_> = recent.iter().map(|t| t.amount_cents).collect();
    assert_eq!(amounts, vec![30, 20]);

    let fetched = service.get_transaction(recent[0].id).await?;
    assert_eq!(fetched.amount_cents, 30);
    Ok(())
}

#[tokio::test]
async fn test_check_all_reports_healthy_ledger() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 500).await?;
    funded_user(&service, "bob", 0).await?;
    service
        .debit("ada", 120, TransactionType::Adjustment, "fee")
        .await?;

    let report = service.check_all().await?;
    assert_eq!(report.profiles_checked, 2);
    assert_eq!(report.transactions_checked, 2);
    assert!(report.is_healthy());
    Ok(())
}

#[tokio::test]
async fn test_earnings_summary_groups_by_type() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;
    service.deposit("ada", 1000, "bank-ref-1").await?;
    service.mark_task_completed("ada", "t1", 200).await?;
    service.mark_task_completed("ada", "t2", 100).await?;
    service
        .debit("ada", 50, TransactionType::Adjustment, "fee")
        .await?;

    let report = service.earnings_summary("ada").await?;
    assert_eq!(report.balance, 1250);
    assert!(report.is_consistent());
    assert_eq!(report.total_earned, 300);
    assert_eq!(report.by_type.get("DEPOSIT"), Some(&1000));
    assert_eq!(report.by_type.get("EARNING"), Some(&300));
    assert_eq!(report.by_type.get("ADJUSTMENT"), Some(&-50));
    assert_eq!(report.total_spent(), 50);
    assert_eq!(report.completed_tasks, 2);
    assert_eq!(report.transaction_count, 4);
    Ok(())
}
