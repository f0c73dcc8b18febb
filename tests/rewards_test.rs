mod common;

use anyhow::Result;
use common::{assert_consistent, day, funded_user, test_config, test_service, test_service_with};
use taskwallet::application::AppError;
use taskwallet::domain::{JobPlan, TransactionType};
use taskwallet::settings::LedgerConfig;

// ========================
// Referrals
// ========================

#[tokio::test]
async fn test_referral_pays_referrer_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;
    funded_user(&service, "bob", 0).await?;

    let result = service.apply_referral("bob", "ada").await?;
    assert_eq!(result.referrer_id, "ada");
    let bonus = result.bonus.expect("bonus row");
    assert_eq!(bonus.tx_type, TransactionType::ReferralBonus);
    assert_eq!(bonus.amount_cents, 500);

    assert_eq!(service.get_balance("ada").await?, 500);
    assert_eq!(service.get_profile("bob").await?.referred_by.as_deref(), Some("ada"));

    let err = service.apply_referral("bob", "ADA").await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyReferred(_)));
    assert_eq!(service.get_balance("ada").await?, 500);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_self_and_unknown_referrals_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;

    let err = service.apply_referral("ada", "ADA").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidOperation(_)));

    let err = service.apply_referral("ada", "NOBODY").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { kind: "Referral code", .. }));

    assert_eq!(service.get_profile("ada").await?.referred_by, None);
    assert_eq!(service.get_balance("ada").await?, 0);
    Ok(())
}

// ========================
// Ads
// ========================

#[tokio::test]
async fn test_ad_rewards_are_capped_per_day() -> Result<()> {
    let config = LedgerConfig {
        ad_reward: 10,
        max_ads_per_day: 3,
        ..test_config()
    };
    let (service, _temp) = test_service_with(config).await?;
    funded_user(&service, "ada", 0).await?;
    let monday = day("2024-05-06");

    for _ in 0..3 {
        service.reward_ad_watch("ada", monday).await?;
    }
    let err = service.reward_ad_watch("ada", monday).await.unwrap_err();
    assert!(matches!(err, AppError::DailyLimitReached { limit: 3 }));
    assert_eq!(service.get_balance("ada").await?, 30);

    // The counter resets on the first watch of a new day
    let tuesday = day("2024-05-07");
    service.reward_ad_watch("ada", tuesday).await?;
    let profile = service.get_profile("ada").await?;
    assert_eq!(profile.ads_watched_on(tuesday), 1);
    assert_eq!(profile.balance_cents, 40);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_ad_reward_past_integer_range_is_rejected() -> Result<()> {
    let config = LedgerConfig {
        ad_reward: 10,
        ..test_config()
    };
    let (service, _temp) = test_service_with(config).await?;
    funded_user(&service, "ada", i64::MAX - 5).await?;
    let monday = day("2024-05-06");

    let err = service.reward_ad_watch("ada", monday).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let profile = service.get_profile("ada").await?;
    assert_eq!(profile.balance_cents, i64::MAX - 5);
    assert_eq!(profile.ads_watched_on(monday), 0);
    assert_consistent(&service, "ada").await?;
    Ok(())
}

// ========================
// Job plans
// ========================

#[tokio::test]
async fn test_subscribe_charges_plan_price() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 1000).await?;
    let start = day("2024-05-01");

    let sub = service
        .subscribe_job_plan("ada", JobPlan::Basic, start)
        .await?;
    assert_eq!(sub.expiry_date, day("2024-05-31"));
    assert_eq!(service.get_balance("ada").await?, 500);

    let err = service
        .subscribe_job_plan("ada", JobPlan::Premium, start)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { .. }));
    assert_eq!(
        service.get_profile("ada").await?.job_subscription.map(|s| s.plan),
        Some(JobPlan::Basic)
    );
    assert_consistent(&service, "ada").await?;
    Ok(())
}

#[tokio::test]
async fn test_applications_need_active_subscription() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 1000).await?;

    let err = service
        .submit_application("ada", "job-1", "Data entry", day("2024-05-01"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SubscriptionRequired { expired_on: None }));

    service
        .subscribe_job_plan("ada", JobPlan::Basic, day("2024-05-01"))
        .await?;
    let err = service
        .submit_application("ada", "job-1", "Data entry", day("2024-06-01"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::SubscriptionRequired {
            expired_on: Some(_)
        }
    ));

    // Inclusive expiry day
    service
        .submit_application("ada", "job-1", "Data entry", day("2024-05-31"))
        .await?;
    assert_eq!(service.list_applications("ada").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_daily_application_limit_and_lazy_reset() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 1000).await?;
    let first = day("2024-05-01");
    service
        .subscribe_job_plan("ada", JobPlan::Basic, first)
        .await?;

    for i in 0..5 {
        service
            .submit_application("ada", &format!("job-{}", i), "Role", first)
            .await?;
    }
    let err = service
        .submit_application("ada", "job-5", "Role", first)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DailyLimitReached { limit: 5 }));

    let sub = service.get_job_subscription("ada", first).await?.unwrap();
    assert_eq!(sub.applications_on(first), 5);
    assert_eq!(sub.remaining_today(first), Some(0));

    // Reading on a new day resets the stored counter
    let second = day("2024-05-02");
    let sub = service.get_job_subscription("ada", second).await?.unwrap();
    assert_eq!(sub.applications_today, 0);
    assert_eq!(sub.last_application_date, Some(second));
    assert_eq!(sub.remaining_today(second), Some(5));

    service
        .submit_application("ada", "job-5", "Role", second)
        .await?;
    assert_eq!(service.list_applications("ada").await?.len(), 6);
    Ok(())
}

#[tokio::test]
async fn test_premium_plan_is_unlimited() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 5000).await?;
    let today = day("2024-05-01");
    service
        .subscribe_job_plan("ada", JobPlan::Premium, today)
        .await?;

    for i in 0..20 {
        service
            .submit_application("ada", &format!("job-{}", i), "Role", today)
            .await?;
    }
    let sub = service.get_job_subscription("ada", today).await?.unwrap();
    assert_eq!(sub.remaining_today(today), None);
    Ok(())
}

// ========================
// Wallet pin
// ========================

#[tokio::test]
async fn test_wallet_pin_lifecycle() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 0).await?;

    // Unset pin always unlocks
    assert!(service.verify_wallet_pin("ada", "0000").await?);

    let err = service.set_wallet_pin("ada", "12a4").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidPin));

    service.set_wallet_pin("ada", "1234").await?;
    assert!(service.get_profile("ada").await?.wallet_locked());
    assert!(service.verify_wallet_pin("ada", "1234").await?);
    assert!(!service.verify_wallet_pin("ada", "4321").await?);

    service.skip_wallet_pin("ada").await?;
    assert!(!service.get_profile("ada").await?.wallet_locked());
    assert!(service.verify_wallet_pin("ada", "9999").await?);

    service.clear_wallet_pin("ada").await?;
    assert_eq!(service.get_profile("ada").await?.wallet_pin, None);

    let err = service.set_wallet_pin("ghost", "1234").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
    Ok(())
}
