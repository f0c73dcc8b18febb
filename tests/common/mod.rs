// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::NaiveDate;
use taskwallet::application::LedgerService;
use taskwallet::domain::{Cents, PayoutMethod, TransactionType, WithdrawalDestination};
use taskwallet::settings::LedgerConfig;
use tempfile::TempDir;

/// Config used by the tests: small amounts are allowed to leave the wallet.
pub fn test_config() -> LedgerConfig {
    LedgerConfig {
        min_withdrawal: 1,
        ..LedgerConfig::default()
    }
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(test_config()).await
}

pub async fn test_service_with(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap(), config).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a YYYY-MM-DD string
pub fn day(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

pub fn mobile_money() -> WithdrawalDestination {
    WithdrawalDestination::new(PayoutMethod::MobileMoney, "Ada Lovelace", "0700123456")
        .with_institution("M-Pesa")
}

/// Create a profile and fund it with `balance` cents of earnings.
pub async fn funded_user(service: &LedgerService, id: &str, balance: Cents) -> Result<()> {
    service
        .create_profile(id, id, &format!("{}@example.com", id), None)
        .await?;
    if balance > 0 {
        service
            .credit(id, balance, TransactionType::Earning, "Opening balance")
            .await?;
    }
    Ok(())
}

/// Assert the stored balance equals the sum of non-failed ledger rows.
pub async fn assert_consistent(service: &LedgerService, id: &str) -> Result<()> {
    let check = service.check_integrity(id).await?;
    assert!(
        check.is_consistent(),
        "balance {} != ledger {} for {}",
        check.stored_balance,
        check.ledger_balance,
        id
    );
    Ok(())
}
