mod common;

use anyhow::Result;
use common::{funded_user, mobile_money, test_service};
use taskwallet::io::{Exporter, WalletSnapshot};

#[tokio::test]
async fn test_export_transactions_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    service.withdraw("ada", 60, mobile_money()).await?;

    let mut buffer = Vec::new();
    let count = Exporter::new(&service)
        .export_transactions_csv("ada", &mut buffer)
        .await?;
    assert_eq!(count, 2);

    let csv = String::from_utf8(buffer)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("id,sequence,timestamp,type,status,amount_cents"));
    assert!(lines[1].contains(",EARNING,completed,100,"));
    assert!(lines[2].contains(",WITHDRAWAL,pending,-60,"));
    // Account numbers are masked
    assert!(lines[2].contains("****3456"));
    assert!(!lines[2].contains("0700123456"));
    Ok(())
}

#[tokio::test]
async fn test_export_withdrawals_csv() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    let result = service.withdraw("ada", 25, mobile_money()).await?;
    service.settle_withdrawal(result.request.id, true).await?;

    let mut buffer = Vec::new();
    let count = Exporter::new(&service)
        .export_withdrawals_csv(Some("ada"), &mut buffer)
        .await?;
    assert_eq!(count, 1);
    let csv = String::from_utf8(buffer)?;
    assert!(csv.contains(",ada,25,approved,"));
    Ok(())
}

#[tokio::test]
async fn test_export_snapshot_json() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "ada", 100).await?;
    service.mark_task_completed("ada", "survey-1", 20).await?;
    service.withdraw("ada", 30, mobile_money()).await?;

    let mut buffer = Vec::new();
    let snapshot = Exporter::new(&service)
        .export_snapshot_json("ada", &mut buffer)
        .await?;
    assert_eq!(snapshot.transactions.len(), 3);
    assert_eq!(snapshot.withdrawals.len(), 1);
    assert_eq!(snapshot.completed_tasks, vec!["survey-1"]);
    assert!(snapshot.balance_check.is_consistent());

    let parsed: WalletSnapshot = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed.profile.balance_cents, 90);
    assert_eq!(parsed.transactions[2].tx_type.as_str(), "WITHDRAWAL");
    Ok(())
}
