use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{
    BalanceCheck, Campaign, JobApplication, Transaction, UserProfile, WithdrawalRequest,
};

/// Snapshot of one user's wallet for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub profile: UserProfile,
    pub balance_check: BalanceCheck,
    pub transactions: Vec<Transaction>,
    pub withdrawals: Vec<WithdrawalRequest>,
    pub campaigns: Vec<Campaign>,
    pub applications: Vec<JobApplication>,
    pub completed_tasks: Vec<String>,
}

/// Exporter for a user's ledger data
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export the user's transaction log to CSV, in commit order
    pub async fn export_transactions_csv<W: Write>(&self, user_id: &str, writer: W) -> Result<usize> {
        let transactions = self.service.list_transactions(user_id, None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "timestamp",
            "type",
            "status",
            "amount_cents",
            "description",
            "destination",
        ])?;

        for tx in &transactions {
            csv_writer.write_record([
                tx.id.to_string(),
                tx.sequence.to_string(),
                tx.timestamp.to_rfc3339(),
                tx.tx_type.as_str().to_string(),
                tx.status.as_str().to_string(),
                tx.amount_cents.to_string(),
                tx.description.clone(),
                tx.destination
                    .as_ref()
                    .map(|d| d.summary())
                    .unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export withdrawal requests to CSV, optionally for one user
    pub async fn export_withdrawals_csv<W: Write>(
        &self,
        user_id: Option<&str>,
        writer: W,
    ) -> Result<usize> {
        let requests = self.service.list_withdrawals(None, user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "user_id",
            "amount_cents",
            "status",
            "destination",
            "created_at",
            "settled_at",
        ])?;

        for request in &requests {
            csv_writer.write_record([
                request.id.to_string(),
                request.user_id.clone(),
                request.amount_cents.to_string(),
                request.status.as_str().to_string(),
                request.destination.summary(),
                request.created_at.to_rfc3339(),
                request
                    .settled_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(requests.len())
    }

    /// Export the user's wallet as a JSON snapshot
    pub async fn export_snapshot_json<W: Write>(
        &self,
        user_id: &str,
        mut writer: W,
    ) -> Result<WalletSnapshot> {
        let profile = self.service.get_profile(user_id).await?;
        let snapshot = WalletSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            balance_check: self.service.check_integrity(user_id).await?,
            transactions: self.service.list_transactions(user_id, None).await?,
            withdrawals: self.service.list_withdrawals(None, Some(user_id)).await?,
            campaigns: self.service.list_campaigns_by_owner(user_id).await?,
            applications: self.service.list_applications(user_id).await?,
            completed_tasks: self.service.list_completed_tasks(user_id).await?,
            profile,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
