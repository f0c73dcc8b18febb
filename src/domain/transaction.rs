use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId, WithdrawalDestination};

pub type TransactionId = Uuid;

/// The kind of ledger event a transaction row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Reward for completing a task
    Earning,
    Withdrawal,
    Deposit,
    ReferralBonus,
    AdReward,
    /// Balance reset recorded when the joining payment is verified
    JoiningFee,
    /// Advertiser paying up front for a campaign
    CampaignFunding,
    /// Purchase of a job-application plan
    Subscription,
    /// Manual back-office correction
    Adjustment,
}

impl TransactionType {
    pub const ALL: [TransactionType; 9] = [
        TransactionType::Earning,
        TransactionType::Withdrawal,
        TransactionType::Deposit,
        TransactionType::ReferralBonus,
        TransactionType::AdReward,
        TransactionType::JoiningFee,
        TransactionType::CampaignFunding,
        TransactionType::Subscription,
        TransactionType::Adjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Earning => "EARNING",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::ReferralBonus => "REFERRAL_BONUS",
            TransactionType::AdReward => "AD_REWARD",
            TransactionType::JoiningFee => "JOINING_FEE",
            TransactionType::CampaignFunding => "CAMPAIGN_FUNDING",
            TransactionType::Subscription => "SUBSCRIPTION",
            TransactionType::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let upper = s.trim().to_uppercase().replace('-', "_");
        Self::ALL.into_iter().find(|t| t.as_str() == upper)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "completed" => Some(TransactionStatus::Completed),
            "pending" => Some(TransactionStatus::Pending),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Rows that still back the running balance. Failed rows were refunded.
    pub fn counts_toward_balance(&self) -> bool {
        !matches!(self, TransactionStatus::Failed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only row of a user's ledger.
///
/// Rows are written already-final, except withdrawal rows which start
/// `Pending` and transition exactly once to `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Store-assigned ordering, monotonically increasing across all users
    pub sequence: i64,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub description: String,
    /// Signed amount: positive credits, negative debits
    pub amount_cents: Cents,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub destination: Option<WithdrawalDestination>,
}

impl Transaction {
    /// Create a completed row. The sequence is assigned by the repository.
    pub fn completed(
        user_id: impl Into<UserId>,
        tx_type: TransactionType,
        amount_cents: Cents,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            user_id: user_id.into(),
            tx_type,
            description: description.into(),
            amount_cents,
            timestamp: Utc::now(),
            status: TransactionStatus::Completed,
            destination: None,
        }
    }

    /// Create the pending debit row of a withdrawal.
    pub fn pending_withdrawal(
        user_id: impl Into<UserId>,
        amount_cents: Cents,
        destination: WithdrawalDestination,
    ) -> Self {
        assert!(amount_cents > 0, "Withdrawal amount must be positive");
        let description = format!("Withdrawal to {}", destination.summary());
        Self {
            status: TransactionStatus::Pending,
            destination: Some(destination),
            ..Self::completed(
                user_id,
                TransactionType::Withdrawal,
                -amount_cents,
                description,
            )
        }
    }

    pub fn is_credit(&self) -> bool {
        self.amount_cents > 0
    }
}
