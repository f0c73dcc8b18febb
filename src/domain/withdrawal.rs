use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, TransactionId, UserId};

pub type WithdrawalId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    MobileMoney,
    BankTransfer,
    Paypal,
    Crypto,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::MobileMoney => "mobile_money",
            PayoutMethod::BankTransfer => "bank_transfer",
            PayoutMethod::Paypal => "paypal",
            PayoutMethod::Crypto => "crypto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "mobile_money" | "mpesa" => Some(PayoutMethod::MobileMoney),
            "bank_transfer" | "bank" => Some(PayoutMethod::BankTransfer),
            "paypal" => Some(PayoutMethod::Paypal),
            "crypto" => Some(PayoutMethod::Crypto),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a withdrawal is paid out. Snapshotted onto the ledger row and the
/// request, and cached on the profile as the last used destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalDestination {
    pub method: PayoutMethod,
    pub account_name: String,
    pub account_number: String,
    pub institution: Option<String>,
}

impl WithdrawalDestination {
    pub fn new(
        method: PayoutMethod,
        account_name: impl Into<String>,
        account_number: impl Into<String>,
    ) -> Self {
        Self {
            method,
            account_name: account_name.into(),
            account_number: account_number.into(),
            institution: None,
        }
    }

    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }

    /// Short human-readable form with the account number masked.
    pub fn summary(&self) -> String {
        let visible: String = {
            let chars: Vec<char> = self.account_number.chars().collect();
            let start = chars.len().saturating_sub(4);
            chars[start..].iter().collect()
        };
        match &self.institution {
            Some(inst) => format!("{} {} ({}) ****{}", self.method, inst, self.account_name, visible),
            None => format!("{} ({}) ****{}", self.method, self.account_name, visible),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.account_name.trim().is_empty() && !self.account_number.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(WithdrawalStatus::Pending),
            "approved" => Some(WithdrawalStatus::Approved),
            "rejected" => Some(WithdrawalStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payout awaiting manual back-office review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user_id: UserId,
    /// The pending ledger row created in the same unit as this request
    pub transaction_id: TransactionId,
    pub amount_cents: Cents,
    pub destination: WithdrawalDestination,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl WithdrawalRequest {
    pub fn new(
        user_id: impl Into<UserId>,
        transaction_id: TransactionId,
        amount_cents: Cents,
        destination: WithdrawalDestination,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            transaction_id,
            amount_cents,
            destination,
            status: WithdrawalStatus::Pending,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != WithdrawalStatus::Pending
    }
}
