use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Cents, PaymentStatus};
use crate::storage::Rejection;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Insufficient balance: {balance} cents available, {required} required")]
    InsufficientBalance { balance: Cents, required: Cents },

    #[error("Already completed: {0}")]
    AlreadyCompleted(String),

    #[error("Campaign is full: {0}")]
    CampaignFull(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Profile already exists: {0}")]
    ProfileAlreadyExists(String),

    #[error("Username already taken (usernames ignore case): {0}")]
    UsernameTaken(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot move payment status from {from} to {to}")]
    InvalidStatusTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("An active job subscription is required")]
    SubscriptionRequired { expired_on: Option<NaiveDate> },

    #[error("Daily limit of {limit} reached")]
    DailyLimitReached { limit: u32 },

    #[error("Wallet PIN must be exactly 4 digits")]
    InvalidPin,

    #[error("Referral already applied for {0}")]
    AlreadyReferred(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl AppError {
    pub fn profile_not_found(id: &str) -> Self {
        AppError::NotFound {
            kind: "Profile",
            id: id.to_string(),
        }
    }

    /// Map a store-level rejection onto the error a caller sees. `subject`
    /// names the profile, campaign or request the operation targeted.
    pub fn from_rejection(rejection: Rejection, subject: &str, required: Cents) -> Self {
        match rejection {
            Rejection::ProfileMissing => AppError::profile_not_found(subject),
            Rejection::InsufficientBalance { balance } => {
                AppError::InsufficientBalance { balance, required }
            }
            Rejection::BalanceOverflow { balance } => AppError::InvalidAmount(format!(
                "credit would overflow a balance of {} cents",
                balance
            )),
            Rejection::AlreadyCompleted => AppError::AlreadyCompleted(subject.to_string()),
            Rejection::CampaignMissing => AppError::NotFound {
                kind: "Campaign",
                id: subject.to_string(),
            },
            Rejection::CampaignFull => AppError::CampaignFull(subject.to_string()),
            Rejection::OwnCampaign => {
                AppError::InvalidOperation("owners cannot complete their own campaign".into())
            }
            Rejection::WithdrawalMissing => AppError::NotFound {
                kind: "Withdrawal",
                id: subject.to_string(),
            },
            Rejection::AlreadySettled { status } => {
                AppError::AlreadyCompleted(format!("withdrawal {} was already {}", subject, status))
            }
            Rejection::WrongPaymentStatus { current } => AppError::InvalidStatusTransition {
                from: current,
                to: current.next().unwrap_or(current),
            },
            Rejection::ReferralCodeUnknown => AppError::NotFound {
                kind: "Referral code",
                id: subject.to_string(),
            },
            Rejection::SelfReferral => {
                AppError::InvalidOperation("a referral code cannot be applied by its owner".into())
            }
            Rejection::AlreadyReferred => AppError::AlreadyReferred(subject.to_string()),
            Rejection::NoSubscription => AppError::SubscriptionRequired { expired_on: None },
            Rejection::SubscriptionExpired { expiry } => AppError::SubscriptionRequired {
                expired_on: Some(expiry),
            },
            Rejection::DailyLimitReached { limit } => AppError::DailyLimitReached { limit },
        }
    }

    /// Errors whose outcome is unknown: the store may or may not have
    /// committed. Callers should reconcile from the ledger, not blindly retry.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, AppError::Backend(_))
    }
}
