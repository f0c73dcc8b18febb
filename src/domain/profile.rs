use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Cents, WithdrawalDestination};

/// Opaque id assigned by the external identity provider.
pub type UserId = String;

/// Joining-payment verification. Forward-only: never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PendingVerification,
    Verified,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::PendingVerification => "pending_verification",
            PaymentStatus::Verified => "verified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "pending_verification" => Some(PaymentStatus::PendingVerification),
            "verified" => Some(PaymentStatus::Verified),
            _ => None,
        }
    }

    /// The only state reachable from this one, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            PaymentStatus::Unpaid => Some(PaymentStatus::PendingVerification),
            PaymentStatus::PendingVerification => Some(PaymentStatus::Verified),
            PaymentStatus::Verified => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPlan {
    Basic,
    Standard,
    Premium,
}

/// Days a purchased plan stays active.
pub const DEFAULT_PLAN_DURATION_DAYS: i64 = 30;

impl JobPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPlan::Basic => "basic",
            JobPlan::Standard => "standard",
            JobPlan::Premium => "premium",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "basic" => Some(JobPlan::Basic),
            "standard" => Some(JobPlan::Standard),
            "premium" => Some(JobPlan::Premium),
            _ => None,
        }
    }

    /// Applications allowed per calendar day. `None` means unlimited.
    pub fn daily_limit(&self) -> Option<u32> {
        match self {
            JobPlan::Basic => Some(5),
            JobPlan::Standard => Some(15),
            JobPlan::Premium => None,
        }
    }
}

impl std::fmt::Display for JobPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubscription {
    pub plan: JobPlan,
    pub expiry_date: NaiveDate,
    pub applications_today: u32,
    pub last_application_date: Option<NaiveDate>,
}

impl JobSubscription {
    pub fn starting(plan: JobPlan, today: NaiveDate, duration_days: i64) -> Self {
        Self {
            plan,
            expiry_date: today + Duration::days(duration_days),
            applications_today: 0,
            last_application_date: None,
        }
    }

    pub fn is_active(&self, today: NaiveDate) -> bool {
        today <= self.expiry_date
    }

    /// Applications counted for `today`; a counter left over from an earlier
    /// day reads as zero.
    pub fn applications_on(&self, today: NaiveDate) -> u32 {
        daily_count(self.applications_today, self.last_application_date, today)
    }

    pub fn remaining_today(&self, today: NaiveDate) -> Option<u32> {
        self.plan
            .daily_limit()
            .map(|limit| limit.saturating_sub(self.applications_on(today)))
    }
}

/// Lazily reset per-day counter: the stored count only applies to the day it
/// was last written on.
pub fn daily_count(count: u32, last_date: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_date {
        Some(date) if date == today => count,
        _ => 0,
    }
}

pub const PIN_SKIPPED: &str = "SKIPPED";

/// Client-side re-entry lock on the wallet view. Not an authorization
/// boundary: anyone holding the user id can still call the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletPin {
    /// Hex SHA-256 digest of the user id and the 4-digit pin
    Set(String),
    Skipped,
}

impl WalletPin {
    pub fn from_pin(user_id: &str, pin: &str) -> Option<Self> {
        if !is_valid_pin(pin) {
            return None;
        }
        Some(WalletPin::Set(pin_digest(user_id, pin)))
    }

    pub fn unlocks(&self, user_id: &str, pin: &str) -> bool {
        match self {
            WalletPin::Skipped => true,
            WalletPin::Set(digest) => *digest == pin_digest(user_id, pin),
        }
    }

    /// Stored column value.
    pub fn to_stored(&self) -> String {
        match self {
            WalletPin::Set(digest) => digest.clone(),
            WalletPin::Skipped => PIN_SKIPPED.to_string(),
        }
    }

    pub fn from_stored(s: &str) -> Self {
        if s == PIN_SKIPPED {
            WalletPin::Skipped
        } else {
            WalletPin::Set(s.to_string())
        }
    }
}

pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.chars().all(|c| c.is_ascii_digit())
}

fn pin_digest(user_id: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(pin.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Referral code handed out to a user: their username, upper-cased.
/// Usernames are unique ignoring ASCII case, so codes never collide.
pub fn referral_code_for(username: &str) -> String {
    username.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub balance_cents: Cents,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub job_subscription: Option<JobSubscription>,
    pub wallet_pin: Option<WalletPin>,
    pub saved_withdrawal_details: Option<WithdrawalDestination>,
    pub referral_code: String,
    pub referred_by: Option<UserId>,
    pub ads_watched_today: u32,
    pub last_ad_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(
        id: impl Into<UserId>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            id: id.into(),
            referral_code: referral_code_for(&username),
            username,
            email: email.into(),
            phone: None,
            balance_cents: 0,
            payment_status: PaymentStatus::Unpaid,
            payment_reference: None,
            job_subscription: None,
            wallet_pin: None,
            saved_withdrawal_details: None,
            referred_by: None,
            ads_watched_today: 0,
            last_ad_date: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn is_verified(&self) -> bool {
        self.payment_status == PaymentStatus::Verified
    }

    pub fn ads_watched_on(&self, today: NaiveDate) -> u32 {
        daily_count(self.ads_watched_today, self.last_ad_date, today)
    }

    /// Whether the wallet view needs the pin before showing balances.
    pub fn wallet_locked(&self) -> bool {
        matches!(self.wallet_pin, Some(WalletPin::Set(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_payment_status_only_moves_forward() {
        assert_eq!(
            PaymentStatus::Unpaid.next(),
            Some(PaymentStatus::PendingVerification)
        );
        assert_eq!(
            PaymentStatus::PendingVerification.next(),
            Some(PaymentStatus::Verified)
        );
        assert_eq!(PaymentStatus::Verified.next(), None);
        assert!(PaymentStatus::Unpaid < PaymentStatus::Verified);
    }

    #[test]
    fn test_applications_reset_on_new_day() {
        let mut sub = JobSubscription::starting(JobPlan::Basic, date("2026-03-01"), 30);
        sub.applications_today = 4;
        sub.last_application_date = Some(date("2026-03-02"));

        assert_eq!(sub.applications_on(date("2026-03-02")), 4);
        assert_eq!(sub.remaining_today(date("2026-03-02")), Some(1));
        assert_eq!(sub.applications_on(date("2026-03-03")), 0);
        assert_eq!(sub.remaining_today(date("2026-03-03")), Some(5));
    }

    #[test]
    fn test_subscription_expiry_is_inclusive() {
        let sub = JobSubscription::starting(JobPlan::Premium, date("2026-03-01"), 30);
        assert_eq!(sub.expiry_date, date("2026-03-31"));
        assert!(sub.is_active(date("2026-03-31")));
        assert!(!sub.is_active(date("2026-04-01")));
        assert_eq!(sub.remaining_today(date("2026-03-05")), None);
    }

    #[test]
    fn test_pin_validation() {
        assert!(is_valid_pin("0420"));
        assert!(!is_valid_pin("420"));
        assert!(!is_valid_pin("04200"));
        assert!(!is_valid_pin("04a0"));
        assert!(WalletPin::from_pin("u1", "12x4").is_none());
    }

    #[test]
    fn test_pin_unlocks_only_with_matching_pin_and_user() {
        let pin = WalletPin::from_pin("u1", "1234").unwrap();
        assert!(pin.unlocks("u1", "1234"));
        assert!(!pin.unlocks("u1", "4321"));
        assert!(!pin.unlocks("u2", "1234"));
    }

    #[test]
    fn test_skipped_pin_roundtrips_through_storage() {
        assert_eq!(WalletPin::from_stored(PIN_SKIPPED), WalletPin::Skipped);
        assert!(WalletPin::Skipped.unlocks("u1", "anything"));

        let pin = WalletPin::from_pin("u1", "9999").unwrap();
        assert_eq!(WalletPin::from_stored(&pin.to_stored()), pin);
    }

    #[test]
    fn test_new_profile_defaults() {
        let profile = UserProfile::new("uid-1", "ada", "ada@example.com").with_phone("0700");
        assert_eq!(profile.balance_cents, 0);
        assert_eq!(profile.payment_status, PaymentStatus::Unpaid);
        assert_eq!(profile.referral_code, "ADA");
        assert_eq!(profile.phone.as_deref(), Some("0700"));
        assert!(!profile.wallet_locked());
    }
}
