use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    ApplicationStatus, BalanceCheck, Campaign, CampaignId, Cents, JobApplication, JobPlan,
    JobSubscription, PaymentStatus, Transaction, TransactionId, TransactionStatus,
    TransactionType, UserProfile, WalletPin, WithdrawalDestination, WithdrawalId,
    WithdrawalRequest, WithdrawalStatus, task_key,
};

use super::MIGRATION_001_INITIAL;

const PROFILE_COLUMNS: &str = "id, username, email, phone, balance_cents, payment_status, \
    payment_reference, job_plan, job_expiry, applications_today, last_application_date, \
    wallet_pin, saved_withdrawal, referral_code, referred_by, ads_watched_today, last_ad_date, \
    created_at";

const TRANSACTION_COLUMNS: &str =
    "sequence, id, user_id, tx_type, description, amount_cents, timestamp, status, destination";

const CAMPAIGN_COLUMNS: &str = "id, owner_id, title, description, link, category, reward_cents, \
    quantity, completions, views, created_at";

const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, transaction_id, amount_cents, destination, status, created_at, settled_at";

const APPLICATION_COLUMNS: &str =
    "id, user_id, job_id, job_title, applied_on, status, created_at";

/// Why a guarded write was not applied. Every check is evaluated inside the
/// same store transaction as the write it guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ProfileMissing,
    InsufficientBalance { balance: Cents },
    BalanceOverflow { balance: Cents },
    AlreadyCompleted,
    CampaignMissing,
    CampaignFull,
    OwnCampaign,
    WithdrawalMissing,
    AlreadySettled { status: WithdrawalStatus },
    WrongPaymentStatus { current: PaymentStatus },
    ReferralCodeUnknown,
    SelfReferral,
    AlreadyReferred,
    NoSubscription,
    SubscriptionExpired { expiry: NaiveDate },
    DailyLimitReached { limit: u32 },
}

/// Result of a guarded write: either committed, or rolled back with a reason.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded<T> {
    Applied(T),
    Rejected(Rejection),
}

/// Roll back and return the rejection when a check inside the unit fails.
macro_rules! guard {
    ($db:ident, $check:expr) => {{
        let check: std::result::Result<(), Rejection> = $check;
        if let Err(rejection) = check {
            $db.rollback().await.context("Failed to roll back")?;
            return Ok(Guarded::Rejected(rejection));
        }
    }};
}

/// Repository over the SQLite document store. Cloning shares the pool.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL.
    ///
    /// WAL mode plus a busy timeout lets concurrent writers queue on the
    /// write lock instead of failing outright.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Profile operations
    // ========================

    /// Insert a profile. Returns false when the id or username is taken.
    pub async fn create_profile(&self, profile: &UserProfile) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO profiles (id, username, email, phone, balance_cents, payment_status, referral_code, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(&profile.phone)
        .bind(profile.balance_cents)
        .bind(profile.payment_status.as_str())
        .bind(&profile.referral_code)
        .bind(profile.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save profile")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>> {
        fetch_profile(&self.pool, id).await
    }

    pub async fn get_profile_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let sql = format!("SELECT {} FROM profiles WHERE username = ?", PROFILE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch profile by username")?;
        row.as_ref().map(row_to_profile).transpose()
    }

    pub async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        let sql = format!("SELECT {} FROM profiles ORDER BY username", PROFILE_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list profiles")?;
        rows.iter().map(row_to_profile).collect()
    }

    /// Store or clear the wallet pin column.
    pub async fn set_wallet_pin(&self, user_id: &str, pin: Option<&WalletPin>) -> Result<bool> {
        let result = sqlx::query("UPDATE profiles SET wallet_pin = ? WHERE id = ?")
            .bind(pin.map(WalletPin::to_stored))
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to update wallet pin")?;
        Ok(result.rows_affected() == 1)
    }

    /// Overwrite the cached payout destination. Not part of any ledger unit.
    pub async fn save_withdrawal_details(
        &self,
        user_id: &str,
        destination: &WithdrawalDestination,
    ) -> Result<()> {
        let json = serde_json::to_string(destination)?;
        sqlx::query("UPDATE profiles SET saved_withdrawal = ? WHERE id = ?")
            .bind(json)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to save withdrawal details")?;
        Ok(())
    }

    // ========================
    // Balance operations
    // ========================

    /// Add a positive entry to the balance and the log as one unit.
    pub async fn credit(&self, mut entry: Transaction) -> Result<Guarded<Transaction>> {
        let mut db = self.pool.begin().await.context("Failed to begin credit")?;
        guard!(db, add_balance(&mut db, &entry.user_id, entry.amount_cents).await?);
        insert_transaction(&mut db, &mut entry).await?;
        db.commit().await.context("Failed to commit credit")?;
        Ok(Guarded::Applied(entry))
    }

    /// Apply a negative entry, provided the balance covers it at commit time.
    pub async fn debit(&self, mut entry: Transaction) -> Result<Guarded<Transaction>> {
        let mut db = self.pool.begin().await.context("Failed to begin debit")?;
        guard!(db, take_balance(&mut db, &entry.user_id, -entry.amount_cents).await?);
        insert_transaction(&mut db, &mut entry).await?;
        db.commit().await.context("Failed to commit debit")?;
        Ok(Guarded::Applied(entry))
    }

    /// Debit, append the pending row and open the withdrawal request as one unit.
    pub async fn withdraw(
        &self,
        user_id: &str,
        amount_cents: Cents,
        destination: &WithdrawalDestination,
    ) -> Result<Guarded<(Transaction, WithdrawalRequest)>> {
        let mut db = self.pool.begin().await.context("Failed to begin withdrawal")?;
        guard!(db, take_balance(&mut db, user_id, amount_cents).await?);

        let mut entry = Transaction::pending_withdrawal(user_id, amount_cents, destination.clone());
        insert_transaction(&mut db, &mut entry).await?;

        let request = WithdrawalRequest::new(user_id, entry.id, amount_cents, destination.clone());
        sqlx::query(
            r#"
            INSERT INTO withdrawal_requests (id, user_id, transaction_id, amount_cents, destination, status, created_at, settled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(request.id.to_string())
        .bind(&request.user_id)
        .bind(request.transaction_id.to_string())
        .bind(request.amount_cents)
        .bind(serde_json::to_string(&request.destination)?)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .execute(&mut *db)
        .await
        .context("Failed to save withdrawal request")?;

        db.commit().await.context("Failed to commit withdrawal")?;
        Ok(Guarded::Applied((entry, request)))
    }

    /// Close a pending withdrawal. Rejection refunds the amount and fails the
    /// ledger row so the balance still matches the non-failed rows.
    pub async fn settle_withdrawal(
        &self,
        id: WithdrawalId,
        approve: bool,
        settled_at: DateTime<Utc>,
    ) -> Result<Guarded<WithdrawalRequest>> {
        let (request_status, row_status) = if approve {
            (WithdrawalStatus::Approved, TransactionStatus::Completed)
        } else {
            (WithdrawalStatus::Rejected, TransactionStatus::Failed)
        };

        let mut db = self.pool.begin().await.context("Failed to begin settlement")?;
        let row = sqlx::query(
            r#"
            UPDATE withdrawal_requests
            SET status = ?, settled_at = ?
            WHERE id = ? AND status = 'pending'
            RETURNING user_id, transaction_id, amount_cents
            "#,
        )
        .bind(request_status.as_str())
        .bind(settled_at.to_rfc3339())
        .bind(id.to_string())
        .fetch_optional(&mut *db)
        .await
        .context("Failed to settle withdrawal request")?;

        let Some(row) = row else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM withdrawal_requests WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&mut *db)
                    .await
                    .context("Failed to fetch withdrawal status")?;
            db.rollback().await.context("Failed to roll back")?;
            let rejection = match current {
                None => Rejection::WithdrawalMissing,
                Some(status) => Rejection::AlreadySettled {
                    status: WithdrawalStatus::from_str(&status)
                        .ok_or_else(|| anyhow!("Invalid withdrawal status: {}", status))?,
                },
            };
            return Ok(Guarded::Rejected(rejection));
        };

        let user_id: String = row.try_get("user_id")?;
        let transaction_id: String = row.try_get("transaction_id")?;
        let amount_cents: Cents = row.try_get("amount_cents")?;

        let updated =
            sqlx::query("UPDATE transactions SET status = ? WHERE id = ? AND status = 'pending'")
                .bind(row_status.as_str())
                .bind(&transaction_id)
                .execute(&mut *db)
                .await
                .context("Failed to update withdrawal ledger row")?;
        if updated.rows_affected() != 1 {
            bail!("Withdrawal {} has no pending ledger row {}", id, transaction_id);
        }

        if !approve {
            guard!(db, add_balance(&mut db, &user_id, amount_cents).await?);
        }

        db.commit().await.context("Failed to commit settlement")?;

        let request = self
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| anyhow!("Settled withdrawal {} not found", id))?;
        Ok(Guarded::Applied(request))
    }

    // ========================
    // Task completion
    // ========================

    /// Add `task_id` to the completed set and credit `entry`, or do nothing
    /// if the task was already in the set.
    pub async fn mark_task_completed(
        &self,
        task_id: &str,
        mut entry: Transaction,
    ) -> Result<Guarded<Transaction>> {
        let mut db = self.pool.begin().await.context("Failed to begin task completion")?;
        guard!(db, add_balance(&mut db, &entry.user_id, entry.amount_cents).await?);
        guard!(db, insert_completed_task(&mut db, &entry.user_id, task_id, entry.timestamp).await?);
        insert_transaction(&mut db, &mut entry).await?;
        db.commit().await.context("Failed to commit task completion")?;
        Ok(Guarded::Applied(entry))
    }

    pub async fn is_task_completed(&self, user_id: &str, task_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM completed_tasks WHERE user_id = ? AND task_id = ?")
                .bind(user_id)
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to look up completed task")?;
        Ok(found.is_some())
    }

    pub async fn list_completed_tasks(&self, user_id: &str) -> Result<Vec<String>> {
        let tasks = sqlx::query_scalar(
            "SELECT task_id FROM completed_tasks WHERE user_id = ? ORDER BY completed_at, task_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list completed tasks")?;
        Ok(tasks)
    }

    // ========================
    // Campaign operations
    // ========================

    /// Charge the owner for the whole campaign and publish it as one unit.
    pub async fn create_campaign(&self, campaign: &Campaign) -> Result<Guarded<Transaction>> {
        let cost = campaign
            .total_cost()
            .ok_or_else(|| anyhow!("Campaign cost overflows"))?;

        let mut db = self.pool.begin().await.context("Failed to begin campaign creation")?;
        guard!(db, take_balance(&mut db, &campaign.owner_id, cost).await?);

        sqlx::query(
            r#"
            INSERT INTO campaigns (id, owner_id, title, description, link, category, reward_cents, quantity, completions, views, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(campaign.id.to_string())
        .bind(&campaign.owner_id)
        .bind(&campaign.title)
        .bind(&campaign.description)
        .bind(&campaign.link)
        .bind(&campaign.category)
        .bind(campaign.reward_cents)
        .bind(campaign.quantity)
        .bind(campaign.completions)
        .bind(campaign.views)
        .bind(campaign.created_at.to_rfc3339())
        .execute(&mut *db)
        .await
        .context("Failed to save campaign")?;

        let mut entry = Transaction::completed(
            campaign.owner_id.clone(),
            TransactionType::CampaignFunding,
            -cost,
            format!("Campaign funding: {}", campaign.title),
        );
        insert_transaction(&mut db, &mut entry).await?;

        db.commit().await.context("Failed to commit campaign creation")?;
        Ok(Guarded::Applied(entry))
    }

    pub async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let sql = format!("SELECT {} FROM campaigns WHERE id = ?", CAMPAIGN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch campaign")?;
        row.as_ref().map(row_to_campaign).transpose()
    }

    /// Campaigns `user_id` can still complete: not full, not their own, and
    /// not already in their completed set.
    pub async fn list_available_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>> {
        let sql = format!(
            r#"
            SELECT {} FROM campaigns c
            WHERE c.completions < c.quantity
              AND c.owner_id <> ?
              AND NOT EXISTS (
                  SELECT 1 FROM completed_tasks t
                  WHERE t.user_id = ? AND t.task_id = 'campaign:' || c.id
              )
            ORDER BY c.created_at DESC
            "#,
            CAMPAIGN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list available campaigns")?;
        rows.iter().map(row_to_campaign).collect()
    }

    pub async fn list_campaigns_by_owner(&self, owner_id: &str) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {} FROM campaigns WHERE owner_id = ? ORDER BY created_at DESC",
            CAMPAIGN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list campaigns by owner")?;
        rows.iter().map(row_to_campaign).collect()
    }

    /// Atomic view counter bump. Returns false for unknown campaigns.
    pub async fn record_campaign_view(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query("UPDATE campaigns SET views = views + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to record campaign view")?;
        Ok(result.rows_affected() == 1)
    }

    /// Conditional increment of the shared completion counter; never passes
    /// `quantity`. Returns the new count.
    pub async fn increment_campaign_completion(&self, id: CampaignId) -> Result<Guarded<i64>> {
        let completions: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE campaigns
            SET completions = completions + 1
            WHERE id = ? AND completions < quantity
            RETURNING completions
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to increment campaign completions")?;

        match completions {
            Some(count) => Ok(Guarded::Applied(count)),
            None => {
                let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM campaigns WHERE id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .context("Failed to fetch campaign")?;
                Ok(Guarded::Rejected(if exists.is_some() {
                    Rejection::CampaignFull
                } else {
                    Rejection::CampaignMissing
                }))
            }
        }
    }

    /// Count the completion, mark the task and pay the reward as one unit.
    pub async fn complete_campaign_task(
        &self,
        user_id: &str,
        campaign_id: CampaignId,
        completed_at: DateTime<Utc>,
    ) -> Result<Guarded<(Campaign, Transaction)>> {
        let key = task_key(campaign_id);
        let mut db = self.pool.begin().await.context("Failed to begin campaign task")?;

        let sql = format!(
            r#"
            UPDATE campaigns
            SET completions = completions + 1
            WHERE id = ? AND completions < quantity AND owner_id <> ?
            RETURNING {}
            "#,
            CAMPAIGN_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(campaign_id.to_string())
            .bind(user_id)
            .fetch_optional(&mut *db)
            .await
            .context("Failed to increment campaign completions")?;

        let campaign = match row {
            Some(row) => row_to_campaign(&row)?,
            None => {
                let rejection = diagnose_campaign(&mut db, user_id, campaign_id, &key).await?;
                db.rollback().await.context("Failed to roll back")?;
                return Ok(Guarded::Rejected(rejection));
            }
        };

        let mut entry = Transaction::completed(
            user_id,
            TransactionType::Earning,
            campaign.reward_cents,
            format!("Completed task: {}", campaign.title),
        );
        entry.timestamp = completed_at;

        guard!(db, add_balance(&mut db, user_id, campaign.reward_cents).await?);
        guard!(db, insert_completed_task(&mut db, user_id, &key, completed_at).await?);
        insert_transaction(&mut db, &mut entry).await?;

        db.commit().await.context("Failed to commit campaign task")?;
        Ok(Guarded::Applied((campaign, entry)))
    }

    /// Number of campaigns whose counter passed their cap. Always zero unless
    /// the store was edited by hand.
    pub async fn count_overfilled_campaigns(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM campaigns WHERE completions > quantity")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count overfilled campaigns")?;
        Ok(count)
    }

    // ========================
    // Referrals and ads
    // ========================

    /// Record who referred `user_id` (once) and pay the referrer `bonus`.
    /// Returns the referrer id and the bonus row, if a bonus was paid.
    pub async fn apply_referral(
        &self,
        user_id: &str,
        referral_code: &str,
        bonus: Cents,
    ) -> Result<Guarded<(String, Option<Transaction>)>> {
        let mut db = self.pool.begin().await.context("Failed to begin referral")?;

        let referrer: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE profiles
            SET referred_by = (SELECT r.id FROM profiles r WHERE r.referral_code = ?)
            WHERE id = ?
              AND referred_by IS NULL
              AND EXISTS (SELECT 1 FROM profiles r WHERE r.referral_code = ? AND r.id <> ?)
            RETURNING referred_by
            "#,
        )
        .bind(referral_code)
        .bind(user_id)
        .bind(referral_code)
        .bind(user_id)
        .fetch_optional(&mut *db)
        .await
        .context("Failed to record referral")?;

        let Some(referrer) = referrer else {
            let rejection = diagnose_referral(&mut db, user_id, referral_code).await?;
            db.rollback().await.context("Failed to roll back")?;
            return Ok(Guarded::Rejected(rejection));
        };

        let bonus_entry = if bonus > 0 {
            guard!(db, add_balance(&mut db, &referrer, bonus).await?);
            let mut entry = Transaction::completed(
                referrer.clone(),
                TransactionType::ReferralBonus,
                bonus,
                format!("Referral bonus for inviting {}", user_id),
            );
            insert_transaction(&mut db, &mut entry).await?;
            Some(entry)
        } else {
            None
        };

        db.commit().await.context("Failed to commit referral")?;
        Ok(Guarded::Applied((referrer, bonus_entry)))
    }

    /// Credit an ad-watch reward, bounded by a per-day count that resets on
    /// the first watch of a new day.
    pub async fn reward_ad_watch(
        &self,
        user_id: &str,
        today: NaiveDate,
        reward: Cents,
        max_per_day: u32,
    ) -> Result<Guarded<Transaction>> {
        let today_str = today.to_string();
        let mut db = self.pool.begin().await.context("Failed to begin ad reward")?;

        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET ads_watched_today = CASE WHEN last_ad_date = ? THEN ads_watched_today + 1 ELSE 1 END,
                last_ad_date = ?,
                balance_cents = balance_cents + ?
            WHERE id = ?
              AND (CASE WHEN last_ad_date = ? THEN ads_watched_today ELSE 0 END) < ?
              AND balance_cents <= ?
            "#,
        )
        .bind(&today_str)
        .bind(&today_str)
        .bind(reward)
        .bind(user_id)
        .bind(&today_str)
        .bind(i64::from(max_per_day))
        .bind(credit_ceiling(reward))
        .execute(&mut *db)
        .await
        .context("Failed to record ad watch")?;

        if result.rows_affected() == 0 {
            let profile = fetch_profile(&mut *db, user_id).await?;
            db.rollback().await.context("Failed to roll back")?;
            return Ok(Guarded::Rejected(match profile {
                None => Rejection::ProfileMissing,
                Some(p) if p.balance_cents > credit_ceiling(reward) => {
                    Rejection::BalanceOverflow { balance: p.balance_cents }
                }
                Some(_) => Rejection::DailyLimitReached { limit: max_per_day },
            }));
        }

        let mut entry = Transaction::completed(
            user_id,
            TransactionType::AdReward,
            reward,
            "Ad watch reward",
        );
        insert_transaction(&mut db, &mut entry).await?;
        db.commit().await.context("Failed to commit ad reward")?;
        Ok(Guarded::Applied(entry))
    }

    // ========================
    // Payment verification
    // ========================

    /// Unpaid -> PendingVerification, storing the payment proof.
    pub async fn submit_payment_proof(&self, user_id: &str, reference: &str) -> Result<Guarded<()>> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET payment_status = 'pending_verification', payment_reference = ?
            WHERE id = ? AND payment_status = 'unpaid'
            "#,
        )
        .bind(reference)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to submit payment proof")?;

        if result.rows_affected() == 1 {
            return Ok(Guarded::Applied(()));
        }
        Ok(Guarded::Rejected(
            match fetch_profile(&self.pool, user_id).await? {
                Some(profile) => Rejection::WrongPaymentStatus {
                    current: profile.payment_status,
                },
                None => Rejection::ProfileMissing,
            },
        ))
    }

    /// PendingVerification -> Verified, resetting the balance to
    /// `initial_balance` and recording the difference as the joining-fee row.
    pub async fn approve_payment(
        &self,
        user_id: &str,
        initial_balance: Cents,
    ) -> Result<Guarded<Transaction>> {
        let mut db = self.pool.begin().await.context("Failed to begin payment approval")?;

        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET payment_status = 'verified'
            WHERE id = ? AND payment_status = 'pending_verification'
            "#,
        )
        .bind(user_id)
        .execute(&mut *db)
        .await
        .context("Failed to verify payment")?;

        if result.rows_affected() == 0 {
            let rejection = match fetch_profile(&mut *db, user_id).await? {
                Some(profile) => Rejection::WrongPaymentStatus {
                    current: profile.payment_status,
                },
                None => Rejection::ProfileMissing,
            };
            db.rollback().await.context("Failed to roll back")?;
            return Ok(Guarded::Rejected(rejection));
        }

        let previous: Cents = sqlx::query_scalar("SELECT balance_cents FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_one(&mut *db)
            .await
            .context("Failed to read balance")?;

        sqlx::query("UPDATE profiles SET balance_cents = ? WHERE id = ?")
            .bind(initial_balance)
            .bind(user_id)
            .execute(&mut *db)
            .await
            .context("Failed to reset balance")?;

        let mut entry = Transaction::completed(
            user_id,
            TransactionType::JoiningFee,
            initial_balance - previous,
            "Joining fee verified",
        );
        insert_transaction(&mut db, &mut entry).await?;

        db.commit().await.context("Failed to commit payment approval")?;
        Ok(Guarded::Applied(entry))
    }

    // ========================
    // Job subscriptions and applications
    // ========================

    /// Charge `price` and install the subscription as one unit.
    pub async fn subscribe_job_plan(
        &self,
        user_id: &str,
        subscription: &JobSubscription,
        price: Cents,
    ) -> Result<Guarded<Option<Transaction>>> {
        let mut db = self.pool.begin().await.context("Failed to begin subscription")?;
        if price > 0 {
            guard!(db, take_balance(&mut db, user_id, price).await?);
        }

        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET job_plan = ?, job_expiry = ?, applications_today = 0, last_application_date = NULL
            WHERE id = ?
            "#,
        )
        .bind(subscription.plan.as_str())
        .bind(subscription.expiry_date.to_string())
        .bind(user_id)
        .execute(&mut *db)
        .await
        .context("Failed to save subscription")?;

        if result.rows_affected() == 0 {
            db.rollback().await.context("Failed to roll back")?;
            return Ok(Guarded::Rejected(Rejection::ProfileMissing));
        }

        let entry = if price > 0 {
            let mut entry = Transaction::completed(
                user_id,
                TransactionType::Subscription,
                -price,
                format!("{} job plan until {}", subscription.plan, subscription.expiry_date),
            );
            insert_transaction(&mut db, &mut entry).await?;
            Some(entry)
        } else {
            None
        };

        db.commit().await.context("Failed to commit subscription")?;
        Ok(Guarded::Applied(entry))
    }

    /// Zero a stale daily application counter. Returns true if it was reset.
    pub async fn reset_daily_applications(&self, user_id: &str, today: NaiveDate) -> Result<bool> {
        let today_str = today.to_string();
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET applications_today = 0, last_application_date = ?
            WHERE id = ?
              AND job_plan IS NOT NULL
              AND (last_application_date IS NULL OR last_application_date <> ?)
            "#,
        )
        .bind(&today_str)
        .bind(user_id)
        .bind(&today_str)
        .execute(&self.pool)
        .await
        .context("Failed to reset daily applications")?;
        Ok(result.rows_affected() == 1)
    }

    /// Count the application against today's plan limit and append it.
    pub async fn submit_application(
        &self,
        application: &JobApplication,
    ) -> Result<Guarded<JobApplication>> {
        let today = application.applied_on.to_string();
        let limit_of = |plan: JobPlan| plan.daily_limit().map(i64::from).unwrap_or(i64::MAX);

        let mut db = self.pool.begin().await.context("Failed to begin application")?;
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET applications_today = CASE WHEN last_application_date = ? THEN applications_today + 1 ELSE 1 END,
                last_application_date = ?
            WHERE id = ?
              AND job_plan IS NOT NULL
              AND job_expiry >= ?
              AND (CASE WHEN last_application_date = ? THEN applications_today ELSE 0 END)
                  < (CASE job_plan WHEN 'basic' THEN ? WHEN 'standard' THEN ? ELSE ? END)
            "#,
        )
        .bind(&today)
        .bind(&today)
        .bind(&application.user_id)
        .bind(&today)
        .bind(&today)
        .bind(limit_of(JobPlan::Basic))
        .bind(limit_of(JobPlan::Standard))
        .bind(limit_of(JobPlan::Premium))
        .execute(&mut *db)
        .await
        .context("Failed to count application")?;

        if result.rows_affected() == 0 {
            let rejection = match fetch_profile(&mut *db, &application.user_id).await? {
                None => Rejection::ProfileMissing,
                Some(profile) => match profile.job_subscription {
                    None => Rejection::NoSubscription,
                    Some(sub) if !sub.is_active(application.applied_on) => {
                        Rejection::SubscriptionExpired {
                            expiry: sub.expiry_date,
                        }
                    }
                    Some(sub) => Rejection::DailyLimitReached {
                        limit: sub.plan.daily_limit().unwrap_or(u32::MAX),
                    },
                },
            };
            db.rollback().await.context("Failed to roll back")?;
            return Ok(Guarded::Rejected(rejection));
        }

        sqlx::query(
            r#"
            INSERT INTO applications (id, user_id, job_id, job_title, applied_on, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(application.id.to_string())
        .bind(&application.user_id)
        .bind(&application.job_id)
        .bind(&application.job_title)
        .bind(&today)
        .bind(application.status.as_str())
        .bind(application.created_at.to_rfc3339())
        .execute(&mut *db)
        .await
        .context("Failed to save application")?;

        db.commit().await.context("Failed to commit application")?;
        Ok(Guarded::Applied(application.clone()))
    }

    pub async fn list_applications(&self, user_id: &str) -> Result<Vec<JobApplication>> {
        let sql = format!(
            "SELECT {} FROM applications WHERE user_id = ? ORDER BY created_at DESC",
            APPLICATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list applications")?;
        rows.iter().map(row_to_application).collect()
    }

    // ========================
    // Ledger queries
    // ========================

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch transaction")?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    /// A user's ledger in commit order.
    pub async fn list_transactions(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = ? ORDER BY sequence",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;
        rows.iter().map(row_to_transaction).collect()
    }

    /// The most recent `limit` rows, newest first.
    pub async fn list_recent_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = ? ORDER BY sequence DESC LIMIT ?",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list recent transactions")?;
        rows.iter().map(row_to_transaction).collect()
    }

    pub async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        let sql = format!(
            "SELECT {} FROM withdrawal_requests WHERE id = ?",
            WITHDRAWAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch withdrawal request")?;
        row.as_ref().map(row_to_withdrawal).transpose()
    }

    /// Withdrawal requests, optionally filtered by status and user, oldest first.
    pub async fn list_withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<WithdrawalRequest>> {
        let mut sql = format!("SELECT {} FROM withdrawal_requests WHERE 1=1", WITHDRAWAL_COLUMNS);
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(user_id) = user_id {
            query = query.bind(user_id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list withdrawal requests")?;
        rows.iter().map(row_to_withdrawal).collect()
    }

    /// Stored balance against ledger sum for every profile, in one query.
    pub async fn balance_checks(&self) -> Result<Vec<BalanceCheck>> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.id AS user_id,
                p.balance_cents AS stored_balance,
                COALESCE(SUM(CASE WHEN t.status <> 'failed' THEN t.amount_cents ELSE 0 END), 0) AS ledger_balance,
                COUNT(t.id) AS transaction_count,
                COALESCE(SUM(CASE WHEN t.status = 'pending' THEN 1 ELSE 0 END), 0) AS pending_count
            FROM profiles p
            LEFT JOIN transactions t ON t.user_id = p.id
            GROUP BY p.id, p.balance_cents
            ORDER BY p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute balance checks")?;

        rows.iter()
            .map(|row| {
                Ok(BalanceCheck {
                    user_id: row.try_get("user_id")?,
                    stored_balance: row.try_get("stored_balance")?,
                    ledger_balance: row.try_get("ledger_balance")?,
                    transaction_count: usize::try_from(row.try_get::<i64, _>("transaction_count")?)
                        .context("Invalid transaction count")?,
                    pending_count: usize::try_from(row.try_get::<i64, _>("pending_count")?)
                        .context("Invalid pending count")?,
                })
            })
            .collect()
    }
}

// ========================
// Unit helpers (run on an open store transaction)
// ========================

/// Conditional credit: refuses any sum SQLite could not hold as an integer.
async fn add_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: Cents,
) -> Result<Result<(), Rejection>> {
    let result = sqlx::query(
        "UPDATE profiles SET balance_cents = balance_cents + ? WHERE id = ? AND balance_cents <= ?",
    )
    .bind(amount)
    .bind(user_id)
    .bind(credit_ceiling(amount))
    .execute(&mut *conn)
    .await
    .context("Failed to credit balance")?;

    if result.rows_affected() == 1 {
        return Ok(Ok(()));
    }
    credit_rejection(conn, user_id).await.map(Err)
}

/// Largest balance that can still absorb `amount` without leaving i64.
fn credit_ceiling(amount: Cents) -> Cents {
    Cents::MAX.saturating_sub(amount.max(0))
}

async fn credit_rejection(conn: &mut SqliteConnection, user_id: &str) -> Result<Rejection> {
    let balance: Option<Cents> = sqlx::query_scalar("SELECT balance_cents FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read balance")?;
    Ok(match balance {
        Some(balance) => Rejection::BalanceOverflow { balance },
        None => Rejection::ProfileMissing,
    })
}

/// Conditional debit: the balance check and the write are one statement.
async fn take_balance(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: Cents,
) -> Result<Result<(), Rejection>> {
    let result = sqlx::query(
        "UPDATE profiles SET balance_cents = balance_cents - ? WHERE id = ? AND balance_cents >= ?",
    )
    .bind(amount)
    .bind(user_id)
    .bind(amount)
    .execute(&mut *conn)
    .await
    .context("Failed to debit balance")?;

    if result.rows_affected() == 1 {
        return Ok(Ok(()));
    }

    let balance: Option<Cents> = sqlx::query_scalar("SELECT balance_cents FROM profiles WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read balance")?;
    Ok(Err(match balance {
        Some(balance) => Rejection::InsufficientBalance { balance },
        None => Rejection::ProfileMissing,
    }))
}

async fn insert_completed_task(
    conn: &mut SqliteConnection,
    user_id: &str,
    task_id: &str,
    completed_at: DateTime<Utc>,
) -> Result<Result<(), Rejection>> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO completed_tasks (user_id, task_id, completed_at) VALUES (?, ?, ?)",
    )
    .bind(user_id)
    .bind(task_id)
    .bind(completed_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .context("Failed to record completed task")?;
    Ok(if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(Rejection::AlreadyCompleted)
    })
}

/// Append a ledger row and store its assigned sequence on `entry`.
async fn insert_transaction(conn: &mut SqliteConnection, entry: &mut Transaction) -> Result<()> {
    let destination = entry
        .destination
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO transactions (id, user_id, tx_type, description, amount_cents, timestamp, status, destination)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING sequence
        "#,
    )
    .bind(entry.id.to_string())
    .bind(&entry.user_id)
    .bind(entry.tx_type.as_str())
    .bind(&entry.description)
    .bind(entry.amount_cents)
    .bind(entry.timestamp.to_rfc3339())
    .bind(entry.status.as_str())
    .bind(destination)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to save transaction")?;

    entry.sequence = sequence;
    Ok(())
}

async fn diagnose_campaign(
    conn: &mut SqliteConnection,
    user_id: &str,
    campaign_id: CampaignId,
    key: &str,
) -> Result<Rejection> {
    let owner: Option<String> = sqlx::query_scalar("SELECT owner_id FROM campaigns WHERE id = ?")
        .bind(campaign_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch campaign")?;

    let Some(owner) = owner else {
        return Ok(Rejection::CampaignMissing);
    };
    if owner == user_id {
        return Ok(Rejection::OwnCampaign);
    }

    let completed: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM completed_tasks WHERE user_id = ? AND task_id = ?")
            .bind(user_id)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up completed task")?;
    Ok(if completed.is_some() {
        Rejection::AlreadyCompleted
    } else {
        Rejection::CampaignFull
    })
}

async fn diagnose_referral(
    conn: &mut SqliteConnection,
    user_id: &str,
    referral_code: &str,
) -> Result<Rejection> {
    let referred_by: Option<Option<String>> =
        sqlx::query_scalar("SELECT referred_by FROM profiles WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch profile")?;

    match referred_by {
        None => return Ok(Rejection::ProfileMissing),
        Some(Some(_)) => return Ok(Rejection::AlreadyReferred),
        Some(None) => {}
    }

    let referrer: Option<String> =
        sqlx::query_scalar("SELECT id FROM profiles WHERE referral_code = ?")
            .bind(referral_code)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up referral code")?;
    Ok(match referrer {
        Some(id) if id == user_id => Rejection::SelfReferral,
        _ => Rejection::ReferralCodeUnknown,
    })
}

async fn fetch_profile<'e, E>(executor: E, id: &str) -> Result<Option<UserProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("Failed to fetch profile")?;
    row.as_ref().map(row_to_profile).transpose()
}

// ========================
// Row mapping
// ========================

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", s))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid id: {}", s))
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("Counter out of range: {}", value))
}

fn row_to_profile(row: &SqliteRow) -> Result<UserProfile> {
    let status_str: String = row.try_get("payment_status")?;
    let job_plan: Option<String> = row.try_get("job_plan")?;
    let job_expiry: Option<String> = row.try_get("job_expiry")?;
    let last_application_date: Option<String> = row.try_get("last_application_date")?;
    let wallet_pin: Option<String> = row.try_get("wallet_pin")?;
    let saved_withdrawal: Option<String> = row.try_get("saved_withdrawal")?;
    let last_ad_date: Option<String> = row.try_get("last_ad_date")?;
    let created_at: String = row.try_get("created_at")?;

    let job_subscription = match (job_plan, job_expiry) {
        (Some(plan), Some(expiry)) => Some(JobSubscription {
            plan: JobPlan::from_str(&plan).ok_or_else(|| anyhow!("Invalid job plan: {}", plan))?,
            expiry_date: parse_date(&expiry)?,
            applications_today: to_u32(row.try_get("applications_today")?)?,
            last_application_date: last_application_date.as_deref().map(parse_date).transpose()?,
        }),
        _ => None,
    };

    Ok(UserProfile {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        balance_cents: row.try_get("balance_cents")?,
        payment_status: PaymentStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("Invalid payment status: {}", status_str))?,
        payment_reference: row.try_get("payment_reference")?,
        job_subscription,
        wallet_pin: wallet_pin.as_deref().map(WalletPin::from_stored),
        saved_withdrawal_details: saved_withdrawal
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Invalid saved withdrawal details")?,
        referral_code: row.try_get("referral_code")?,
        referred_by: row.try_get("referred_by")?,
        ads_watched_today: to_u32(row.try_get("ads_watched_today")?)?,
        last_ad_date: last_ad_date.as_deref().map(parse_date).transpose()?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let id_str: String = row.try_get("id")?;
    let type_str: String = row.try_get("tx_type")?;
    let status_str: String = row.try_get("status")?;
    let timestamp_str: String = row.try_get("timestamp")?;
    let destination: Option<String> = row.try_get("destination")?;

    Ok(Transaction {
        id: parse_uuid(&id_str)?,
        sequence: row.try_get("sequence")?,
        user_id: row.try_get("user_id")?,
        tx_type: TransactionType::from_str(&type_str)
            .ok_or_else(|| anyhow!("Invalid transaction type: {}", type_str))?,
        description: row.try_get("description")?,
        amount_cents: row.try_get("amount_cents")?,
        timestamp: parse_timestamp(&timestamp_str)?,
        status: TransactionStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("Invalid transaction status: {}", status_str))?,
        destination: destination
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Invalid withdrawal destination")?,
    })
}

fn row_to_campaign(row: &SqliteRow) -> Result<Campaign> {
    let id_str: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Campaign {
        id: parse_uuid(&id_str)?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        link: row.try_get("link")?,
        category: row.try_get("category")?,
        reward_cents: row.try_get("reward_cents")?,
        quantity: row.try_get("quantity")?,
        completions: row.try_get("completions")?,
        views: row.try_get("views")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_withdrawal(row: &SqliteRow) -> Result<WithdrawalRequest> {
    let id_str: String = row.try_get("id")?;
    let transaction_id: String = row.try_get("transaction_id")?;
    let destination: String = row.try_get("destination")?;
    let status_str: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let settled_at: Option<String> = row.try_get("settled_at")?;

    Ok(WithdrawalRequest {
        id: parse_uuid(&id_str)?,
        user_id: row.try_get("user_id")?,
        transaction_id: parse_uuid(&transaction_id)?,
        amount_cents: row.try_get("amount_cents")?,
        destination: serde_json::from_str(&destination)
            .context("Invalid withdrawal destination")?,
        status: WithdrawalStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("Invalid withdrawal status: {}", status_str))?,
        created_at: parse_timestamp(&created_at)?,
        settled_at: settled_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_application(row: &SqliteRow) -> Result<JobApplication> {
    let id_str: String = row.try_get("id")?;
    let applied_on: String = row.try_get("applied_on")?;
    let status_str: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(JobApplication {
        id: parse_uuid(&id_str)?,
        user_id: row.try_get("user_id")?,
        job_id: row.try_get("job_id")?,
        job_title: row.try_get("job_title")?,
        applied_on: parse_date(&applied_on)?,
        status: ApplicationStatus::from_str(&status_str)
            .ok_or_else(|| anyhow!("Invalid application status: {}", status_str))?,
        created_at: parse_timestamp(&created_at)?,
    })
}
