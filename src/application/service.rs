use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    BalanceCheck, Campaign, CampaignId, Cents, IntegrityReport, JobApplication, JobPlan,
    JobSubscription, PaymentStatus, Transaction, TransactionId, TransactionType, UserProfile, WalletPin,
    WithdrawalDestination, WithdrawalId, WithdrawalRequest, WithdrawalStatus, compute_balance,
    task_key, total_earned, totals_by_type,
};
use crate::settings::LedgerConfig;
use crate::storage::{Guarded, Rejection, Repository};

use super::{AppError, EarningsReport};

/// Application service providing the ledger operations.
/// This is the only way balances change; the CLI and sessions call into it.
#[derive(Clone)]
pub struct LedgerService {
    repo: Repository,
    config: LedgerConfig,
}

/// Result of a withdrawal: the pending ledger row and the review request.
#[derive(Debug, Clone)]
pub struct WithdrawalResult {
    pub transaction: Transaction,
    pub request: WithdrawalRequest,
}

/// Outcome of an idempotent task completion.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskCompletion {
    Credited(Transaction),
    /// The task was already in the completed set; nothing was paid.
    AlreadyCompleted,
}

impl TaskCompletion {
    pub fn was_credited(&self) -> bool {
        matches!(self, TaskCompletion::Credited(_))
    }
}

/// Fields an advertiser supplies for a new campaign.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub title: String,
    pub description: Option<String>,
    pub link: String,
    pub category: Option<String>,
    pub reward_cents: Cents,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct ReferralResult {
    pub referrer_id: String,
    pub bonus: Option<Transaction>,
}

impl LedgerService {
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo, config))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // Profiles
    // ========================

    pub async fn create_profile(
        &self,
        id: &str,
        username: &str,
        email: &str,
        phone: Option<String>,
    ) -> Result<UserProfile, AppError> {
        if id.trim().is_empty() || username.trim().is_empty() {
            return Err(AppError::InvalidOperation(
                "user id and username are required".into(),
            ));
        }

        let mut profile = UserProfile::new(id, username.trim(), email);
        if let Some(phone) = phone {
            profile = profile.with_phone(phone);
        }

        if !self.repo.create_profile(&profile).await? {
            if self.repo.get_profile(id).await?.is_some() {
                return Err(AppError::ProfileAlreadyExists(id.to_string()));
            }
            return Err(AppError::UsernameTaken(profile.username));
        }
        info!(user_id = id, username, "created profile");
        Ok(profile)
    }

    pub async fn get_profile(&self, id: &str) -> Result<UserProfile, AppError> {
        self.repo
            .get_profile(id)
            .await?
            .ok_or_else(|| AppError::profile_not_found(id))
    }

    /// Resolve a user by id, falling back to username.
    pub async fn find_profile(&self, id_or_username: &str) -> Result<UserProfile, AppError> {
        if let Some(profile) = self.repo.get_profile(id_or_username).await? {
            return Ok(profile);
        }
        self.repo
            .get_profile_by_username(id_or_username)
            .await?
            .ok_or_else(|| AppError::profile_not_found(id_or_username))
    }

    pub async fn list_profiles(&self) -> Result<Vec<UserProfile>, AppError> {
        Ok(self.repo.list_profiles().await?)
    }

    pub async fn get_balance(&self, id: &str) -> Result<Cents, AppError> {
        Ok(self.get_profile(id).await?.balance_cents)
    }

    // ========================
    // Credits and debits
    // ========================

    /// Increase the balance and append one completed row, as one unit.
    ///
    /// Not idempotent: a retried credit pays twice. Retryable rewards go
    /// through [`LedgerService::mark_task_completed`].
    pub async fn credit(
        &self,
        user_id: &str,
        amount_cents: Cents,
        tx_type: TransactionType,
        description: &str,
    ) -> Result<Transaction, AppError> {
        require_positive(amount_cents)?;
        let entry = Transaction::completed(user_id, tx_type, amount_cents, description);

        match self.repo.credit(entry).await? {
            Guarded::Applied(entry) => {
                info!(user_id, amount_cents, tx_type = %tx_type, "credited balance");
                Ok(entry)
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, amount_cents)),
        }
    }

    /// Decrease the balance, failing if it does not cover `amount_cents`
    /// at commit time.
    pub async fn debit(
        &self,
        user_id: &str,
        amount_cents: Cents,
        tx_type: TransactionType,
        description: &str,
    ) -> Result<Transaction, AppError> {
        require_positive(amount_cents)?;
        let entry = Transaction::completed(user_id, tx_type, -amount_cents, description);

        match self.repo.debit(entry).await? {
            Guarded::Applied(entry) => {
                info!(user_id, amount_cents, tx_type = %tx_type, "debited balance");
                Ok(entry)
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, amount_cents)),
        }
    }

    pub async fn deposit(
        &self,
        user_id: &str,
        amount_cents: Cents,
        reference: &str,
    ) -> Result<Transaction, AppError> {
        self.credit(
            user_id,
            amount_cents,
            TransactionType::Deposit,
            &format!("Deposit ({})", reference),
        )
        .await
    }

    // ========================
    // Withdrawals
    // ========================

    /// Debit, append a pending row and open a review request as one unit,
    /// then remember the destination for next time.
    pub async fn withdraw(
        &self,
        user_id: &str,
        amount_cents: Cents,
        destination: WithdrawalDestination,
    ) -> Result<WithdrawalResult, AppError> {
        require_positive(amount_cents)?;
        if amount_cents < self.config.min_withdrawal {
            return Err(AppError::InvalidAmount(format!(
                "minimum withdrawal is {} cents",
                self.config.min_withdrawal
            )));
        }
        if !destination.is_complete() {
            return Err(AppError::InvalidOperation(
                "withdrawal destination needs an account name and number".into(),
            ));
        }

        let (transaction, request) =
            match self.repo.withdraw(user_id, amount_cents, &destination).await? {
                Guarded::Applied(result) => result,
                Guarded::Rejected(rejection) => {
                    return Err(self.rejected(rejection, user_id, amount_cents));
                }
            };
        info!(user_id, amount_cents, request_id = %request.id, "withdrawal requested");

        if let Err(err) = self.repo.save_withdrawal_details(user_id, &destination).await {
            warn!(user_id, error = %err, "could not save withdrawal details");
        }

        Ok(WithdrawalResult {
            transaction,
            request,
        })
    }

    /// Back-office approval or rejection of a pending withdrawal.
    pub async fn settle_withdrawal(
        &self,
        id: WithdrawalId,
        approve: bool,
    ) -> Result<WithdrawalRequest, AppError> {
        match self.repo.settle_withdrawal(id, approve, Utc::now()).await? {
            Guarded::Applied(request) => {
                info!(request_id = %id, status = %request.status, "withdrawal settled");
                Ok(request)
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, &id.to_string(), 0)),
        }
    }

    pub async fn get_withdrawal(&self, id: WithdrawalId) -> Result<WithdrawalRequest, AppError> {
        self.repo
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                kind: "Withdrawal",
                id: id.to_string(),
            })
    }

    pub async fn list_withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
        user_id: Option<&str>,
    ) -> Result<Vec<WithdrawalRequest>, AppError> {
        Ok(self.repo.list_withdrawals(status, user_id).await?)
    }

    // ========================
    // Tasks and campaigns
    // ========================

    /// Reward a task once. Repeating the call for the same task is a no-op.
    pub async fn mark_task_completed(
        &self,
        user_id: &str,
        task_id: &str,
        reward_cents: Cents,
    ) -> Result<TaskCompletion, AppError> {
        require_positive(reward_cents)?;
        if task_id.trim().is_empty() {
            return Err(AppError::InvalidOperation("task id is required".into()));
        }

        let entry = Transaction::completed(
            user_id,
            TransactionType::Earning,
            reward_cents,
            format!("Completed task {}", task_id),
        );
        match self.repo.mark_task_completed(task_id, entry).await? {
            Guarded::Applied(entry) => {
                info!(user_id, task_id, reward_cents, "task rewarded");
                Ok(TaskCompletion::Credited(entry))
            }
            Guarded::Rejected(Rejection::AlreadyCompleted) => {
                debug!(user_id, task_id, "task already rewarded");
                Ok(TaskCompletion::AlreadyCompleted)
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, reward_cents)),
        }
    }

    /// Conditional increment of a campaign's shared completion counter.
    pub async fn increment_campaign_completion(&self, id: CampaignId) -> Result<i64, AppError> {
        match self.repo.increment_campaign_completion(id).await? {
            Guarded::Applied(count) => Ok(count),
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, &id.to_string(), 0)),
        }
    }

    /// Count the completion, mark the task and pay its reward as one unit.
    /// Completing the same campaign again is a no-op.
    pub async fn complete_campaign_task(
        &self,
        user_id: &str,
        campaign_id: CampaignId,
    ) -> Result<TaskCompletion, AppError> {
        match self
            .repo
            .complete_campaign_task(user_id, campaign_id, Utc::now())
            .await?
        {
            Guarded::Applied((campaign, entry)) => {
                info!(
                    user_id,
                    campaign_id = %campaign_id,
                    completions = campaign.completions,
                    quantity = campaign.quantity,
                    "campaign task rewarded"
                );
                Ok(TaskCompletion::Credited(entry))
            }
            Guarded::Rejected(Rejection::AlreadyCompleted) => {
                debug!(user_id, task_id = %task_key(campaign_id), "campaign task already rewarded");
                Ok(TaskCompletion::AlreadyCompleted)
            }
            Guarded::Rejected(Rejection::ProfileMissing) => Err(AppError::profile_not_found(user_id)),
            Guarded::Rejected(rejection) => {
                Err(self.rejected(rejection, &campaign_id.to_string(), 0))
            }
        }
    }

    /// Publish a campaign, charging the owner `reward * quantity` up front.
    pub async fn create_campaign(
        &self,
        owner_id: &str,
        new: NewCampaign,
    ) -> Result<(Campaign, Transaction), AppError> {
        require_positive(new.reward_cents)?;
        if new.quantity <= 0 {
            return Err(AppError::InvalidAmount("quantity must be positive".into()));
        }
        if new.title.trim().is_empty() || new.link.trim().is_empty() {
            return Err(AppError::InvalidOperation(
                "campaign needs a title and a link".into(),
            ));
        }

        let mut campaign = Campaign::new(owner_id, new.title, new.link, new.reward_cents, new.quantity);
        campaign.description = new.description;
        campaign.category = new.category;

        let cost = campaign
            .total_cost()
            .ok_or_else(|| AppError::InvalidAmount("campaign cost is too large".into()))?;

        match self.repo.create_campaign(&campaign).await? {
            Guarded::Applied(entry) => {
                info!(owner_id, campaign_id = %campaign.id, cost, "campaign created");
                Ok((campaign, entry))
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, owner_id, cost)),
        }
    }

    pub async fn get_campaign(&self, id: CampaignId) -> Result<Campaign, AppError> {
        self.repo
            .get_campaign(id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                kind: "Campaign",
                id: id.to_string(),
            })
    }

    pub async fn list_available_campaigns(&self, user_id: &str) -> Result<Vec<Campaign>, AppError> {
        Ok(self.repo.list_available_campaigns(user_id).await?)
    }

    pub async fn list_campaigns_by_owner(&self, owner_id: &str) -> Result<Vec<Campaign>, AppError> {
        Ok(self.repo.list_campaigns_by_owner(owner_id).await?)
    }

    pub async fn record_campaign_view(&self, id: CampaignId) -> Result<(), AppError> {
        if self.repo.record_campaign_view(id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound {
                kind: "Campaign",
                id: id.to_string(),
            })
        }
    }

    pub async fn list_completed_tasks(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        Ok(self.repo.list_completed_tasks(user_id).await?)
    }

    pub async fn is_task_completed(&self, user_id: &str, task_id: &str) -> Result<bool, AppError> {
        Ok(self.repo.is_task_completed(user_id, task_id).await?)
    }

    // ========================
    // Referrals and ads
    // ========================

    /// Record the referrer of `user_id` and pay them the referral bonus.
    pub async fn apply_referral(
        &self,
        user_id: &str,
        referral_code: &str,
    ) -> Result<ReferralResult, AppError> {
        let code = referral_code.trim().to_ascii_uppercase();
        match self
            .repo
            .apply_referral(user_id, &code, self.config.referral_bonus)
            .await?
        {
            Guarded::Applied((referrer_id, bonus)) => {
                info!(user_id, referrer_id = %referrer_id, "referral applied");
                Ok(ReferralResult { referrer_id, bonus })
            }
            Guarded::Rejected(Rejection::ReferralCodeUnknown) => Err(AppError::NotFound {
                kind: "Referral code",
                id: code,
            }),
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, 0)),
        }
    }

    /// Pay the ad-watch reward, at most `max_ads_per_day` times per day.
    pub async fn reward_ad_watch(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Transaction, AppError> {
        require_positive(self.config.ad_reward)?;
        match self
            .repo
            .reward_ad_watch(user_id, today, self.config.ad_reward, self.config.max_ads_per_day)
            .await?
        {
            Guarded::Applied(entry) => {
                info!(user_id, amount_cents = entry.amount_cents, "ad reward paid");
                Ok(entry)
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, 0)),
        }
    }

    // ========================
    // Payment verification
    // ========================

    pub async fn submit_payment_proof(&self, user_id: &str, reference: &str) -> Result<(), AppError> {
        if reference.trim().is_empty() {
            return Err(AppError::InvalidOperation(
                "payment reference is required".into(),
            ));
        }
        match self.repo.submit_payment_proof(user_id, reference.trim()).await? {
            Guarded::Applied(()) => {
                info!(user_id, "payment proof submitted");
                Ok(())
            }
            Guarded::Rejected(Rejection::WrongPaymentStatus { current }) => {
                Err(AppError::InvalidStatusTransition {
                    from: current,
                    to: PaymentStatus::PendingVerification,
                })
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, 0)),
        }
    }

    /// Verify the joining payment: flips the status, resets the balance to
    /// the configured initial value and appends the joining-fee row.
    pub async fn approve_payment(&self, user_id: &str) -> Result<Transaction, AppError> {
        match self
            .repo
            .approve_payment(user_id, self.config.verified_initial_balance)
            .await?
        {
            Guarded::Applied(entry) => {
                info!(user_id, adjustment = entry.amount_cents, "payment verified");
                Ok(entry)
            }
            Guarded::Rejected(Rejection::WrongPaymentStatus { current }) => {
                Err(AppError::InvalidStatusTransition {
                    from: current,
                    to: PaymentStatus::Verified,
                })
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, 0)),
        }
    }

    // ========================
    // Job subscriptions
    // ========================

    pub async fn subscribe_job_plan(
        &self,
        user_id: &str,
        plan: JobPlan,
        today: NaiveDate,
    ) -> Result<JobSubscription, AppError> {
        let subscription = JobSubscription::starting(plan, today, self.config.plan_duration_days);
        let price = self.config.plan_price(plan);

        match self.repo.subscribe_job_plan(user_id, &subscription, price).await? {
            Guarded::Applied(_) => {
                info!(user_id, plan = %plan, price, "job plan purchased");
                Ok(subscription)
            }
            Guarded::Rejected(rejection) => Err(self.rejected(rejection, user_id, price)),
        }
    }

    /// Current subscription; a counter left from an earlier day is reset on read.
    pub async fn get_job_subscription(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Option<JobSubscription>, AppError> {
        if self.repo.reset_daily_applications(user_id, today).await? {
            debug!(user_id, %today, "daily application counter reset");
        }
        Ok(self.get_profile(user_id).await?.job_subscription)
    }

    pub async fn submit_application(
        &self,
        user_id: &str,
        job_id: &str,
        job_title: &str,
        today: NaiveDate,
    ) -> Result<JobApplication, AppError> {
        if job_id.trim().is_empty() {
            return Err(AppError::InvalidOperation("job id is required".into()));
        }
        let application = JobApplication::new(user_id, job_id, job_title, today);

        match self.repo.submit_application(&application).await? {
            Guarded::Applied(application) => {
                info!(user_id, job_id, "job application submitted");
                Ok(application)
            }
            Guarded::Rejected(rejection) => {
                warn!(user_id, job_id, ?rejection, "job application refused");
                Err(self.rejected(rejection, user_id, 0))
            }
        }
    }

    pub async fn list_applications(&self, user_id: &str) -> Result<Vec<JobApplication>, AppError> {
        Ok(self.repo.list_applications(user_id).await?)
    }

    // ========================
    // Wallet pin
    // ========================

    pub async fn set_wallet_pin(&self, user_id: &str, pin: &str) -> Result<(), AppError> {
        let pin = WalletPin::from_pin(user_id, pin).ok_or(AppError::InvalidPin)?;
        self.store_pin(user_id, Some(&pin)).await
    }

    pub async fn skip_wallet_pin(&self, user_id: &str) -> Result<(), AppError> {
        self.store_pin(user_id, Some(&WalletPin::Skipped)).await
    }

    pub async fn clear_wallet_pin(&self, user_id: &str) -> Result<(), AppError> {
        self.store_pin(user_id, None).await
    }

    /// Whether `pin` opens the wallet view. Unset or skipped pins always do.
    pub async fn verify_wallet_pin(&self, user_id: &str, pin: &str) -> Result<bool, AppError> {
        let profile = self.get_profile(user_id).await?;
        Ok(profile
            .wallet_pin
            .map(|stored| stored.unlocks(user_id, pin))
            .unwrap_or(true))
    }

    async fn store_pin(&self, user_id: &str, pin: Option<&WalletPin>) -> Result<(), AppError> {
        if self.repo.set_wallet_pin(user_id, pin).await? {
            Ok(())
        } else {
            Err(AppError::profile_not_found(user_id))
        }
    }

    // ========================
    // Ledger queries and integrity
    // ========================

    /// A user's ledger in commit order, or the newest `limit` rows first.
    pub async fn list_transactions(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, AppError> {
        match limit {
            Some(limit) => Ok(self.repo.list_recent_transactions(user_id, limit).await?),
            None => Ok(self.repo.list_transactions(user_id).await?),
        }
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                kind: "Transaction",
                id: id.to_string(),
            })
    }

    /// Compare one profile's stored balance with its ledger.
    pub async fn check_integrity(&self, user_id: &str) -> Result<BalanceCheck, AppError> {
        let profile = self.get_profile(user_id).await?;
        let transactions = self.repo.list_transactions(user_id).await?;
        Ok(BalanceCheck::new(user_id, profile.balance_cents, &transactions))
    }

    pub async fn check_all(&self) -> Result<IntegrityReport, AppError> {
        let checks = self.repo.balance_checks().await?;
        let overfilled = self.repo.count_overfilled_campaigns().await?;
        let report = IntegrityReport::from_checks(checks, overfilled);
        if !report.is_healthy() {
            warn!(
                mismatches = report.mismatches.len(),
                overfilled_campaigns = report.overfilled_campaigns,
                "ledger integrity check failed"
            );
        }
        Ok(report)
    }

    pub async fn earnings_summary(&self, user_id: &str) -> Result<EarningsReport, AppError> {
        let profile = self.get_profile(user_id).await?;
        let transactions = self.repo.list_transactions(user_id).await?;
        let pending = self
            .repo
            .list_withdrawals(Some(WithdrawalStatus::Pending), Some(user_id))
            .await?;
        let completed_tasks = self.repo.list_completed_tasks(user_id).await?.len();

        Ok(EarningsReport {
            user_id: profile.id,
            balance: profile.balance_cents,
            ledger_balance: compute_balance(&transactions),
            total_earned: total_earned(&transactions),
            by_type: totals_by_type(&transactions),
            pending_withdrawals: pending
                .iter()
                .map(|r| r.amount_cents)
                .fold(0, Cents::saturating_add),
            completed_tasks,
            transaction_count: transactions.len(),
        })
    }

    fn rejected(&self, rejection: Rejection, subject: &str, required: Cents) -> AppError {
        warn!(subject, ?rejection, "operation rejected");
        AppError::from_rejection(rejection, subject, required)
    }
}

fn require_positive(amount_cents: Cents) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidAmount("Amount must be positive".to_string()));
    }
    Ok(())
}
