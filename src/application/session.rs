use std::future::Future;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::domain::{
    CampaignId, Cents, Transaction, UserId, UserProfile, WithdrawalDestination,
};

use super::{AppError, LedgerService, TaskCompletion, WithdrawalResult};

/// Client-side mirror of one user's wallet.
///
/// Balance-changing calls are applied to the mirror before the service
/// confirms them. On success the mirror is replaced with committed state;
/// on failure the optimistic change is reverted.
pub struct WalletSession {
    service: LedgerService,
    user_id: UserId,
    profile: UserProfile,
    transactions: Vec<Transaction>,
    unlocked: bool,
    stale: bool,
}

impl WalletSession {
    /// Load the committed profile and ledger for `user_id`.
    pub async fn open(service: LedgerService, user_id: &str) -> Result<Self, AppError> {
        let profile = service.get_profile(user_id).await?;
        let transactions = service.list_transactions(user_id, None).await?;
        Ok(Self {
            unlocked: !profile.wallet_locked(),
            service,
            user_id: user_id.to_string(),
            profile,
            transactions,
            stale: false,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn balance(&self) -> Cents {
        self.profile.balance_cents
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// True when a confirmed change could not be re-read; call `refresh`.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Open the wallet view with the pin. Returns whether it unlocked.
    pub async fn unlock(&mut self, pin: &str) -> Result<bool, AppError> {
        self.unlocked = self.service.verify_wallet_pin(&self.user_id, pin).await?;
        Ok(self.unlocked)
    }

    /// Replace the mirror with committed state.
    pub async fn refresh(&mut self) -> Result<(), AppError> {
        self.profile = self.service.get_profile(&self.user_id).await?;
        self.transactions = self.service.list_transactions(&self.user_id, None).await?;
        self.stale = false;
        Ok(())
    }

    pub async fn withdraw(
        &mut self,
        amount_cents: Cents,
        destination: WithdrawalDestination,
    ) -> Result<WithdrawalResult, AppError> {
        if !self.unlocked {
            return Err(AppError::InvalidOperation("wallet is locked".into()));
        }
        self.optimistic(-amount_cents, |service, user_id| async move {
            service.withdraw(&user_id, amount_cents, destination).await
        })
        .await
    }

    /// Complete a campaign, showing `reward_cents` before it is confirmed.
    pub async fn complete_campaign_task(
        &mut self,
        campaign_id: CampaignId,
        reward_cents: Cents,
    ) -> Result<TaskCompletion, AppError> {
        self.optimistic(reward_cents, |service, user_id| async move {
            service.complete_campaign_task(&user_id, campaign_id).await
        })
        .await
    }

    pub async fn watch_ad(&mut self, today: NaiveDate) -> Result<Transaction, AppError> {
        let reward = self.service.config().ad_reward;
        self.optimistic(reward, |service, user_id| async move {
            service.reward_ad_watch(&user_id, today).await
        })
        .await
    }

    async fn optimistic<T, F, Fut>(&mut self, delta: Cents, op: F) -> Result<T, AppError>
    where
        F: FnOnce(LedgerService, UserId) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let confirmed = self.profile.balance_cents;
        self.profile.balance_cents = confirmed.saturating_add(delta);

        match op(self.service.clone(), self.user_id.clone()).await {
            Ok(value) => {
                if let Err(err) = self.refresh().await {
                    warn!(user_id = %self.user_id, error = %err, "could not refresh wallet session");
                    self.stale = true;
                }
                Ok(value)
            }
            Err(err) => {
                debug!(user_id = %self.user_id, error = %err, "reverting optimistic change");
                self.profile.balance_cents = confirmed;
                if err.is_indeterminate() {
                    self.stale = true;
                }
                Err(err)
            }
        }
    }
}
