use std::path::Path;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::domain::{Cents, DEFAULT_PLAN_DURATION_DAYS, JobPlan};

/// Prefix for environment overrides, e.g. `TASKWALLET__REFERRAL_BONUS=500`.
pub const ENV_PREFIX: &str = "TASKWALLET";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlanPrices {
    pub basic: Cents,
    pub standard: Cents,
    pub premium: Cents,
}

impl Default for PlanPrices {
    fn default() -> Self {
        Self {
            basic: 500,
            standard: 1200,
            premium: 2500,
        }
    }
}

/// Reward amounts and limits. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Paid to the referrer when a referral code is applied
    pub referral_bonus: Cents,
    pub ad_reward: Cents,
    pub max_ads_per_day: u32,
    /// Balance a profile is reset to when its joining payment is verified
    pub verified_initial_balance: Cents,
    pub min_withdrawal: Cents,
    pub plan_prices: PlanPrices,
    pub plan_duration_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            referral_bonus: 500,
            ad_reward: 10,
            max_ads_per_day: 10,
            verified_initial_balance: 0,
            min_withdrawal: 500,
            plan_prices: PlanPrices::default(),
            plan_duration_days: DEFAULT_PLAN_DURATION_DAYS,
        }
    }
}

impl LedgerConfig {
    /// Load from an optional TOML file layered under `TASKWALLET__*`
    /// environment variables. A missing file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let config: LedgerConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.referral_bonus < 0 || self.ad_reward < 0 {
            bail!("Rewards cannot be negative");
        }
        if self.verified_initial_balance < 0 {
            bail!("verified_initial_balance cannot be negative");
        }
        if self.min_withdrawal <= 0 {
            bail!("min_withdrawal must be positive");
        }
        let prices = &self.plan_prices;
        if prices.basic < 0 || prices.standard < 0 || prices.premium < 0 {
            bail!("Plan prices cannot be negative");
        }
        if self.plan_duration_days <= 0 {
            bail!("plan_duration_days must be positive");
        }
        Ok(())
    }

    pub fn plan_price(&self, plan: JobPlan) -> Cents {
        match plan {
            JobPlan::Basic => self.plan_prices.basic,
            JobPlan::Standard => self.plan_prices.standard,
            JobPlan::Premium => self.plan_prices.premium,
        }
    }
}
