use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{LedgerService, NewCampaign, TaskCompletion, WalletSession};
use crate::domain::{
    JobPlan, PayoutMethod, TransactionType, WithdrawalDestination, WithdrawalStatus, format_cents,
    parse_cents,
};
use crate::settings::LedgerConfig;

/// Taskwallet - earnings ledger for a task marketplace
#[derive(Parser)]
#[command(name = "taskwallet")]
#[command(about = "Balances, rewards and withdrawals for a task-and-earn marketplace")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "taskwallet.db")]
    pub database: String,

    /// Configuration file (TOML, optional)
    #[arg(short, long, default_value = "taskwallet.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Profile management commands
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Show a user's balance
    Balance {
        /// User id or username
        user: String,
    },

    /// Credit a user's balance
    Credit {
        user: String,

        /// Amount (e.g., "2.50" or "2")
        amount: String,

        /// Transaction type (e.g., EARNING, ADJUSTMENT)
        #[arg(short = 't', long = "type", default_value = "ADJUSTMENT")]
        tx_type: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Debit a user's balance
    Debit {
        user: String,

        /// Amount (e.g., "2.50" or "2")
        amount: String,

        /// Transaction type (e.g., ADJUSTMENT)
        #[arg(short = 't', long = "type", default_value = "ADJUSTMENT")]
        tx_type: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Record a deposit
    Deposit {
        user: String,

        amount: String,

        /// Payment reference
        #[arg(short, long)]
        reference: String,
    },

    /// Request a withdrawal
    Withdraw {
        user: String,

        amount: String,

        /// Payout method: mobile_money, bank_transfer, paypal, crypto
        /// (omit to reuse the saved destination)
        #[arg(short, long)]
        method: Option<String>,

        #[arg(long)]
        account_name: Option<String>,

        #[arg(long)]
        account_number: Option<String>,

        /// Bank or provider name
        #[arg(long)]
        institution: Option<String>,

        /// Wallet pin, if one is set
        #[arg(long)]
        pin: Option<String>,
    },

    /// List withdrawal requests
    Withdrawals {
        /// Filter by status: pending, approved, rejected
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Approve or reject a pending withdrawal
    Settle {
        /// Withdrawal request ID
        id: String,

        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        #[arg(long)]
        reject: bool,
    },

    /// Campaign commands
    #[command(subcommand)]
    Campaign(CampaignCommands),

    /// Reward a completed task (once per task)
    Task {
        user: String,

        /// Task identifier
        task_id: String,

        /// Reward amount
        reward: String,
    },

    /// Apply a referral code
    Referral {
        user: String,

        code: String,
    },

    /// Reward an ad watch
    Ad {
        user: String,

        /// Day of the watch (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Joining payment verification
    #[command(subcommand)]
    Payment(PaymentCommands),

    /// Job plan and application commands
    #[command(subcommand)]
    Job(JobCommands),

    /// Wallet pin commands
    #[command(subcommand)]
    Pin(PinCommands),

    /// List a user's transactions
    Transactions {
        user: String,

        /// Show only the most recent N transactions
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Verify that balances match the ledger
    Check {
        /// Check one user (omit for all)
        user: Option<String>,
    },

    /// Earnings summary for a user
    Report {
        user: String,
    },

    /// Export a user's data to CSV or JSON
    Export {
        user: String,

        /// What to export: transactions, withdrawals, snapshot
        #[arg(default_value = "transactions")]
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Create a profile
    Create {
        /// User id issued by the identity provider
        id: String,

        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        phone: Option<String>,
    },

    /// Show a profile
    Show { user: String },

    /// List all profiles
    List,
}

#[derive(Subcommand)]
pub enum CampaignCommands {
    /// Publish a campaign, paying reward x quantity up front
    Create {
        /// Owner user id
        owner: String,

        #[arg(short, long)]
        title: String,

        #[arg(short, long)]
        link: String,

        /// Reward per completion
        #[arg(short, long)]
        reward: String,

        /// Number of completions offered
        #[arg(short, long)]
        quantity: i64,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        category: Option<String>,
    },

    /// Campaigns a user can still complete
    Available { user: String },

    /// Campaigns owned by a user
    Mine { owner: String },

    /// Record a campaign view
    View { id: String },

    /// Complete a campaign task and collect its reward
    Complete { user: String, id: String },
}

#[derive(Subcommand)]
pub enum PaymentCommands {
    /// Submit proof of the joining payment
    Submit { user: String, reference: String },

    /// Approve a submitted payment
    Approve { user: String },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// Buy a job plan: basic, standard, premium
    Subscribe {
        user: String,

        plan: String,

        /// Start day (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Show the current job subscription
    Status {
        user: String,

        #[arg(long)]
        date: Option<String>,
    },

    /// Apply for a job
    Apply {
        user: String,

        job_id: String,

        #[arg(short, long, default_value = "")]
        title: String,

        #[arg(long)]
        date: Option<String>,
    },

    /// List a user's applications
    Applications { user: String },
}

#[derive(Subcommand)]
pub enum PinCommands {
    /// Set a 4-digit wallet pin
    Set { user: String, pin: String },

    /// Mark the pin prompt as skipped
    Skip { user: String },

    /// Remove the wallet pin
    Clear { user: String },

    /// Check a pin
    Verify { user: String, pin: String },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = LedgerConfig::load(Some(self.config.as_path()))?;

        if let Commands::Init = self.command {
            LedgerService::init(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&self.database, config).await?;

        match self.command {
            Commands::Init => {}

            Commands::Profile(cmd) => run_profile_command(&service, cmd).await?,

            Commands::Balance { user } => {
                let profile = service.find_profile(&user).await?;
                println!("{}: {}", profile.username, format_cents(profile.balance_cents));
            }

            Commands::Credit {
                user,
                amount,
                tx_type,
                description,
            } => {
                let user_id = service.find_profile(&user).await?.id;
                let entry = service
                    .credit(
                        &user_id,
                        parse_amount(&amount)?,
                        parse_tx_type(&tx_type)?,
                        description.as_deref().unwrap_or("Manual credit"),
                    )
                    .await?;
                println!("Credited {} to {} ({})", format_cents(entry.amount_cents), user, entry.id);
            }

            Commands::Debit {
                user,
                amount,
                tx_type,
                description,
            } => {
                let user_id = service.find_profile(&user).await?.id;
                let entry = service
                    .debit(
                        &user_id,
                        parse_amount(&amount)?,
                        parse_tx_type(&tx_type)?,
                        description.as_deref().unwrap_or("Manual debit"),
                    )
                    .await?;
                println!("Debited {} from {} ({})", format_cents(-entry.amount_cents), user, entry.id);
            }

            Commands::Deposit {
                user,
                amount,
                reference,
            } => {
                let user_id = service.find_profile(&user).await?.id;
                let entry = service
                    .deposit(&user_id, parse_amount(&amount)?, &reference)
                    .await?;
                println!("Deposited {} for {}", format_cents(entry.amount_cents), user);
            }

            Commands::Withdraw {
                user,
                amount,
                method,
                account_name,
                account_number,
                institution,
                pin,
            } => {
                run_withdraw_command(
                    &service,
                    &user,
                    &amount,
                    method,
                    account_name,
                    account_number,
                    institution,
                    pin,
                )
                .await?;
            }

            Commands::Withdrawals { status, user } => {
                let status = status
                    .map(|s| {
                        WithdrawalStatus::from_str(&s).ok_or_else(|| {
                            anyhow!("Invalid status '{}'. Valid: pending, approved, rejected", s)
                        })
                    })
                    .transpose()?;
                let user_id = match user {
                    Some(user) => Some(service.find_profile(&user).await?.id),
                    None => None,
                };
                let requests = service.list_withdrawals(status, user_id.as_deref()).await?;

                if requests.is_empty() {
                    println!("No withdrawal requests found.");
                } else {
                    println!(
                        "{:<36} {:<16} {:>10} {:<9} DESTINATION",
                        "ID", "USER", "AMOUNT", "STATUS"
                    );
                    println!("{}", "-".repeat(100));
                    for request in requests {
                        println!(
                            "{:<36} {:<16} {:>10} {:<9} {}",
                            request.id,
                            truncate(&request.user_id, 16),
                            format_cents(request.amount_cents),
                            request.status,
                            request.destination.summary()
                        );
                    }
                }
            }

            Commands::Settle {
                id,
                approve,
                reject,
            } => {
                if approve == reject {
                    bail!("Pass exactly one of --approve or --reject");
                }
                let id = parse_id(&id, "withdrawal")?;
                let request = service.settle_withdrawal(id, approve).await?;
                println!(
                    "Withdrawal {} {}: {} to {}",
                    request.id,
                    request.status,
                    format_cents(request.amount_cents),
                    request.destination.summary()
                );
            }

            Commands::Campaign(cmd) => run_campaign_command(&service, cmd).await?,

            Commands::Task {
                user,
                task_id,
                reward,
            } => {
                let user_id = service.find_profile(&user).await?.id;
                match service
                    .mark_task_completed(&user_id, &task_id, parse_amount(&reward)?)
                    .await?
                {
                    TaskCompletion::Credited(entry) => {
                        println!("Task {} rewarded: {}", task_id, format_cents(entry.amount_cents))
                    }
                    TaskCompletion::AlreadyCompleted => {
                        println!("Task {} was already completed; nothing paid.", task_id)
                    }
                }
            }

            Commands::Referral { user, code } => {
                let user_id = service.find_profile(&user).await?.id;
                let result = service.apply_referral(&user_id, &code).await?;
                match result.bonus {
                    Some(bonus) => println!(
                        "Referred by {}; bonus of {} paid",
                        result.referrer_id,
                        format_cents(bonus.amount_cents)
                    ),
                    None => println!("Referred by {}", result.referrer_id),
                }
            }

            Commands::Ad { user, date } => {
                let user_id = service.find_profile(&user).await?.id;
                let today = parse_day(date.as_deref())?;
                let entry = service.reward_ad_watch(&user_id, today).await?;
                let profile = service.get_profile(&user_id).await?;
                println!(
                    "Ad reward: {} ({}/{} today)",
                    format_cents(entry.amount_cents),
                    profile.ads_watched_on(today),
                    service.config().max_ads_per_day
                );
            }

            Commands::Payment(cmd) => run_payment_command(&service, cmd).await?,

            Commands::Job(cmd) => run_job_command(&service, cmd).await?,

            Commands::Pin(cmd) => run_pin_command(&service, cmd).await?,

            Commands::Transactions { user, limit } => {
                let user_id = service.find_profile(&user).await?.id;
                let mut transactions = service.list_transactions(&user_id, limit).await?;
                if limit.is_some() {
                    transactions.reverse();
                }

                if transactions.is_empty() {
                    println!("No transactions found.");
                } else {
                    println!(
                        "{:<12} {:<16} {:<10} {:>10} DESCRIPTION",
                        "DATE", "TYPE", "STATUS", "AMOUNT"
                    );
                    println!("{}", "-".repeat(80));
                    for tx in transactions {
                        println!(
                            "{:<12} {:<16} {:<10} {:>10} {}",
                            tx.timestamp.format("%Y-%m-%d"),
                            tx.tx_type,
                            tx.status,
                            format_cents(tx.amount_cents),
                            truncate(&tx.description, 30)
                        );
                    }
                }
            }

            Commands::Check { user } => run_check_command(&service, user).await?,

            Commands::Report { user } => {
                let user_id = service.find_profile(&user).await?.id;
                let report = service.earnings_summary(&user_id).await?;

                println!("Earnings for {}", report.user_id);
                println!("  Balance:             {:>12}", format_cents(report.balance));
                println!("  Total earned:        {:>12}", format_cents(report.total_earned));
                println!("  Total spent:         {:>12}", format_cents(report.total_spent()));
                println!(
                    "  Pending withdrawals: {:>12}",
                    format_cents(report.pending_withdrawals)
                );
                println!("  Completed tasks:     {:>12}", report.completed_tasks);
                println!();
                println!("By type:");
                for (tx_type, total) in &report.by_type {
                    println!("  {:<18} {:>12}", format!("{}:", tx_type), format_cents(*total));
                }
                if !report.is_consistent() {
                    println!();
                    println!(
                        "Warning: stored balance differs from ledger ({})",
                        format_cents(report.ledger_balance)
                    );
                }
            }

            Commands::Export {
                user,
                export_type,
                output,
            } => {
                let user_id = service.find_profile(&user).await?.id;
                run_export_command(&service, &user_id, &export_type, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn run_profile_command(service: &LedgerService, cmd: ProfileCommands) -> Result<()> {
    match cmd {
        ProfileCommands::Create {
            id,
            username,
            email,
            phone,
        } => {
            let profile = service.create_profile(&id, &username, &email, phone).await?;
            println!(
                "Created profile: {} (referral code {})",
                profile.username, profile.referral_code
            );
        }

        ProfileCommands::Show { user } => {
            let profile = service.find_profile(&user).await?;
            let today = Utc::now().date_naive();

            println!("Profile: {}", profile.username);
            println!("  ID:             {}", profile.id);
            println!("  Email:          {}", profile.email);
            if let Some(phone) = &profile.phone {
                println!("  Phone:          {}", phone);
            }
            println!("  Balance:        {}", format_cents(profile.balance_cents));
            println!("  Payment:        {}", profile.payment_status);
            println!("  Referral code:  {}", profile.referral_code);
            if let Some(referrer) = &profile.referred_by {
                println!("  Referred by:    {}", referrer);
            }
            match &profile.job_subscription {
                Some(sub) => println!(
                    "  Job plan:       {} until {}{}",
                    sub.plan,
                    sub.expiry_date,
                    if sub.is_active(today) { "" } else { " (expired)" }
                ),
                None => println!("  Job plan:       none"),
            }
            println!("  Ads today:      {}", profile.ads_watched_on(today));
            if let Some(dest) = &profile.saved_withdrawal_details {
                println!("  Payout:         {}", dest.summary());
            }
            println!(
                "  Wallet pin:     {}",
                if profile.wallet_locked() { "set" } else { "not set" }
            );
            println!(
                "  Created:        {}",
                profile.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        ProfileCommands::List => {
            let profiles = service.list_profiles().await?;
            if profiles.is_empty() {
                println!("No profiles found.");
            } else {
                println!(
                    "{:<20} {:<20} {:<22} {:>10}",
                    "USERNAME", "ID", "PAYMENT", "BALANCE"
                );
                println!("{}", "-".repeat(75));
                for profile in profiles {
                    println!(
                        "{:<20} {:<20} {:<22} {:>10}",
                        truncate(&profile.username, 20),
                        truncate(&profile.id, 20),
                        profile.payment_status,
                        format_cents(profile.balance_cents)
                    );
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_withdraw_command(
    service: &LedgerService,
    user: &str,
    amount: &str,
    method: Option<String>,
    account_name: Option<String>,
    account_number: Option<String>,
    institution: Option<String>,
    pin: Option<String>,
) -> Result<()> {
    let amount_cents = parse_amount(amount)?;
    let profile = service.find_profile(user).await?;

    let destination = match method {
        Some(method) => {
            let method = PayoutMethod::from_str(&method).ok_or_else(|| {
                anyhow!(
                    "Invalid payout method '{}'. Valid: mobile_money, bank_transfer, paypal, crypto",
                    method
                )
            })?;
            let mut dest = WithdrawalDestination::new(
                method,
                account_name.context("--account-name is required")?,
                account_number.context("--account-number is required")?,
            );
            if let Some(institution) = institution {
                dest = dest.with_institution(institution);
            }
            dest
        }
        None => profile
            .saved_withdrawal_details
            .clone()
            .context("No saved payout destination; pass --method and account details")?,
    };

    let mut session = WalletSession::open(service.clone(), &profile.id).await?;
    if !session.is_unlocked() {
        let pin = pin.context("Wallet is locked; pass --pin")?;
        if !session.unlock(&pin).await? {
            bail!("Incorrect wallet pin");
        }
    }

    let result = session.withdraw(amount_cents, destination).await?;
    println!(
        "Withdrawal requested: {} to {}",
        format_cents(result.request.amount_cents),
        result.request.destination.summary()
    );
    println!("  Request ID: {}", result.request.id);
    println!("  Balance:    {}", format_cents(session.balance()));
    Ok(())
}

async fn run_campaign_command(service: &LedgerService, cmd: CampaignCommands) -> Result<()> {
    match cmd {
        CampaignCommands::Create {
            owner,
            title,
            link,
            reward,
            quantity,
            description,
            category,
        } => {
            let owner_id = service.find_profile(&owner).await?.id;
            let (campaign, funding) = service
                .create_campaign(
                    &owner_id,
                    NewCampaign {
                        title,
                        description,
                        link,
                        category,
                        reward_cents: parse_amount(&reward)?,
                        quantity,
                    },
                )
                .await?;
            println!("Created campaign: {} ({})", campaign.title, campaign.id);
            println!(
                "  {} x {} = {} charged",
                campaign.quantity,
                format_cents(campaign.reward_cents),
                format_cents(-funding.amount_cents)
            );
        }

        CampaignCommands::Available { user } => {
            let user_id = service.find_profile(&user).await?.id;
            let campaigns = service.list_available_campaigns(&user_id).await?;
            if campaigns.is_empty() {
                println!("No campaigns available.");
            } else {
                println!(
                    "{:<36} {:<30} {:>8} {:>9}",
                    "ID", "TITLE", "REWARD", "REMAINING"
                );
                println!("{}", "-".repeat(86));
                for campaign in campaigns {
                    println!(
                        "{:<36} {:<30} {:>8} {:>9}",
                        campaign.id,
                        truncate(&campaign.title, 30),
                        format_cents(campaign.reward_cents),
                        campaign.remaining()
                    );
                }
            }
        }

        CampaignCommands::Mine { owner } => {
            let owner_id = service.find_profile(&owner).await?.id;
            let campaigns = service.list_campaigns_by_owner(&owner_id).await?;
            if campaigns.is_empty() {
                println!("No campaigns found.");
            } else {
                println!(
                    "{:<36} {:<30} {:>11} {:>6}",
                    "ID", "TITLE", "COMPLETIONS", "VIEWS"
                );
                println!("{}", "-".repeat(86));
                for campaign in campaigns {
                    println!(
                        "{:<36} {:<30} {:>11} {:>6}",
                        campaign.id,
                        truncate(&campaign.title, 30),
                        format!("{}/{}", campaign.completions, campaign.quantity),
                        campaign.views
                    );
                }
            }
        }

        CampaignCommands::View { id } => {
            let id = parse_id(&id, "campaign")?;
            service.record_campaign_view(id).await?;
            let campaign = service.get_campaign(id).await?;
            println!("{}: {}", campaign.title, campaign.link);
            if let Some(description) = &campaign.description {
                println!("  {}", description);
            }
            println!(
                "  Reward {} ({} of {} left)",
                format_cents(campaign.reward_cents),
                campaign.remaining(),
                campaign.quantity
            );
        }

        CampaignCommands::Complete { user, id } => {
            let user_id = service.find_profile(&user).await?.id;
            let id = parse_id(&id, "campaign")?;
            match service.complete_campaign_task(&user_id, id).await? {
                TaskCompletion::Credited(entry) => {
                    println!("Campaign task rewarded: {}", format_cents(entry.amount_cents))
                }
                TaskCompletion::AlreadyCompleted => {
                    println!("Campaign task was already completed; nothing paid.")
                }
            }
        }
    }
    Ok(())
}

async fn run_payment_command(service: &LedgerService, cmd: PaymentCommands) -> Result<()> {
    match cmd {
        PaymentCommands::Submit { user, reference } => {
            let user_id = service.find_profile(&user).await?.id;
            service.submit_payment_proof(&user_id, &reference).await?;
            println!("Payment proof submitted for {}; awaiting verification.", user);
        }

        PaymentCommands::Approve { user } => {
            let user_id = service.find_profile(&user).await?.id;
            let entry = service.approve_payment(&user_id).await?;
            println!(
                "Payment verified for {}; balance reset to {} (adjustment {})",
                user,
                format_cents(service.config().verified_initial_balance),
                format_cents(entry.amount_cents)
            );
        }
    }
    Ok(())
}

async fn run_job_command(service: &LedgerService, cmd: JobCommands) -> Result<()> {
    match cmd {
        JobCommands::Subscribe { user, plan, date } => {
            let user_id = service.find_profile(&user).await?.id;
            let plan = JobPlan::from_str(&plan).ok_or_else(|| {
                anyhow!("Invalid plan '{}'. Valid: basic, standard, premium", plan)
            })?;
            let subscription = service
                .subscribe_job_plan(&user_id, plan, parse_day(date.as_deref())?)
                .await?;
            println!(
                "Subscribed to {} plan until {}",
                subscription.plan, subscription.expiry_date
            );
        }

        JobCommands::Status { user, date } => {
            let user_id = service.find_profile(&user).await?.id;
            let today = parse_day(date.as_deref())?;
            match service.get_job_subscription(&user_id, today).await? {
                None => println!("No job plan."),
                Some(sub) => {
                    println!("Plan:      {}", sub.plan);
                    println!(
                        "Expires:   {}{}",
                        sub.expiry_date,
                        if sub.is_active(today) { "" } else { " (expired)" }
                    );
                    match sub.remaining_today(today) {
                        Some(left) => println!(
                            "Today:     {} applied, {} left",
                            sub.applications_on(today),
                            left
                        ),
                        None => println!("Today:     {} applied, unlimited", sub.applications_on(today)),
                    }
                }
            }
        }

        JobCommands::Apply {
            user,
            job_id,
            title,
            date,
        } => {
            let user_id = service.find_profile(&user).await?.id;
            let application = service
                .submit_application(&user_id, &job_id, &title, parse_day(date.as_deref())?)
                .await?;
            println!("Applied for {} ({})", application.job_id, application.id);
        }

        JobCommands::Applications { user } => {
            let user_id = service.find_profile(&user).await?.id;
            let applications = service.list_applications(&user_id).await?;
            if applications.is_empty() {
                println!("No applications found.");
            } else {
                println!("{:<12} {:<20} {:<30} STATUS", "DATE", "JOB", "TITLE");
                println!("{}", "-".repeat(75));
                for app in applications {
                    println!(
                        "{:<12} {:<20} {:<30} {}",
                        app.applied_on,
                        truncate(&app.job_id, 20),
                        truncate(&app.job_title, 30),
                        app.status
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_pin_command(service: &LedgerService, cmd: PinCommands) -> Result<()> {
    match cmd {
        PinCommands::Set { user, pin } => {
            let user_id = service.find_profile(&user).await?.id;
            service.set_wallet_pin(&user_id, &pin).await?;
            println!("Wallet pin set.");
        }
        PinCommands::Skip { user } => {
            let user_id = service.find_profile(&user).await?.id;
            service.skip_wallet_pin(&user_id).await?;
            println!("Wallet pin skipped.");
        }
        PinCommands::Clear { user } => {
            let user_id = service.find_profile(&user).await?.id;
            service.clear_wallet_pin(&user_id).await?;
            println!("Wallet pin removed.");
        }
        PinCommands::Verify { user, pin } => {
            let user_id = service.find_profile(&user).await?.id;
            if service.verify_wallet_pin(&user_id, &pin).await? {
                println!("Pin accepted.");
            } else {
                bail!("Incorrect wallet pin");
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService, user: Option<String>) -> Result<()> {
    if let Some(user) = user {
        let user_id = service.find_profile(&user).await?.id;
        let check = service.check_integrity(&user_id).await?;
        println!("Stored balance: {:>12}", format_cents(check.stored_balance));
        println!("Ledger balance: {:>12}", format_cents(check.ledger_balance));
        println!("Transactions:   {:>12} ({} pending)", check.transaction_count, check.pending_count);
        if !check.is_consistent() {
            bail!("Balance drifted from ledger by {}", format_cents(check.drift()));
        }
        println!("Balance is consistent.");
        return Ok(());
    }

    println!("Checking ledger integrity...\n");
    let report = service.check_all().await?;

    println!("Profiles:     {}", report.profiles_checked);
    println!("Transactions: {}", report.transactions_checked);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for check in &report.mismatches {
            println!(
                "  - {}: stored {} but ledger sums to {}",
                check.user_id,
                format_cents(check.stored_balance),
                format_cents(check.ledger_balance)
            );
        }
        if report.overfilled_campaigns > 0 {
            println!(
                "  - {} campaign(s) completed past their quantity",
                report.overfilled_campaigns
            );
        }
        bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    user_id: &str,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(user_id, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "withdrawals" => {
            let count = exporter.export_withdrawals_csv(Some(user_id), writer).await?;
            if output.is_some() {
                eprintln!("Exported {} withdrawal requests", count);
            }
        }
        "snapshot" => {
            let snapshot = exporter.export_snapshot_json(user_id, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported snapshot: {} transactions, {} withdrawals, {} campaigns",
                    snapshot.transactions.len(),
                    snapshot.withdrawals.len(),
                    snapshot.campaigns.len()
                );
            }
        }
        _ => {
            bail!(
                "Invalid export type '{}'. Valid types: transactions, withdrawals, snapshot",
                export_type
            );
        }
    }

    Ok(())
}

fn parse_amount(amount: &str) -> Result<i64> {
    parse_cents(amount).context("Invalid amount format. Use '50.00' or '50'")
}

fn parse_tx_type(s: &str) -> Result<TransactionType> {
    TransactionType::from_str(s).ok_or_else(|| {
        let valid: Vec<&str> = TransactionType::ALL.iter().map(|t| t.as_str()).collect();
        anyhow!("Invalid transaction type '{}'. Valid: {}", s, valid.join(", "))
    })
}

fn parse_id(s: &str, kind: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid {} ID format (expected UUID)", kind))
}

/// Parse YYYY-MM-DD, defaulting to today (UTC).
fn parse_day(date: Option<&str>) -> Result<NaiveDate> {
    match date {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", s)),
        None => Ok(Utc::now().date_naive()),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day(Some("2024-03-01")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(parse_day(Some("01/03/2024")).is_err());
        assert!(parse_day(None).is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long campaign title", 10), "a long ...");
    }

    #[test]
    fn test_parse_tx_type() {
        assert_eq!(parse_tx_type("earning").unwrap(), TransactionType::Earning);
        assert!(parse_tx_type("bogus").is_err());
    }

    #[test]
    fn test_cli_parses_withdraw() {
        let cli = Cli::try_parse_from([
            "taskwallet",
            "withdraw",
            "ada",
            "25.00",
            "--method",
            "mobile_money",
            "--account-name",
            "Ada",
            "--account-number",
            "0700",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Withdraw { .. }));
    }
}
