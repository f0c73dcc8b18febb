use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Cents, Transaction, TransactionType, UserId};

/// Balance implied by a transaction log: the sum of every row that has not
/// failed. Pending withdrawals count, since their debit already happened.
pub fn compute_balance(transactions: &[Transaction]) -> Cents {
    let amounts = transactions
        .iter()
        .filter(|tx| tx.status.counts_toward_balance())
        .map(|tx| tx.amount_cents);
    sum_cents(amounts)
}

/// Exact sum of `amounts`, clamped to the `Cents` range.
fn sum_cents(amounts: impl Iterator<Item = Cents>) -> Cents {
    let total: i128 = amounts.map(i128::from).sum();
    Cents::try_from(total).unwrap_or(if total < 0 { Cents::MIN } else { Cents::MAX })
}

/// Non-failed totals per transaction type.
pub fn totals_by_type(transactions: &[Transaction]) -> BTreeMap<String, Cents> {
    let mut totals = BTreeMap::new();
    for tx in transactions
        .iter()
        .filter(|tx| tx.status.counts_toward_balance())
    {
        let total = totals.entry(tx.tx_type.as_str().to_string()).or_insert(0);
        *total = Cents::saturating_add(*total, tx.amount_cents);
    }
    totals
}

/// Sum of rewards earned (as opposed to deposited or adjusted).
pub fn total_earned(transactions: &[Transaction]) -> Cents {
    let amounts = transactions
        .iter()
        .filter(|tx| tx.status.counts_toward_balance())
        .filter(|tx| {
            matches!(
                tx.tx_type,
                TransactionType::Earning | TransactionType::ReferralBonus | TransactionType::AdReward
            )
        })
        .map(|tx| tx.amount_cents);
    sum_cents(amounts)
}

/// Outcome of comparing a profile's stored balance with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub user_id: UserId,
    pub stored_balance: Cents,
    pub ledger_balance: Cents,
    pub transaction_count: usize,
    pub pending_count: usize,
}

impl BalanceCheck {
    pub fn new(user_id: impl Into<UserId>, stored_balance: Cents, transactions: &[Transaction]) -> Self {
        Self {
            user_id: user_id.into(),
            stored_balance,
            ledger_balance: compute_balance(transactions),
            transaction_count: transactions.len(),
            pending_count: transactions
                .iter()
                .filter(|tx| tx.status == super::TransactionStatus::Pending)
                .count(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.ledger_balance
    }

    pub fn drift(&self) -> Cents {
        self.stored_balance.saturating_sub(self.ledger_balance)
    }
}

/// Integrity summary across all profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub profiles_checked: usize,
    pub transactions_checked: usize,
    pub mismatches: Vec<BalanceCheck>,
    pub overfilled_campaigns: i64,
}

impl IntegrityReport {
    pub fn from_checks(checks: Vec<BalanceCheck>, overfilled_campaigns: i64) -> Self {
        let profiles_checked = checks.len();
        let transactions_checked = checks.iter().map(|c| c.transaction_count).sum();
        let mismatches = checks.into_iter().filter(|c| !c.is_consistent()).collect();
        Self {
            profiles_checked,
            transactions_checked,
            mismatches,
            overfilled_campaigns,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.mismatches.is_empty() && self.overfilled_campaigns == 0
    }
}
