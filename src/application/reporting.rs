use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Cents, UserId};

/// Per-user earnings summary built from the non-failed ledger rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsReport {
    pub user_id: UserId,
    pub balance: Cents,
    pub ledger_balance: Cents,
    /// Task earnings, referral bonuses and ad rewards.
    pub total_earned: Cents,
    pub by_type: BTreeMap<String, Cents>,
    pub pending_withdrawals: Cents,
    pub completed_tasks: usize,
    pub transaction_count: usize,
}

impl EarningsReport {
    /// Sum of all outgoing rows (withdrawals, funding, subscriptions).
    pub fn total_spent(&self) -> Cents {
        self.by_type
            .values()
            .filter(|v| **v < 0)
            .fold(0, |acc: Cents, v| acc.saturating_add(*v))
            .saturating_abs()
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_balance
    }
}
