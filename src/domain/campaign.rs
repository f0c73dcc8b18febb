use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

pub type CampaignId = Uuid;

/// A user-created task offer: other users complete it for `reward_cents`,
/// at most `quantity` times in total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    /// Target the completing user is sent to
    pub link: String,
    pub category: Option<String>,
    pub reward_cents: Cents,
    pub quantity: i64,
    /// Only ever increases, never past `quantity`
    pub completions: i64,
    pub views: i64,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        owner_id: impl Into<UserId>,
        title: impl Into<String>,
        link: impl Into<String>,
        reward_cents: Cents,
        quantity: i64,
    ) -> Self {
        assert!(reward_cents > 0, "Campaign reward must be positive");
        assert!(quantity > 0, "Campaign quantity must be positive");
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            description: None,
            link: link.into(),
            category: None,
            reward_cents,
            quantity,
            completions: 0,
            views: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// What the advertiser pays up front, or `None` on overflow.
    pub fn total_cost(&self) -> Option<Cents> {
        self.reward_cents.checked_mul(self.quantity)
    }

    pub fn remaining(&self) -> i64 {
        (self.quantity - self.completions).max(0)
    }

    pub fn is_full(&self) -> bool {
        self.completions >= self.quantity
    }

    /// Identifier recorded in the completing user's completed-task set.
    pub fn task_key(&self) -> String {
        task_key(self.id)
    }
}

pub fn task_key(id: CampaignId) -> String {
    format!("campaign:{}", id)
}
