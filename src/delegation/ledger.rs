//! Entitlement ledger: plan tiers, credit grants, and subscription windows

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Account, PlanTier};

/// Credits granted when a plan is purchased. The grant replaces the
/// previous balance rather than adding to it.
pub fn credit_grant(tier: PlanTier) -> i64 {
    match tier {
        PlanTier::Basic => 500,
        PlanTier::Pro => 800,
        PlanTier::Premium => 1500,
    }
}

/// Subscription window opened by a purchase: [now, now + 1 month)
pub fn subscription_window(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = now
        .checked_add_months(Months::new(1))
        .ok_or_else(|| AppError::Internal("Subscription window overflow".to_string()))?;
    Ok((now, end))
}

/// A delegation consumes a credit only while the subscription is inactive
pub fn should_charge(account: &Account, now: DateTime<Utc>) -> bool {
    !account.is_subscription_active(now)
}

/// Point-in-time view of an account's entitlement
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSnapshot {
    pub plan: PlanTier,
    pub active: bool,
    pub credits: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<Uuid>,
}

impl EntitlementSnapshot {
    pub fn from_account(account: &Account) -> Self {
        Self {
            plan: account.plan,
            active: account.is_subscription_active(Utc::now()),
            credits: account.credits,
            expires_at: account.subscription_end,
            assistant: account.assigned_assistant,
        }
    }
}
