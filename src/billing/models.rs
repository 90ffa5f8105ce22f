use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// key: billing-subscription-model -> user
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: i32,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub status: String,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<DateTime<Utc>>,
    pub provider_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::parse(&self.status)
    }
}

/// Provider-side subscription lifecycle states. Anything unrecognised is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    Other(String),
}

impl SubscriptionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "trialing" => Self::Trialing,
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Other(other) => other.as_str(),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: billing-usage-model -> monthly counters
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub user_id: i32,
    pub measurements_this_month: i64,
    pub exports_this_month: i64,
    pub last_reset_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UsageStats {
    pub fn fresh(user_id: i32, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            measurements_this_month: 0,
            exports_this_month: 0,
            last_reset_date: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            measurements_this_month: self.measurements_this_month,
            exports_this_month: self.exports_this_month,
        }
    }

    pub fn get(&self, counter: UsageCounter) -> i64 {
        match counter {
            UsageCounter::Measurements => self.measurements_this_month,
            UsageCounter::Exports => self.exports_this_month,
        }
    }

    pub(crate) fn get_mut(&mut self, counter: UsageCounter) -> &mut i64 {
        match counter {
            UsageCounter::Measurements => &mut self.measurements_this_month,
            UsageCounter::Exports => &mut self.exports_this_month,
        }
    }
}

/// Counters as seen for the current calendar month.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub measurements_this_month: i64,
    pub exports_this_month: i64,
}

impl UsageSnapshot {
    pub fn get(&self, counter: UsageCounter) -> i64 {
        match counter {
            UsageCounter::Measurements => self.measurements_this_month,
            UsageCounter::Exports => self.exports_this_month,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageCounter {
    Measurements,
    Exports,
}

impl UsageCounter {
    pub fn column(self) -> &'static str {
        match self {
            UsageCounter::Measurements => "measurements_this_month",
            UsageCounter::Exports => "exports_this_month",
        }
    }
}

/// A metered action requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAction {
    Measurement,
    Export,
}

impl UsageAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "measurement" => Some(Self::Measurement),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    pub fn counter(self) -> UsageCounter {
        match self {
            UsageAction::Measurement => UsageCounter::Measurements,
            UsageAction::Export => UsageCounter::Exports,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UsageAction::Measurement => "measurement",
            UsageAction::Export => "export",
        }
    }
}

impl fmt::Display for UsageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: billing-plan-limits -> free tier caps
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    pub measurements_per_month: i64,
    pub exports_per_month: i64,
}

impl PlanLimits {
    pub const FREE: PlanLimits = PlanLimits {
        measurements_per_month: 5,
        exports_per_month: 2,
    };

    pub fn for_counter(&self, counter: UsageCounter) -> i64 {
        match counter {
            UsageCounter::Measurements => self.measurements_per_month,
            UsageCounter::Exports => self.exports_per_month,
        }
    }
}

/// Subscription state carried by a provider event, applied by customer reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSubscriptionUpdate {
    pub customer_id: String,
    pub subscription_id: String,
    pub price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<DateTime<Utc>>,
    pub event_at: DateTime<Utc>,
}
