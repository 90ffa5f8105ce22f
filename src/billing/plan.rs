use std::sync::Arc;

use serde::Serialize;

use super::error::BillingResult;
use super::models::{PlanLimits, Subscription, SubscriptionStatus, UsageAction};
use super::store::BillingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Premium,
}

impl PlanTier {
    /// Only an `active` subscription is premium. A pending cancellation keeps the
    /// plan until the provider reports the period has ended.
    pub fn from_subscription(subscription: Option<&Subscription>) -> Self {
        match subscription.map(Subscription::status) {
            Some(SubscriptionStatus::Active) => PlanTier::Premium,
            _ => PlanTier::Free,
        }
    }

    pub fn is_premium(self) -> bool {
        self == PlanTier::Premium
    }

    /// Monthly caps for this tier; `None` means unbounded.
    pub fn limits(self) -> Option<PlanLimits> {
        match self {
            PlanTier::Free => Some(PlanLimits::FREE),
            PlanTier::Premium => None,
        }
    }

    pub fn limit_for(self, action: UsageAction) -> Option<i64> {
        self.limits()
            .map(|limits| limits.for_counter(action.counter()))
    }
}

/// key: plan-resolver -> subscription status to tier
#[derive(Clone)]
pub struct PlanResolver {
    store: Arc<dyn BillingStore>,
}

impl PlanResolver {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, user_id: i32) -> BillingResult<PlanTier> {
        let subscription = self.store.find_subscription(user_id).await?;
        Ok(PlanTier::from_subscription(subscription.as_ref()))
    }

    pub async fn is_premium(&self, user_id: i32) -> BillingResult<bool> {
        Ok(self.resolve(user_id).await?.is_premium())
    }
}
