use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::error::BillingResult;
use super::ledger::needs_reset;
use super::models::{
    ProviderSubscriptionUpdate, Subscription, SubscriptionStatus, UsageCounter, UsageStats,
};
use super::store::{BillingStore, ProviderUpdateOutcome};

/// key: billing-store-memory -> process-local store for tests and local runs
///
/// Each user's record sits behind its own `DashMap` shard lock, so the
/// check-and-increment in [`BillingStore::increment_usage`] is atomic per user.
#[derive(Default)]
pub struct MemoryBillingStore {
    subscriptions: DashMap<i32, Subscription>,
    usage: DashMap<i32, UsageStats>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a subscription record.
    pub fn put_subscription(&self, subscription: Subscription) {
        self.subscriptions.insert(subscription.user_id, subscription);
    }

    /// Seeds or replaces a usage record.
    pub fn put_usage(&self, stats: UsageStats) {
        self.usage.insert(stats.user_id, stats);
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn find_subscription(&self, user_id: i32) -> BillingResult<Option<Subscription>> {
        Ok(self.subscriptions.get(&user_id).map(|entry| entry.clone()))
    }

    async fn attach_customer(
        &self,
        user_id: i32,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<Subscription> {
        let mut entry = self
            .subscriptions
            .entry(user_id)
            .or_insert_with(|| Subscription {
                id: Uuid::new_v4(),
                user_id,
                stripe_customer_id: None,
                stripe_subscription_id: None,
                stripe_price_id: None,
                status: "incomplete".to_string(),
                cancel_at_period_end: false,
                current_period_end: None,
                provider_event_at: None,
                created_at: now,
                updated_at: now,
            });
        entry.stripe_customer_id = Some(customer_id.to_string());
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn request_cancellation(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self.subscriptions.get_mut(&user_id).map(|mut entry| {
            entry.cancel_at_period_end = true;
            entry.updated_at = now;
            entry.clone()
        }))
    }

    async fn apply_provider_update(
        &self,
        update: &ProviderSubscriptionUpdate,
        now: DateTime<Utc>,
    ) -> BillingResult<ProviderUpdateOutcome> {
        for mut entry in self.subscriptions.iter_mut() {
            if entry.stripe_customer_id.as_deref() != Some(update.customer_id.as_str()) {
                continue;
            }
            let canceling = update.status == SubscriptionStatus::Canceled;
            let stale = match entry.provider_event_at {
                Some(applied) if applied > update.event_at => true,
                Some(applied) if applied == update.event_at => !canceling,
                _ => false,
            };
            if stale {
                return Ok(ProviderUpdateOutcome::Stale);
            }
            entry.stripe_subscription_id = Some(update.subscription_id.clone());
            if let Some(price_id) = &update.price_id {
                entry.stripe_price_id = Some(price_id.clone());
            }
            entry.status = update.status.as_str().to_string();
            entry.cancel_at_period_end = update.cancel_at_period_end;
            entry.current_period_end = update.current_period_end;
            entry.provider_event_at = Some(update.event_at);
            entry.updated_at = now;
            return Ok(ProviderUpdateOutcome::Applied(entry.clone()));
        }
        Ok(ProviderUpdateOutcome::UnknownCustomer)
    }

    async fn find_usage(&self, user_id: i32) -> BillingResult<Option<UsageStats>> {
        Ok(self.usage.get(&user_id).map(|entry| entry.clone()))
    }

    async fn reset_usage(&self, user_id: i32, now: DateTime<Utc>) -> BillingResult<UsageStats> {
        let mut entry = self
            .usage
            .entry(user_id)
            .or_insert_with(|| UsageStats::fresh(user_id, now));
        if needs_reset(entry.last_reset_date, now) {
            *entry = UsageStats::fresh(user_id, now);
        }
        Ok(entry.clone())
    }

    async fn increment_usage(
        &self,
        user_id: i32,
        counter: UsageCounter,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<i64>> {
        let mut entry = self
            .usage
            .entry(user_id)
            .or_insert_with(|| UsageStats::fresh(user_id, now));
        if matches!(limit, Some(limit) if entry.get(counter) >= limit) {
            return Ok(None);
        }
        let value = entry.get_mut(counter);
        *value += 1;
        let updated = *value;
        entry.updated_at = now;
        Ok(Some(updated))
    }
}
