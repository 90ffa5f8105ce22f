use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::adapters::{BillingProviderAdapter, CheckoutRequest};
use super::error::BillingResult;
use super::gate::{QuotaDecision, QuotaGate, UsageOverview};
use super::models::{Subscription, UsageAction, UsageSnapshot};
use super::plan::PlanTier;
use super::store::{BillingStore, ProviderUpdateOutcome};
use super::webhooks::{verify_signature, ProviderEvent};

/// Subscription record plus derived plan, as reported to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOverview {
    pub subscription: Option<Subscription>,
    pub usage_stats: UsageSnapshot,
    pub is_premium: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied(Subscription),
    Stale,
    UnknownCustomer,
    Ignored,
}

/// Redirect targets for hosted checkout.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    pub fn for_app(base_url: &str) -> Self {
        Self {
            success_url: format!("{base_url}/dashboard?success=true"),
            cancel_url: format!("{base_url}/pricing?canceled=true"),
        }
    }
}

/// key: billing-service -> subscription lifecycle and quota gating
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    gate: QuotaGate,
    provider: Arc<dyn BillingProviderAdapter>,
}

impl BillingService {
    pub fn new(store: Arc<dyn BillingStore>, provider: Arc<dyn BillingProviderAdapter>) -> Self {
        Self {
            gate: QuotaGate::new(store.clone()),
            store,
            provider,
        }
    }

    pub fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    pub async fn usage_overview(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BillingResult<UsageOverview> {
        self.gate.overview(user_id, now).await
    }

    pub async fn consume(
        &self,
        user_id: i32,
        action: UsageAction,
        now: DateTime<Utc>,
    ) -> BillingResult<QuotaDecision> {
        self.gate.try_consume(user_id, action, now).await
    }

    pub async fn subscription_overview(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BillingResult<SubscriptionOverview> {
        let subscription = self.store.find_subscription(user_id).await?;
        let usage_stats = self.gate.ledger().current_usage(user_id, now).await?;
        let is_premium = PlanTier::from_subscription(subscription.as_ref()).is_premium();
        Ok(SubscriptionOverview {
            subscription,
            usage_stats,
            is_premium,
        })
    }

    /// Flags the subscription to end with the current period. Status, and with it the
    /// premium plan, only changes once the provider reports the end of the period.
    pub async fn cancel_at_period_end(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<Subscription>> {
        let subscription = self.store.request_cancellation(user_id, now).await?;
        if subscription.is_some() {
            info!(%user_id, "subscription set to cancel at period end");
        }
        Ok(subscription)
    }

    /// Returns the hosted checkout URL, creating the provider customer on first use.
    pub async fn start_checkout(
        &self,
        user_id: i32,
        email: &str,
        price_id: &str,
        urls: CheckoutUrls,
        now: DateTime<Utc>,
    ) -> BillingResult<String> {
        let existing = self
            .store
            .find_subscription(user_id)
            .await?
            .and_then(|subscription| subscription.stripe_customer_id);

        let customer_id = match existing {
            Some(customer_id) => customer_id,
            None => {
                let customer_id = self.provider.create_customer(user_id, email).await?;
                self.store
                    .attach_customer(user_id, &customer_id, now)
                    .await?;
                customer_id
            }
        };

        self.provider
            .create_checkout_session(&CheckoutRequest {
                user_id,
                customer_id,
                price_id: price_id.to_string(),
                success_url: urls.success_url,
                cancel_url: urls.cancel_url,
            })
            .await
    }

    /// Verifies and applies a signed provider event. Events are ordered by the
    /// provider's `created` time; anything older than what is stored is dropped,
    /// and within the same second only a cancellation replaces the stored state.
    pub async fn handle_webhook(
        &self,
        secret: &str,
        signature: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> BillingResult<WebhookOutcome> {
        verify_signature(secret, signature, payload, now)?;
        let event = ProviderEvent::parse(payload)?;

        let Some(update) = event.subscription_update()? else {
            return Ok(WebhookOutcome::Ignored);
        };

        let outcome = match self.store.apply_provider_update(&update, now).await? {
            ProviderUpdateOutcome::Applied(subscription) => {
                info!(
                    event_id = %event.id,
                    user_id = subscription.user_id,
                    status = %subscription.status,
                    "applied provider subscription update"
                );
                WebhookOutcome::Applied(subscription)
            }
            ProviderUpdateOutcome::Stale => {
                warn!(event_id = %event.id, customer_id = %update.customer_id, "dropping stale provider event");
                WebhookOutcome::Stale
            }
            ProviderUpdateOutcome::UnknownCustomer => {
                warn!(event_id = %event.id, customer_id = %update.customer_id, "provider event for unknown customer");
                WebhookOutcome::UnknownCustomer
            }
        };
        Ok(outcome)
    }
}
