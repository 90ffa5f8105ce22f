pub mod adapters;
pub mod api;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod plan;
pub mod service;
pub mod store;
pub mod webhooks;

use std::sync::Arc;

use sqlx::PgPool;

pub use adapters::{BillingProviderAdapter, CheckoutRequest, DisabledProvider, StripeAdapter};
pub use error::{BillingError, BillingResult};
pub use gate::{QuotaDecision, QuotaGate, UsageOverview};
pub use ledger::UsageLedger;
pub use memory::MemoryBillingStore;
pub use models::{
    PlanLimits, ProviderSubscriptionUpdate, Subscription, SubscriptionStatus, UsageAction,
    UsageCounter, UsageSnapshot, UsageStats,
};
pub use plan::{PlanResolver, PlanTier};
pub use service::{BillingService, CheckoutUrls, SubscriptionOverview, WebhookOutcome};
pub use store::{BillingStore, PgBillingStore, ProviderUpdateOutcome};

/// Builds the billing service from configuration: the store named by `BILLING_STORE`
/// and Stripe when a secret key is present.
pub fn service_from_env(pool: PgPool) -> BillingService {
    let store: Arc<dyn BillingStore> = match crate::config::BILLING_STORE.as_str() {
        "memory" => {
            tracing::warn!("using in-memory billing store; usage is lost on restart");
            Arc::new(MemoryBillingStore::new())
        }
        _ => Arc::new(PgBillingStore::new(pool)),
    };
    let provider: Arc<dyn BillingProviderAdapter> = match crate::config::STRIPE_SECRET_KEY.as_deref() {
        Some(secret_key) => Arc::new(StripeAdapter::new(
            crate::config::STRIPE_API_BASE.as_str(),
            secret_key,
        )),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; checkout disabled");
            Arc::new(DisabledProvider)
        }
    };
    BillingService::new(store, provider)
}
