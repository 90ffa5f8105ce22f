use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::error::BillingResult;
use super::ledger::UsageLedger;
use super::models::{PlanLimits, UsageAction, UsageCounter, UsageSnapshot};
use super::plan::PlanResolver;
use super::store::BillingStore;

/// Outcome of a metered action attempt. A denial never touches the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Admitted { action: UsageAction, used: i64 },
    Denied { action: UsageAction, limit: i64, used: i64 },
}

impl QuotaDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, QuotaDecision::Admitted { .. })
    }
}

/// Usage, limits and derived permissions as reported to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageOverview {
    pub usage: UsageSnapshot,
    pub limits: Option<PlanLimits>,
    pub is_premium: bool,
    pub can_measure: bool,
    pub can_export: bool,
}

/// key: quota-gate -> admit/deny metered actions
#[derive(Clone)]
pub struct QuotaGate {
    plans: PlanResolver,
    ledger: UsageLedger,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self {
            plans: PlanResolver::new(store.clone()),
            ledger: UsageLedger::new(store),
        }
    }

    pub fn plans(&self) -> &PlanResolver {
        &self.plans
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub async fn overview(&self, user_id: i32, now: DateTime<Utc>) -> BillingResult<UsageOverview> {
        let tier = self.plans.resolve(user_id).await?;
        let usage = self.ledger.current_usage(user_id, now).await?;
        let limits = tier.limits();
        let allows = |counter: UsageCounter| match limits {
            Some(limits) => usage.get(counter) < limits.for_counter(counter),
            None => true,
        };

        Ok(UsageOverview {
            usage,
            limits,
            is_premium: tier.is_premium(),
            can_measure: allows(UsageCounter::Measurements),
            can_export: allows(UsageCounter::Exports),
        })
    }

    /// Admits the action and records it, or denies it without recording anything.
    ///
    /// On the free tier the final check and the increment happen in one conditional
    /// store update, so concurrent requests for the same user cannot push a counter
    /// past its limit.
    pub async fn try_consume(
        &self,
        user_id: i32,
        action: UsageAction,
        now: DateTime<Utc>,
    ) -> BillingResult<QuotaDecision> {
        let tier = self.plans.resolve(user_id).await?;
        let counter = action.counter();

        let Some(limits) = tier.limits() else {
            let used = self.ledger.increment(user_id, counter, now).await?;
            return Ok(QuotaDecision::Admitted { action, used });
        };

        let limit = limits.for_counter(counter);
        match self.ledger.increment_within(user_id, counter, limit, now).await? {
            Some(used) => Ok(QuotaDecision::Admitted { action, used }),
            None => {
                // may exceed the limit after a downgrade from premium
                let stored = self.ledger.current_usage(user_id, now).await?.get(counter);
                let used = stored.max(limit);
                info!(%user_id, %action, limit, used, "monthly quota exhausted");
                Ok(QuotaDecision::Denied { action, limit, used })
            }
        }
    }

    /// Tier-aware check without recording usage.
    pub async fn can_consume(
        &self,
        user_id: i32,
        action: UsageAction,
        now: DateTime<Utc>,
    ) -> BillingResult<bool> {
        let overview = self.overview(user_id, now).await?;
        Ok(match action {
            UsageAction::Measurement => overview.can_measure,
            UsageAction::Export => overview.can_export,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::memory::MemoryBillingStore;
    use crate::billing::models::{Subscription, UsageStats};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 9, 30, 0).single().unwrap()
    }

    fn premium(store: &MemoryBillingStore, user_id: i32) {
        let now = Utc::now();
        store.put_subscription(Subscription {
            id: Uuid::new_v4(),
            user_id,
            stripe_customer_id: Some("cus_premium".into()),
            stripe_subscription_id: Some("sub_premium".into()),
            stripe_price_id: None,
            status: "active".into(),
            cancel_at_period_end: false,
            current_period_end: None,
            provider_event_at: None,
            created_at: now,
            updated_at: now,
        });
    }

    #[tokio::test]
    async fn free_tier_admits_five_measurements_then_denies() {
        let store = Arc::new(MemoryBillingStore::new());
        let gate = QuotaGate::new(store.clone());
        let now = at(2024, 5, 3);

        for expected in 1..=5 {
            let decision = gate.try_consume(1, UsageAction::Measurement, now).await.unwrap();
            assert_eq!(
                decision,
                QuotaDecision::Admitted {
                    action: UsageAction::Measurement,
                    used: expected
                }
            );
        }

        let sixth = gate.try_consume(1, UsageAction::Measurement, now).await.unwrap();
        assert_eq!(
            sixth,
            QuotaDecision::Denied {
                action: UsageAction::Measurement,
                limit: 5,
                used: 5
            }
        );
        let stored = store.find_usage(1).await.unwrap().unwrap();
        assert_eq!(stored.measurements_this_month, 5);
    }

    #[tokio::test]
    async fn export_denial_leaves_counter_unchanged() {
        let store = Arc::new(MemoryBillingStore::new());
        let now = at(2024, 5, 3);
        store.put_usage(UsageStats {
            exports_this_month: 2,
            ..UsageStats::fresh(1, at(2024, 5, 1))
        });
        let gate = QuotaGate::new(store.clone());

        let decision = gate.try_consume(1, UsageAction::Export, now).await.unwrap();
        assert!(!decision.is_admitted());

        let overview = gate.overview(1, now).await.unwrap();
        assert_eq!(overview.usage.exports_this_month, 2);
        assert!(!overview.can_export);
        assert!(overview.can_measure);
    }

    #[tokio::test]
    async fn denial_after_downgrade_reports_the_stored_count() {
        let store = Arc::new(MemoryBillingStore::new());
        store.put_usage(UsageStats {
            measurements_this_month: 25,
            ..UsageStats::fresh(8, at(2024, 5, 1))
        });
        let gate = QuotaGate::new(store.clone());

        let decision = gate.try_consume(8, UsageAction::Measurement, at(2024, 5, 3)).await.unwrap();
        assert_eq!(
            decision,
            QuotaDecision::Denied {
                action: UsageAction::Measurement,
                limit: 5,
                used: 25
            }
        );
        let stored = store.find_usage(8).await.unwrap().unwrap();
        assert_eq!(stored.measurements_this_month, 25);
    }

    #[tokio::test]
    async fn measurement_and_export_limits_are_independent() {
        let store = Arc::new(MemoryBillingStore::new());
        let gate = QuotaGate::new(store);
        let now = at(2024, 5, 3);

        for _ in 0..2 {
            assert!(gate.try_consume(1, UsageAction::Export, now).await.unwrap().is_admitted());
        }
        assert!(!gate.try_consume(1, UsageAction::Export, now).await.unwrap().is_admitted());
        assert!(gate.try_consume(1, UsageAction::Measurement, now).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn premium_is_never_denied_but_still_counted() {
        let store = Arc::new(MemoryBillingStore::new());
        premium(&store, 7);
        let gate = QuotaGate::new(store.clone());
        let now = at(2024, 5, 3);

        for _ in 0..25 {
            assert!(gate.try_consume(7, UsageAction::Measurement, now).await.unwrap().is_admitted());
            assert!(gate.try_consume(7, UsageAction::Export, now).await.unwrap().is_admitted());
        }

        let overview = gate.overview(7, now).await.unwrap();
        assert!(overview.is_premium);
        assert_eq!(overview.limits, None);
        assert_eq!(overview.usage.measurements_this_month, 25);
        assert_eq!(overview.usage.exports_this_month, 25);
        assert!(overview.can_measure && overview.can_export);
    }

    #[tokio::test]
    async fn new_month_reopens_the_quota() {
        let store = Arc::new(MemoryBillingStore::new());
        store.put_usage(UsageStats {
            measurements_this_month: 5,
            ..UsageStats::fresh(1, at(2024, 3, 15))
        });
        let gate = QuotaGate::new(store.clone());

        assert!(!gate.can_consume(1, UsageAction::Measurement, at(2024, 3, 20)).await.unwrap());
        let decision = gate
            .try_consume(1, UsageAction::Measurement, at(2024, 4, 1))
            .await
            .unwrap();
        assert_eq!(
            decision,
            QuotaDecision::Admitted {
                action: UsageAction::Measurement,
                used: 1
            }
        );
    }

    #[tokio::test]
    async fn upgrade_lifts_the_limit() {
        let store = Arc::new(MemoryBillingStore::new());
        let gate = QuotaGate::new(store.clone());
        let now = at(2024, 5, 3);

        for _ in 0..2 {
            gate.try_consume(3, UsageAction::Export, now).await.unwrap();
        }
        assert!(!gate.try_consume(3, UsageAction::Export, now).await.unwrap().is_admitted());

        premium(&store, 3);
        assert!(gate.try_consume(3, UsageAction::Export, now).await.unwrap().is_admitted());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attempts_never_overadmit() {
        let store = Arc::new(MemoryBillingStore::new());
        let gate = QuotaGate::new(store.clone());
        let now = at(2024, 5, 3);

        let attempts = (0..32).map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.try_consume(11, UsageAction::Measurement, now)
                    .await
                    .unwrap()
                    .is_admitted()
            })
        });
        let mut admitted = 0;
        for handle in attempts.collect::<Vec<_>>() {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        let stored = store.find_usage(11).await.unwrap().unwrap();
        assert_eq!(stored.measurements_this_month, 5);
    }
}
