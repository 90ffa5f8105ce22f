use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::debug;

use super::error::BillingResult;
use super::models::{UsageCounter, UsageSnapshot};
use super::store::BillingStore;

/// True when `last_reset` falls in a different calendar month (UTC) than `now`.
/// Elapsed time does not matter: a record idle for a year resets once.
pub fn needs_reset(last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (last_reset.year(), last_reset.month()) != (now.year(), now.month())
}

/// key: usage-ledger -> monthly counters with lazy reset
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn BillingStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Counters for the month containing `now`. A record left over from an earlier
    /// month is reset and persisted as part of the read. Users without a record read
    /// as zero and nothing is written.
    pub async fn current_usage(&self, user_id: i32, now: DateTime<Utc>) -> BillingResult<UsageSnapshot> {
        let Some(stats) = self.store.find_usage(user_id).await? else {
            return Ok(UsageSnapshot::default());
        };

        if !needs_reset(stats.last_reset_date, now) {
            return Ok(stats.snapshot());
        }

        debug!(%user_id, last_reset = %stats.last_reset_date, "resetting monthly usage counters");
        let stats = self.store.reset_usage(user_id, now).await?;
        Ok(stats.snapshot())
    }

    /// Unconditional +1 for an action the caller has already admitted. A record left
    /// over from an earlier month is reset first, so the count starts this month at 1.
    pub async fn increment(
        &self,
        user_id: i32,
        counter: UsageCounter,
        now: DateTime<Utc>,
    ) -> BillingResult<i64> {
        self.current_usage(user_id, now).await?;
        let value = self.store.increment_usage(user_id, counter, None, now).await?;
        // unbounded increments always apply
        Ok(value.unwrap_or_default())
    }

    /// +1 only while this month's counter is below `limit`; `None` when the limit is
    /// already reached. Applies the monthly reset first, like [`UsageLedger::increment`].
    pub async fn increment_within(
        &self,
        user_id: i32,
        counter: UsageCounter,
        limit: i64,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<i64>> {
        self.current_usage(user_id, now).await?;
        self.store
            .increment_usage(user_id, counter, Some(limit), now)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::memory::MemoryBillingStore;
    use crate::billing::models::UsageStats;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn reset_is_by_calendar_month() {
        assert!(!needs_reset(at(2024, 3, 1), at(2024, 3, 31)));
        assert!(needs_reset(at(2024, 3, 31), at(2024, 4, 1)));
        assert!(needs_reset(at(2023, 12, 31), at(2024, 1, 1)));
        // same month number, different year
        assert!(needs_reset(at(2023, 4, 10), at(2024, 4, 10)));
    }

    #[tokio::test]
    async fn stale_record_is_reset_and_persisted() {
        let store = Arc::new(MemoryBillingStore::new());
        store.put_usage(UsageStats {
            measurements_this_month: 5,
            exports_this_month: 2,
            ..UsageStats::fresh(1, at(2024, 3, 15))
        });
        let ledger = UsageLedger::new(store.clone());

        let usage = ledger.current_usage(1, at(2024, 4, 1)).await.unwrap();
        assert_eq!(usage, UsageSnapshot::default());

        let stored = store.find_usage(1).await.unwrap().unwrap();
        assert_eq!(stored.measurements_this_month, 0);
        assert_eq!(stored.exports_this_month, 0);
        assert_eq!(stored.last_reset_date, at(2024, 4, 1));
    }

    #[tokio::test]
    async fn reads_within_the_month_leave_counters_alone() {
        let store = Arc::new(MemoryBillingStore::new());
        store.put_usage(UsageStats {
            measurements_this_month: 3,
            ..UsageStats::fresh(1, at(2024, 4, 2))
        });
        let ledger = UsageLedger::new(store.clone());

        for day in [3, 10, 30] {
            let usage = ledger.current_usage(1, at(2024, 4, day)).await.unwrap();
            assert_eq!(usage.measurements_this_month, 3);
        }
        let stored = store.find_usage(1).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_date, at(2024, 4, 2));
    }

    #[tokio::test]
    async fn long_idle_record_resets_once() {
        let store = Arc::new(MemoryBillingStore::new());
        store.put_usage(UsageStats {
            exports_this_month: 2,
            ..UsageStats::fresh(1, at(2023, 1, 20))
        });
        let ledger = UsageLedger::new(store.clone());

        ledger.current_usage(1, at(2024, 2, 5)).await.unwrap();
        ledger.increment(1, UsageCounter::Exports, at(2024, 2, 6)).await.unwrap();
        let usage = ledger.current_usage(1, at(2024, 2, 7)).await.unwrap();

        assert_eq!(usage.exports_this_month, 1);
        let stored = store.find_usage(1).await.unwrap().unwrap();
        assert_eq!(stored.last_reset_date, at(2024, 2, 5));
    }

    #[tokio::test]
    async fn missing_record_reads_zero_without_creating_one() {
        let store = Arc::new(MemoryBillingStore::new());
        let ledger = UsageLedger::new(store.clone());

        let usage = ledger.current_usage(9, at(2024, 4, 1)).await.unwrap();
        assert_eq!(usage, UsageSnapshot::default());
        assert!(store.find_usage(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increment_creates_the_record() {
        let store = Arc::new(MemoryBillingStore::new());
        let ledger = UsageLedger::new(store.clone());

        let value = ledger
            .increment(4, UsageCounter::Measurements, at(2024, 4, 1))
            .await
            .unwrap();
        assert_eq!(value, 1);
        let stored = store.find_usage(4).await.unwrap().unwrap();
        assert_eq!(stored.measurements_this_month, 1);
        assert_eq!(stored.exports_this_month, 0);
    }

    #[tokio::test]
    async fn bounded_increment_stops_at_limit() {
        let store = Arc::new(MemoryBillingStore::new());
        let ledger = UsageLedger::new(store);
        let now = at(2024, 4, 1);

        assert_eq!(ledger.increment_within(1, UsageCounter::Exports, 2, now).await.unwrap(), Some(1));
        assert_eq!(ledger.increment_within(1, UsageCounter::Exports, 2, now).await.unwrap(), Some(2));
        assert_eq!(ledger.increment_within(1, UsageCounter::Exports, 2, now).await.unwrap(), None);
        assert_eq!(ledger.current_usage(1, now).await.unwrap().exports_this_month, 2);
    }

    #[tokio::test]
    async fn increment_after_month_change_counts_from_zero() {
        let store = Arc::new(MemoryBillingStore::new());
        store.put_usage(UsageStats {
            measurements_this_month: 4,
            exports_this_month: 2,
            ..UsageStats::fresh(2, at(2024, 3, 15))
        });
        let ledger = UsageLedger::new(store.clone());

        let value = ledger
            .increment(2, UsageCounter::Measurements, at(2024, 4, 3))
            .await
            .unwrap();
        assert_eq!(value, 1);
        let stored = store.find_usage(2).await.unwrap().unwrap();
        assert_eq!(stored.exports_this_month, 0);
        assert_eq!(stored.last_reset_date, at(2024, 4, 3));

        // last month's exhausted counter does not block the bounded path either
        assert_eq!(
            ledger
                .increment_within(2, UsageCounter::Exports, 2, at(2024, 4, 3))
                .await
                .unwrap(),
            Some(1)
        );
    }
}
