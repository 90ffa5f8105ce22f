use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::BillingResult;
use super::models::{ProviderSubscriptionUpdate, Subscription, UsageCounter, UsageStats};

/// Result of applying a provider event to the local subscription mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderUpdateOutcome {
    Applied(Subscription),
    /// A newer provider event has already been applied.
    Stale,
    UnknownCustomer,
}

/// key: billing-store -> persistence seam for subscriptions and usage counters
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn find_subscription(&self, user_id: i32) -> BillingResult<Option<Subscription>>;

    /// Records the provider customer for a user, creating an `incomplete` subscription if none exists.
    async fn attach_customer(
        &self,
        user_id: i32,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<Subscription>;

    /// Sets `cancel_at_period_end`. Returns `None` if the user has no subscription.
    async fn request_cancellation(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<Subscription>>;

    /// Applies an update only if it is newer than the last applied provider event.
    /// Event times have one-second resolution; on a tie a cancellation wins, so an
    /// `updated` and a `deleted` sharing a second always end `canceled`.
    async fn apply_provider_update(
        &self,
        update: &ProviderSubscriptionUpdate,
        now: DateTime<Utc>,
    ) -> BillingResult<ProviderUpdateOutcome>;

    async fn find_usage(&self, user_id: i32) -> BillingResult<Option<UsageStats>>;

    /// Zeroes the counters if `last_reset_date` lies in an earlier calendar month than `now`.
    /// A record already reset this month is returned untouched.
    async fn reset_usage(&self, user_id: i32, now: DateTime<Utc>) -> BillingResult<UsageStats>;

    /// Adds one to `counter`, creating the record first if needed. With a `limit`, the
    /// increment only happens while the counter is below it, as one atomic step; `None`
    /// is returned when the limit has already been reached.
    async fn increment_usage(
        &self,
        user_id: i32,
        counter: UsageCounter,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<i64>>;
}

/// key: billing-store-postgres -> sqlx implementation
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn find_subscription(&self, user_id: i32) -> BillingResult<Option<Subscription>> {
        let record =
            sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn attach_customer(
        &self,
        user_id: i32,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> BillingResult<Subscription> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id,
                user_id,
                stripe_customer_id,
                status,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, 'incomplete', $4, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(customer_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn request_cancellation(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = TRUE, updated_at = $2
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn apply_provider_update(
        &self,
        update: &ProviderSubscriptionUpdate,
        now: DateTime<Utc>,
    ) -> BillingResult<ProviderUpdateOutcome> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET
                stripe_subscription_id = $2,
                stripe_price_id = COALESCE($3, stripe_price_id),
                status = $4,
                cancel_at_period_end = $5,
                current_period_end = $6,
                provider_event_at = $7,
                updated_at = $8
            WHERE stripe_customer_id = $1
              AND (
                provider_event_at IS NULL
                OR provider_event_at < $7
                OR (provider_event_at = $7 AND $4 = 'canceled')
              )
            RETURNING *
            "#,
        )
        .bind(&update.customer_id)
        .bind(&update.subscription_id)
        .bind(update.price_id.as_deref())
        .bind(update.status.as_str())
        .bind(update.cancel_at_period_end)
        .bind(update.current_period_end)
        .bind(update.event_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(subscription) = row {
            return Ok(ProviderUpdateOutcome::Applied(subscription));
        }

        let known: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE stripe_customer_id = $1)",
        )
        .bind(&update.customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if known {
            ProviderUpdateOutcome::Stale
        } else {
            ProviderUpdateOutcome::UnknownCustomer
        })
    }

    async fn find_usage(&self, user_id: i32) -> BillingResult<Option<UsageStats>> {
        let record =
            sqlx::query_as::<_, UsageStats>("SELECT * FROM usage_stats WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn reset_usage(&self, user_id: i32, now: DateTime<Utc>) -> BillingResult<UsageStats> {
        let reset = sqlx::query_as::<_, UsageStats>(
            r#"
            INSERT INTO usage_stats (
                user_id,
                measurements_this_month,
                exports_this_month,
                last_reset_date,
                updated_at
            ) VALUES ($1, 0, 0, $2, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET
                measurements_this_month = 0,
                exports_this_month = 0,
                last_reset_date = EXCLUDED.last_reset_date,
                updated_at = EXCLUDED.updated_at
            WHERE date_trunc('month', usage_stats.last_reset_date AT TIME ZONE 'UTC')
                <> date_trunc('month', EXCLUDED.last_reset_date AT TIME ZONE 'UTC')
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(stats) = reset {
            return Ok(stats);
        }

        // another request already reset this month
        let current =
            sqlx::query_as::<_, UsageStats>("SELECT * FROM usage_stats WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(current)
    }

    async fn increment_usage(
        &self,
        user_id: i32,
        counter: UsageCounter,
        limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> BillingResult<Option<i64>> {
        sqlx::query(
            r#"
            INSERT INTO usage_stats (
                user_id,
                measurements_this_month,
                exports_this_month,
                last_reset_date,
                updated_at
            ) VALUES ($1, 0, 0, $2, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // column comes from a closed enum, never from input
        let column = counter.column();
        let statement = format!(
            r#"
            UPDATE usage_stats
            SET {column} = {column} + 1, updated_at = $2
            WHERE user_id = $1
              AND ($3::BIGINT IS NULL OR {column} < $3)
            RETURNING {column}
            "#
        );
        let value: Option<i64> = sqlx::query_scalar(&statement)
            .bind(user_id)
            .bind(now)
            .bind(limit)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }
}
