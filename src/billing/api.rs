use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    BillingError, BillingService, CheckoutUrls, QuotaDecision, SubscriptionOverview,
    UsageAction, UsageOverview, WebhookOutcome,
};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

/// key: billing-api -> rest endpoints
pub async fn get_usage(
    Extension(service): Extension<BillingService>,
    user: AuthUser,
) -> AppResult<Json<UsageOverview>> {
    let overview = service.usage_overview(user.user_id, Utc::now()).await?;
    Ok(Json(overview))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub message: String,
    pub used: i64,
}

pub async fn consume_usage(
    Extension(service): Extension<BillingService>,
    user: AuthUser,
    Json(payload): Json<ActionRequest>,
) -> AppResult<Json<ConsumeResponse>> {
    let action = UsageAction::parse(&payload.action)
        .ok_or_else(|| AppError::BadRequest(format!("invalid action `{}`", payload.action)))?;

    match service.consume(user.user_id, action, Utc::now()).await? {
        QuotaDecision::Admitted { action, used } => Ok(Json(ConsumeResponse {
            message: format!("{action} recorded"),
            used,
        })),
        QuotaDecision::Denied { action, limit, .. } => {
            Err(AppError::QuotaExceeded { action, limit })
        }
    }
}

pub async fn get_subscription(
    Extension(service): Extension<BillingService>,
    user: AuthUser,
) -> AppResult<Json<SubscriptionOverview>> {
    let overview = service
        .subscription_overview(user.user_id, Utc::now())
        .await?;
    Ok(Json(overview))
}

pub async fn update_subscription(
    Extension(service): Extension<BillingService>,
    user: AuthUser,
    Json(payload): Json<ActionRequest>,
) -> AppResult<Json<Value>> {
    if payload.action != "cancel" {
        return Err(AppError::BadRequest(format!(
            "invalid action `{}`",
            payload.action
        )));
    }
    service
        .cancel_at_period_end(user.user_id, Utc::now())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(json!({ "message": "Subscription will cancel at the end of the current period" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub price_id: Option<String>,
}

pub async fn create_checkout_session(
    Extension(service): Extension<BillingService>,
    user: AuthUser,
    Json(payload): Json<CheckoutSessionRequest>,
) -> AppResult<Json<Value>> {
    let price_id = payload
        .price_id
        .filter(|price_id| !price_id.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("priceId is required".into()))?;

    let url = service
        .start_checkout(
            user.user_id,
            &user.email,
            &price_id,
            CheckoutUrls::for_app(crate::config::APP_BASE_URL.as_str()),
            Utc::now(),
        )
        .await?;
    Ok(Json(json!({ "url": url })))
}

pub async fn stripe_webhook(
    Extension(service): Extension<BillingService>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let secret = crate::config::STRIPE_WEBHOOK_SECRET
        .as_deref()
        .ok_or(BillingError::ProviderUnavailable)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(BillingError::InvalidSignature("missing Stripe-Signature header"))?;

    let outcome = service
        .handle_webhook(secret, signature, &body, Utc::now())
        .await?;
    let applied = matches!(outcome, WebhookOutcome::Applied(_));
    Ok(Json(json!({ "received": true, "applied": applied })))
}
