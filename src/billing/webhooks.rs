use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::error::{BillingError, BillingResult};
use super::models::{ProviderSubscriptionUpdate, SubscriptionStatus};

/// Maximum age of a signed payload before it is rejected as a replay.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// key: billing-webhook-signature -> stripe v1 scheme
///
/// The header looks like `t=1700000000,v1=<hex>[,v1=<hex>]`; the signed message is
/// `"{t}.{body}"` under HMAC-SHA256 with the endpoint secret.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> BillingResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::InvalidSignature("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(BillingError::InvalidSignature("missing v1 signature"));
    }
    if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::InvalidSignature("timestamp outside tolerance"));
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::InvalidSignature("unusable secret"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(BillingError::InvalidSignature("no matching signature"))
}

#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created: i64,
    pub data: ProviderEventData,
}

#[derive(Debug, Deserialize)]
pub struct ProviderEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
    current_period_end: Option<i64>,
    #[serde(default)]
    items: Option<SubscriptionItems>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: Option<PriceRef>,
}

#[derive(Debug, Deserialize)]
struct PriceRef {
    id: String,
}

impl ProviderEvent {
    pub fn parse(payload: &[u8]) -> BillingResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Extracts the subscription state from `customer.subscription.*` events.
    /// Other event types yield `None`.
    pub fn subscription_update(&self) -> BillingResult<Option<ProviderSubscriptionUpdate>> {
        let deleted = match self.kind.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => false,
            "customer.subscription.deleted" => true,
            _ => return Ok(None),
        };

        let object: SubscriptionObject = serde_json::from_value(self.data.object.clone())?;
        let status = if deleted {
            SubscriptionStatus::Canceled
        } else {
            SubscriptionStatus::parse(&object.status)
        };
        let price_id = object
            .items
            .and_then(|items| items.data.into_iter().find_map(|item| item.price))
            .map(|price| price.id);

        Ok(Some(ProviderSubscriptionUpdate {
            customer_id: object.customer,
            subscription_id: object.id,
            price_id,
            status,
            cancel_at_period_end: object.cancel_at_period_end,
            current_period_end: object
                .current_period_end
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            event_at: self.created_at(),
        }))
    }
}
