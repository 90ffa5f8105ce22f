use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};

use super::error::{BillingError, BillingResult};

/// Parameters for a hosted subscription checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i32,
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// key: billing-adapter -> provider integration
#[async_trait]
pub trait BillingProviderAdapter: Send + Sync {
    /// Creates a provider customer and returns its reference.
    async fn create_customer(&self, user_id: i32, email: &str) -> BillingResult<String>;

    /// Opens a hosted checkout session and returns the URL to redirect the user to.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> BillingResult<String>;
}

/// key: billing-adapter-stripe -> REST integration
pub struct StripeAdapter {
    client: Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
}

impl StripeAdapter {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }

    async fn post_form<T>(&self, path: &str, form: &[(&str, String)]) -> BillingResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(%status, path, "stripe request rejected");
            return Err(BillingError::ProviderRejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl BillingProviderAdapter for StripeAdapter {
    async fn create_customer(&self, user_id: i32, email: &str) -> BillingResult<String> {
        let customer: StripeCustomer = self
            .post_form(
                "/v1/customers",
                &[
                    ("email", email.to_string()),
                    ("metadata[user_id]", user_id.to_string()),
                ],
            )
            .await?;
        debug!(%user_id, customer_id = %customer.id, "created stripe customer");
        Ok(customer.id)
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> BillingResult<String> {
        let session: StripeCheckoutSession = self
            .post_form(
                "/v1/checkout/sessions",
                &[
                    ("customer", request.customer_id.clone()),
                    ("mode", "subscription".to_string()),
                    ("payment_method_types[0]", "card".to_string()),
                    ("line_items[0][price]", request.price_id.clone()),
                    ("line_items[0][quantity]", "1".to_string()),
                    ("success_url", request.success_url.clone()),
                    ("cancel_url", request.cancel_url.clone()),
                    ("metadata[user_id]", request.user_id.to_string()),
                    (
                        "subscription_data[metadata][user_id]",
                        request.user_id.to_string(),
                    ),
                ],
            )
            .await?;
        debug!(user_id = request.user_id, session_id = %session.id, "created checkout session");
        session.url.ok_or_else(|| BillingError::ProviderRejected {
            status: 200,
            message: format!("checkout session {} has no url", session.id),
        })
    }
}

/// Stand-in used when no provider credentials are configured.
pub struct DisabledProvider;

#[async_trait]
impl BillingProviderAdapter for DisabledProvider {
    async fn create_customer(&self, _user_id: i32, _email: &str) -> BillingResult<String> {
        Err(BillingError::ProviderUnavailable)
    }

    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> BillingResult<String> {
        Err(BillingError::ProviderUnavailable)
    }
}
