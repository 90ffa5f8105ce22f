use axum::{
    routing::{get, post},
    Router,
};

use crate::{auth, billing::api as billing};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(auth::register_user))
        .route("/api/auth/login", post(auth::login_user))
        .route("/api/auth/logout", post(auth::logout_user))
        .route("/api/auth/me", get(auth::current_user))
        .route(
            "/api/usage",
            get(billing::get_usage).post(billing::consume_usage),
        )
        .route(
            "/api/subscription",
            get(billing::get_subscription).post(billing::update_subscription),
        )
        .route(
            "/api/create-checkout-session",
            post(billing::create_checkout_session),
        )
        .route("/api/webhooks/stripe", post(billing::stripe_webhook))
}
