pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod extractor;
pub mod routes;

use axum::{routing::get, Extension, Router};

use crate::billing::BillingService;
use crate::routes::api_routes;

async fn root() -> &'static str {
    "PDF Measure API"
}

/// Application routes with the billing service attached. Auth routes additionally
/// expect a `PgPool` extension layered on by the caller.
pub fn router(service: BillingService) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(service))
}
