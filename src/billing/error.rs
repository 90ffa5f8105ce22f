use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
    #[error("billing provider request failed: {0}")]
    Provider(#[from] reqwest::Error),
    #[error("billing provider rejected request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },
    #[error("billing provider is not configured")]
    ProviderUnavailable,
    #[error("webhook signature invalid: {0}")]
    InvalidSignature(&'static str),
    #[error("malformed provider payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;
