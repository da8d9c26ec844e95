use ethers::providers::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client is closed")]
    Closed,
}

/// The terminal error of a subscription.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription was closed by the endpoint")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsubscribed")]
    Unsubscribed,
}
