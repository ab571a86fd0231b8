/// Errors raised while fetching from an upstream metric source.
///
/// These never leave a collector: they are logged and turned into an absent
/// sample, and the rate limiter is not advanced.
///
/// # Examples
///
/// ```rust
/// use pulse_collector::error::FetchError;
///
/// let err = FetchError::Payload("rankings list is empty".to_string());
/// assert!(err.to_string().contains("rankings list is empty"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx status code from the upstream API.
    #[error("{upstream} API HTTP error: status={status}")]
    HttpStatus { upstream: String, status: u16 },

    /// Transport failure, including timeouts.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response decoded but did not have the expected shape.
    #[error("Unexpected payload: {0}")]
    Payload(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;
