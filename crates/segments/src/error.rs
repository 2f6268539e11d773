use thiserror::Error;

/// Failures raised while resolving segment membership.
///
/// Every variant is campaign-scoped: the decision engine skips the campaign
/// whose segment could not be resolved and moves on to the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SegmentError {
    /// The segment names a provider that was never registered.
    #[error("unknown segment provider {0:?}")]
    UnknownProvider(String),

    /// Two providers were registered under the same key.
    #[error("segment provider {0:?} registered twice")]
    DuplicateProvider(String),

    /// The provider could not be reached or answered with an error.
    #[error("segment provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// The provider did not answer within the configured timeout.
    #[error("segment provider {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// The provider's circuit breaker is open.
    #[error("segment provider {0} circuit open")]
    CircuitOpen(String),

    /// The provider answered with a body we could not interpret.
    #[error("segment provider {provider} sent an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    /// A serialized membership filter could not be decoded.
    #[error("invalid membership filter: {0}")]
    InvalidFilter(String),
}

impl SegmentError {
    pub fn unavailable<E: std::fmt::Display>(provider: &str, err: E) -> Self {
        SegmentError::ProviderUnavailable {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether the error is a misconfiguration rather than a transient
    /// provider problem.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SegmentError::UnknownProvider(_) | SegmentError::DuplicateProvider(_)
        )
    }
}
