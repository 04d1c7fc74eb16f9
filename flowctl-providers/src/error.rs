//! Error types for the provider capability layer and failover chain
//! (`spec.md` §4.3, §7 `provider-exhausted` / `provider-error`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{0}' is not configured")]
    UnknownProvider(String),

    #[error("provider '{provider}' rejected the request: {message}")]
    Rejected { provider: String, message: String },

    #[error("provider '{provider}' timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("provider '{provider}' rate-limited the request: {message}")]
    RateLimited { provider: String, message: String },

    #[error("every provider in the failover chain was exhausted: {attempts}")]
    Exhausted { attempts: String },

    #[error("provider '{0}' returned a malformed response: {1}")]
    MalformedResponse(String, String),

    #[error(transparent)]
    Transport(#[from] genai::Error),
}

impl ProviderError {
    /// Transient failures worth retrying the next entry in a failover chain
    /// for (`spec.md` §4.3 "retryable vs terminal"). Authentication and
    /// schema/request errors are terminal; only transport/timeout/rate-limit
    /// failures trigger failover.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::RateLimited { .. } => true,
            ProviderError::Transport(err) => transport_is_retryable(err),
            ProviderError::UnknownProvider(_)
            | ProviderError::Rejected { .. }
            | ProviderError::Exhausted { .. }
            | ProviderError::MalformedResponse(_, _) => false,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            ProviderError::UnknownProvider(p) => Some(p),
            ProviderError::Rejected { provider, .. } => Some(provider),
            ProviderError::Timeout { provider, .. } => Some(provider),
            ProviderError::RateLimited { provider, .. } => Some(provider),
            ProviderError::MalformedResponse(p, _) => Some(p),
            ProviderError::Exhausted { .. } | ProviderError::Transport(_) => None,
        }
    }
}

/// Classifies a `genai` transport failure as terminal (auth/request/schema) or
/// retryable (network/timeout/server/rate-limit), the way `siumai`'s
/// `ErrorCategory` splits `Client` from transient categories. Terminal markers
/// win ties so an ambiguous message is treated as non-retryable rather than
/// burning through the whole failover chain on an unrecoverable error.
const TERMINAL_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "400",
    "bad request",
    "invalid request",
    "schema",
];

const RETRYABLE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "429",
    "rate limit",
    "500",
    "502",
    "503",
    "504",
    "connection",
    "network",
];

fn transport_is_retryable(err: &genai::Error) -> bool {
    let message = err.to_string().to_lowercase();
    if TERMINAL_MARKERS.iter().any(|m| message.contains(m)) {
        return false;
    }
    RETRYABLE_MARKERS.iter().any(|m| message.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_rate_limit_are_retryable() {
        assert!(ProviderError::Timeout {
            provider: "openai".into(),
            timeout_secs: 30
        }
        .is_retryable());
        assert!(ProviderError::RateLimited {
            provider: "openai".into(),
            message: "429".into()
        }
        .is_retryable());
    }

    #[test]
    fn unknown_provider_is_terminal() {
        assert!(!ProviderError::UnknownProvider("nope".into()).is_retryable());
    }

    #[test]
    fn transport_classifies_auth_errors_as_terminal() {
        assert!(!transport_is_retryable_for_message("401 Unauthorized: invalid api key"));
        assert!(!transport_is_retryable_for_message("400 Bad Request: schema validation failed"));
    }

    #[test]
    fn transport_classifies_server_and_rate_limit_errors_as_retryable() {
        assert!(transport_is_retryable_for_message("503 Service Unavailable"));
        assert!(transport_is_retryable_for_message("429 Too Many Requests: rate limit exceeded"));
        assert!(transport_is_retryable_for_message("request timed out after 30s"));
    }

    fn transport_is_retryable_for_message(message: &str) -> bool {
        let lower = message.to_lowercase();
        if TERMINAL_MARKERS.iter().any(|m| lower.contains(m)) {
            return false;
        }
        RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
    }
}
