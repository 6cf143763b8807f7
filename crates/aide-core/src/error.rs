//! Error types for the orchestration engine.
//!
//! Only transport failures end a turn. Validation and capability errors are
//! turned into tool results so the model can correct itself on the next turn.

use aide_providers::ProviderError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("a turn is already in progress")]
    Busy,
    #[error("turn cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Problems with a tool invocation's arguments, detected before any provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required field '{field}'")]
    MissingField { field: String },
    #[error("field '{field}' must be {expected}")]
    WrongType { field: String, expected: &'static str },
    #[error("field '{field}' is invalid: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    pub fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    pub fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_string(),
            expected,
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by (or on behalf of) a capability provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("no item with id '{0}'")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("{0} is not available")]
    Unavailable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl CapabilityError {
    /// The requested end state already holds (e.g. deleting an absent item).
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Turn a transport failure into the short text shown in place of a reply.
pub fn describe_transport_error(error: &anyhow::Error) -> String {
    if let Some(provider_error) = error.downcast_ref::<ProviderError>() {
        return match provider_error {
            ProviderError::Http { status: 401, .. } | ProviderError::Http { status: 403, .. } => {
                "The assistant service rejected the API key. Check your configuration.".to_string()
            }
            ProviderError::Http { status: 429, .. } => {
                "The assistant service is rate limiting requests. Try again shortly.".to_string()
            }
            ProviderError::Http { status, .. } if *status >= 500 => {
                format!("The assistant service is unavailable (HTTP {}). Try again later.", status)
            }
            ProviderError::Http { status, body } => {
                format!("The assistant service returned HTTP {}: {}", status, truncate(body, 200))
            }
            ProviderError::Connection(detail) => {
                format!("Could not reach the assistant service: {}", detail)
            }
            ProviderError::Stream(detail) => {
                format!("The response was interrupted: {}", detail)
            }
        };
    }

    let message = error.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") {
        "The assistant service timed out. Try again.".to_string()
    } else {
        format!(
            "Something went wrong talking to the assistant service: {}",
            truncate(&message, 200)
        )
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
