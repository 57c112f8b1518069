//! # Errors
//!
//! One error enum per bounded context. Errors that belong to a single tool
//! call never abort a turn; they are rendered into the tool result instead.
//! Only [`AgentError`] ends a turn early.

use thiserror::Error;

/// Why a provider rejected a request for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentKind {
    Auth,
    Quota,
    BadRequest,
    Malformed,
    NotConfigured,
}

impl std::fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PermanentKind::Auth => "authentication failed",
            PermanentKind::Quota => "quota exhausted",
            PermanentKind::BadRequest => "bad request",
            PermanentKind::Malformed => "malformed response",
            PermanentKind::NotConfigured => "not configured",
        };
        f.write_str(label)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Normalized failure of a model gateway call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying: rate limits, timeouts, dropped connections, 5xx.
    #[error("transient provider error{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },
    /// Retrying will not help.
    #[error("provider error, {kind}: {message}")]
    Permanent { kind: PermanentKind, message: String },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        ProviderError::Permanent {
            kind,
            message: message.into(),
        }
    }

    /// Classifies an HTTP error status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 429 | 500..=599 => ProviderError::Transient {
                status: Some(status),
                message,
            },
            401 | 403 => ProviderError::permanent(PermanentKind::Auth, message),
            402 => ProviderError::permanent(PermanentKind::Quota, message),
            _ => ProviderError::permanent(PermanentKind::BadRequest, message),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ProviderError::from_status(status.as_u16(), e.to_string());
        }
        if e.is_decode() {
            return ProviderError::permanent(PermanentKind::Malformed, e.to_string());
        }
        if e.is_builder() {
            return ProviderError::permanent(PermanentKind::BadRequest, e.to_string());
        }
        // Timeouts, connection resets and truncated bodies.
        ProviderError::transient(e.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateTool(String),
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid spec for tool '{tool}': {reason}")]
    InvalidSpec { tool: String, reason: String },
}

/// A model-issued call that cannot be dispatched as given.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// Malformed edit-block input. `line` is 1-based.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed edit block at line {line}: {message}")]
pub struct EditBlockError {
    pub line: usize,
    pub message: String,
}

/// Errors that end a turn. The conversation is kept either way.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("stopped after {limit} tool rounds without a final answer")]
    MaxIterationsExceeded { limit: u32 },
}
