//! Gatekeeper error types
//!
//! Programming and integration failures (bad input, unknown contacts, provider
//! outages, illegal stage transitions) are errors. Compliance refusals are not:
//! they travel as [`crate::compliance::RefusalReason`] values inside ordinary
//! results so batch sweeps can tally them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::cartridge::{CartridgeError, OutreachStage};
use crate::contact::StoreError;
use crate::providers::ProviderError;
use crate::resilience::CircuitError;
use crate::suppression::{SuppressionError, SuppressionReason};

/// Result type alias for gatekeeper operations
pub type GatekeeperResult<T> = Result<T, GatekeeperError>;

/// Machine-readable error taxonomy shared by every surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ProviderUnavailable,
    InvalidTransition,
    PermanentlySuppressed,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::PermanentlySuppressed => "PERMANENTLY_SUPPRESSED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP-style status used by the endpoint handlers.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::PermanentlySuppressed => 403,
            Self::NotFound => 404,
            Self::InvalidTransition => 409,
            Self::ProviderUnavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error body returned to callers of the endpoint handlers.
///
/// ```json
/// {
///   "code": "PROVIDER_UNAVAILABLE",
///   "message": "Provider 'trestle' unavailable: circuit open",
///   "recovery_action": "Retry from the scheduler once the provider recovers",
///   "retryable": true,
///   "context": { "provider": "trestle" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// What the caller should do next
    pub recovery_action: String,

    /// Whether a later retry may succeed
    #[serde(default)]
    pub retryable: bool,

    /// Relevant context for debugging
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl StructuredError {
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            recovery_action: recovery_action.into(),
            retryable: false,
            context: HashMap::new(),
        }
    }

    /// Add context key-value pair
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors that can occur during gatekeeper and state machine operations
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Bad input to an operation or endpoint
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Unknown contact, or a contact that belongs to another team
    #[error("Contact not found: {contact_id}")]
    ContactNotFound { contact_id: String },

    /// Circuit open or call timed out
    #[error("Provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The provider answered with an error
    #[error("Provider call failed: {0}")]
    Provider(#[source] ProviderError),

    /// Requested stage change is not in the transition table
    #[error("Invalid stage transition from {from} to {to}")]
    InvalidTransition {
        from: OutreachStage,
        to: OutreachStage,
    },

    /// An operation tried to undo a permanent suppression
    #[error("Contact {contact_id} is permanently suppressed ({reason})")]
    PermanentlySuppressed {
        contact_id: String,
        reason: SuppressionReason,
    },

    /// Outreach was requested in a state where it is not possible
    #[error("Cartridge error: {0}")]
    Cartridge(CartridgeError),

    /// Store failure
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl GatekeeperError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a contact-not-found error
    pub fn contact_not_found(contact_id: impl Into<String>) -> Self {
        Self::ContactNotFound {
            contact_id: contact_id.into(),
        }
    }

    /// Create a provider-unavailable error
    pub fn provider_unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Taxonomy bucket for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::ContactNotFound { .. } => ErrorCode::NotFound,
            Self::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            Self::Provider(_) => ErrorCode::Internal,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::PermanentlySuppressed { .. } => ErrorCode::PermanentlySuppressed,
            Self::Cartridge(_) => ErrorCode::InvalidTransition,
            Self::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            Self::Store(StoreError::Duplicate(_)) => ErrorCode::ValidationError,
            Self::Store(StoreError::InvalidPhone(_)) => ErrorCode::ValidationError,
            Self::Store(StoreError::LockPoisoned) => ErrorCode::Internal,
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. } => true,
            Self::Provider(e) => e.is_transient(),
            _ => false,
        }
    }

    fn recovery_action(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Fix the request parameters and resend.",
            Self::ContactNotFound { .. } => {
                "Check the contact id and that it belongs to the requesting team."
            }
            Self::ProviderUnavailable { .. } => {
                "Leave the contact pending; the scheduler retries on its next sweep."
            }
            Self::Provider(_) => {
                "Inspect the provider response; a failed trace or verification leaves the \
                 contact FAILED, a failed send is not counted as an attempt."
            }
            Self::InvalidTransition { .. } | Self::Cartridge(_) => {
                "Read the contact's current stage and request a transition listed for it."
            }
            Self::PermanentlySuppressed { .. } => {
                "Permanent suppressions cannot be lifted; drop the contact from outreach."
            }
            Self::Store(_) => "Retry the request; persistent failures need operator attention.",
        }
    }

    /// Convert to the structured body used by the endpoint handlers
    pub fn to_structured(&self) -> StructuredError {
        let mut err = StructuredError::new(self.code(), self.to_string(), self.recovery_action());
        match self {
            Self::ContactNotFound { contact_id } => {
                err = err.with_context("contact_id", contact_id.clone());
            }
            Self::ProviderUnavailable { provider, .. } => {
                err = err.with_context("provider", provider.clone());
            }
            Self::Provider(e) => {
                err = err.with_context("provider", e.provider().to_string());
            }
            Self::InvalidTransition { from, to } => {
                err = err
                    .with_context("from", from.to_string())
                    .with_context("to", to.to_string());
            }
            Self::PermanentlySuppressed { contact_id, reason } => {
                err = err
                    .with_context("contact_id", contact_id.clone())
                    .with_context("reason", reason.code());
            }
            _ => {}
        }
        if self.is_retryable() {
            err = err.retryable();
        }
        err
    }
}

impl From<StoreError> for GatekeeperError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::ContactNotFound { contact_id: id },
            other => Self::Store(other),
        }
    }
}

impl From<CartridgeError> for GatekeeperError {
    fn from(e: CartridgeError) -> Self {
        match e {
            CartridgeError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            other => Self::Cartridge(other),
        }
    }
}

impl From<SuppressionError> for GatekeeperError {
    fn from(e: SuppressionError) -> Self {
        match e {
            SuppressionError::Permanent { contact_id, reason } => {
                Self::PermanentlySuppressed { contact_id, reason }
            }
            SuppressionError::LockPoisoned => Self::Store(StoreError::LockPoisoned),
        }
    }
}

impl From<CircuitError<ProviderError>> for GatekeeperError {
    fn from(e: CircuitError<ProviderError>) -> Self {
        match e {
            CircuitError::Open { service } => Self::provider_unavailable(service, "circuit open"),
            CircuitError::Timeout {
                service,
                timeout_ms,
            } => Self::provider_unavailable(service, format!("timed out after {timeout_ms}ms")),
            CircuitError::Operation(e) => Self::Provider(e),
        }
    }
}
