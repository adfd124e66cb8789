//! External provider contracts
//!
//! Skip-trace, phone verification and messaging are third-party services.
//! The gatekeeper only sees them through these traits, and every call goes
//! through the circuit breaker keyed by the provider's [`id`](TraceProvider::id).
//!
//! ```text
//! ┌────────────┐  trace()        ┌────────────────┐
//! │ Gatekeeper │ ──────────────▶ │ TraceProvider  │  (minutes, polled)
//! │            │  get_results()  └────────────────┘
//! │            │  verify_phone() ┌────────────────────┐
//! │            │ ──────────────▶ │ VerificationProvider│
//! └────────────┘                 └────────────────────┘
//! ┌────────────┐  send()         ┌──────────────────┐
//! │ Dispatcher │ ──────────────▶ │ MessagingProvider │
//! └────────────┘                 └──────────────────┘
//! ```

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contact::ContactId;
use crate::scoring::LineType;
use crate::suppression::SuppressionReason;

pub use memory::{RecordingMessenger, SentMessage, StaticTraceProvider, StaticVerificationProvider};

/// Errors reported by a provider call
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{provider}: request failed: {message}")]
    RequestFailed { provider: String, message: String },

    #[error("{provider}: rejected request: {message}")]
    Rejected { provider: String, message: String },

    #[error("{provider}: rate limited")]
    RateLimited { provider: String },

    #[error("{provider}: unknown queue {queue_id}")]
    UnknownQueue { provider: String, queue_id: String },
}

impl ProviderError {
    pub fn request_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Id of the provider that produced the error
    pub fn provider(&self) -> &str {
        match self {
            Self::RequestFailed { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::RateLimited { provider }
            | Self::UnknownQueue { provider, .. } => provider,
        }
    }

    /// Whether a later attempt could succeed without changing the request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// One record submitted for skip-tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRequest {
    pub contact_id: ContactId,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
}

/// Acknowledgement of a queued trace batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceQueued {
    pub queue_id: String,
    pub credits_per_record: f64,
}

/// Trace output for one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceResult {
    pub contact_id: ContactId,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub confidence: Option<u8>,
}

/// Verification output for one phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub line_type: LineType,
    #[serde(default)]
    pub activity_confidence: Option<u8>,
    #[serde(default = "default_valid")]
    pub valid: bool,
    /// Suppression reasons the provider flagged (DNC hits, litigators, ...)
    #[serde(default)]
    pub flags: Vec<SuppressionReason>,
}

fn default_valid() -> bool {
    true
}

/// Receipt for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub status: String,
}

/// Skip-trace provider
#[async_trait]
pub trait TraceProvider: Send + Sync {
    /// Provider id, also the circuit breaker service name
    fn id(&self) -> &str;

    /// Queue a batch of records for tracing
    async fn trace(&self, records: &[TraceRequest]) -> Result<TraceQueued, ProviderError>;

    /// Poll a queued batch; `None` while it is still running
    async fn get_results(&self, queue_id: &str)
        -> Result<Option<Vec<TraceResult>>, ProviderError>;
}

/// Phone verification provider
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn verify_phone(&self, number: &str) -> Result<VerificationResult, ProviderError>;
}

/// Outbound messaging provider
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn send(&self, to: &str, from: &str, body: &str) -> Result<SendReceipt, ProviderError>;
}

pub type SharedTraceProvider = Arc<dyn TraceProvider>;
pub type SharedVerificationProvider = Arc<dyn VerificationProvider>;
pub type SharedMessagingProvider = Arc<dyn MessagingProvider>;
