//! In-memory providers
//!
//! Deterministic stand-ins for the third-party services, driven by fixtures.
//! The CLI scenario runner and the tests use them; each can be switched into a
//! failing mode to exercise the breaker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    MessagingProvider, ProviderError, SendReceipt, TraceProvider, TraceQueued, TraceRequest,
    TraceResult, VerificationProvider, VerificationResult,
};
use crate::contact::{normalize_phone, ContactId};

/// Trace provider that answers from a fixture keyed by contact id.
///
/// A batch completes after `polls_until_ready` calls to `get_results`.
#[derive(Debug)]
pub struct StaticTraceProvider {
    id: String,
    fixtures: HashMap<ContactId, TraceResult>,
    queues: Mutex<HashMap<String, (Vec<ContactId>, u32)>>,
    polls_until_ready: u32,
    credits_per_record: f64,
    failing: AtomicBool,
}

impl StaticTraceProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fixtures: HashMap::new(),
            queues: Mutex::new(HashMap::new()),
            polls_until_ready: 0,
            credits_per_record: 0.25,
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_result(mut self, result: TraceResult) -> Self {
        self.fixtures.insert(result.contact_id.clone(), result);
        self
    }

    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::request_failed(&self.id, "simulated outage"));
        }
        Ok(())
    }

    fn poisoned(&self) -> ProviderError {
        ProviderError::request_failed(&self.id, "queue state poisoned")
    }
}

#[async_trait]
impl TraceProvider for StaticTraceProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn trace(&self, records: &[TraceRequest]) -> Result<TraceQueued, ProviderError> {
        self.check_failing()?;
        let queue_id = format!("{}-{}", self.id, Uuid::new_v4());
        let ids = records.iter().map(|r| r.contact_id.clone()).collect();
        self.queues
            .lock()
            .map_err(|_| self.poisoned())?
            .insert(queue_id.clone(), (ids, 0));
        Ok(TraceQueued {
            queue_id,
            credits_per_record: self.credits_per_record,
        })
    }

    async fn get_results(
        &self,
        queue_id: &str,
    ) -> Result<Option<Vec<TraceResult>>, ProviderError> {
        self.check_failing()?;
        let mut queues = self.queues.lock().map_err(|_| self.poisoned())?;
        let (ids, polls) = queues
            .get_mut(queue_id)
            .ok_or_else(|| ProviderError::UnknownQueue {
                provider: self.id.clone(),
                queue_id: queue_id.to_string(),
            })?;

        if *polls < self.polls_until_ready {
            *polls += 1;
            return Ok(None);
        }

        // Contacts without a fixture come back empty-handed
        Ok(Some(
            ids.iter()
                .map(|id| {
                    self.fixtures.get(id).cloned().unwrap_or(TraceResult {
                        contact_id: id.clone(),
                        phones: Vec::new(),
                        emails: Vec::new(),
                        confidence: None,
                    })
                })
                .collect(),
        ))
    }
}

/// Verification provider answering from a fixture keyed by normalized phone.
#[derive(Debug)]
pub struct StaticVerificationProvider {
    id: String,
    fixtures: Mutex<HashMap<String, VerificationResult>>,
    latency: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl StaticVerificationProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fixtures: Mutex::new(HashMap::new()),
            latency: None,
            failing: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_result(self, phone: &str, result: VerificationResult) -> Self {
        self.set_result(phone, result);
        self
    }

    /// Replace the answer for `phone`, as when the vendor's data changes.
    pub fn set_result(&self, phone: &str, result: VerificationResult) {
        let key = normalize_phone(phone).unwrap_or_else(|| phone.to_string());
        if let Ok(mut fixtures) = self.fixtures.lock() {
            fixtures.insert(key, result);
        }
    }

    /// Delay every answer, for timeout tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationProvider for StaticVerificationProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn verify_phone(&self, number: &str) -> Result<VerificationResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::request_failed(&self.id, "simulated outage"));
        }
        self.fixtures
            .lock()
            .map_err(|_| ProviderError::request_failed(&self.id, "fixtures poisoned"))?
            .get(number)
            .cloned()
            .ok_or_else(|| ProviderError::rejected(&self.id, format!("no data for {number}")))
    }
}

/// A message accepted by [`RecordingMessenger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub to: String,
    pub from: String,
    pub body: String,
}

/// Messaging provider that records every send.
#[derive(Debug)]
pub struct RecordingMessenger {
    id: String,
    sent: Mutex<Vec<SentMessage>>,
    failing: AtomicBool,
}

impl RecordingMessenger {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessagingProvider for RecordingMessenger {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, to: &str, from: &str, body: &str) -> Result<SendReceipt, ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::request_failed(&self.id, "simulated outage"));
        }
        let message_id = Uuid::new_v4().to_string();
        self.sent
            .lock()
            .map_err(|_| ProviderError::request_failed(&self.id, "outbox poisoned"))?
            .push(SentMessage {
                message_id: message_id.clone(),
                to: to.to_string(),
                from: from.to_string(),
                body: body.to_string(),
            });
        Ok(SendReceipt {
            message_id,
            status: "queued".to_string(),
        })
    }
}
