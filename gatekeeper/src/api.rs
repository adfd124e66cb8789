//! Endpoint handlers
//!
//! Transport-agnostic handlers for the three gatekeeper routes:
//!
//! ```text
//! POST /approve {contactId, teamId}   → {success, status, canContact, reason?}
//! GET  /approve?contactId&teamId      → {can_contact, reason}
//! POST /qualify {teamId}              → {ready, rejected, failed, errors}
//! ```
//!
//! Handlers validate input, call the gatekeeper and map failures to an
//! [`ApiError`] carrying an HTTP-style status and a [`StructuredError`] body.
//! Compliance refusals are successful responses.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compliance::ComplianceGatekeeper;
use crate::error::{GatekeeperError, StructuredError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApproveResponse {
    pub success: bool,
    pub status: String,
    pub can_contact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Query string of the read-only check route.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CheckResponse {
    pub can_contact: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualifyRequest {
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualifyErrorBody {
    pub contact_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualifyResponse {
    pub ready: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Rejections by reason code
    pub rejections: BTreeMap<String, usize>,
    pub errors: Vec<QualifyErrorBody>,
}

/// Handler failure: HTTP-style status plus structured body.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: u16,
    pub body: StructuredError,
}

impl From<GatekeeperError> for ApiError {
    fn from(e: GatekeeperError) -> Self {
        let body = e.to_structured();
        Self {
            status: body.code.http_status(),
            body,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status, self.body)
    }
}

impl std::error::Error for ApiError {}

fn required(field: &str, value: Option<&str>) -> Result<String, ApiError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(GatekeeperError::validation(format!("{field} is required")).into()),
    }
}

/// `POST /approve`
pub async fn approve(
    gatekeeper: &ComplianceGatekeeper,
    request: ApproveRequest,
) -> Result<ApproveResponse, ApiError> {
    let contact_id = required("contactId", request.contact_id.as_deref())?;
    let team_id = required("teamId", request.team_id.as_deref())?;
    let outcome = gatekeeper.approve(&contact_id, &team_id).await?;
    Ok(ApproveResponse {
        success: outcome.success,
        status: outcome.status.to_string(),
        can_contact: outcome.can_contact,
        reason: outcome.reason.map(|r| r.code().to_string()),
    })
}

/// `GET /approve?contactId&teamId`
pub fn check(
    gatekeeper: &ComplianceGatekeeper,
    query: CheckQuery,
) -> Result<CheckResponse, ApiError> {
    let contact_id = required("contactId", query.contact_id.as_deref())?;
    let team_id = required("teamId", query.team_id.as_deref())?;
    let decision = gatekeeper.can_contact(&contact_id, &team_id)?;
    Ok(CheckResponse {
        can_contact: decision.allowed,
        reason: decision.reason.map(|r| r.code().to_string()),
    })
}

/// `POST /qualify`
pub async fn qualify(
    gatekeeper: &ComplianceGatekeeper,
    request: QualifyRequest,
) -> Result<QualifyResponse, ApiError> {
    let team_id = required("teamId", request.team_id.as_deref())?;
    let summary = gatekeeper.qualify(&team_id).await?;
    if summary.failed > 0 {
        warn!(team_id = %team_id, failed = summary.failed, "qualify finished with per-contact errors");
    }
    Ok(QualifyResponse {
        ready: summary.ready,
        rejected: summary.rejected,
        failed: summary.failed,
        rejections: summary.rejections,
        errors: summary
            .errors
            .into_iter()
            .map(|e| QualifyErrorBody {
                contact_id: e.contact_id,
                code: e.code.as_str().to_string(),
                message: e.message,
            })
            .collect(),
    })
}

/// JSON schemas of every request and response type, keyed by type name.
pub fn schemas() -> BTreeMap<&'static str, schemars::schema::RootSchema> {
    BTreeMap::from([
        ("ApproveRequest", schemars::schema_for!(ApproveRequest)),
        ("ApproveResponse", schemars::schema_for!(ApproveResponse)),
        ("CheckQuery", schemars::schema_for!(CheckQuery)),
        ("CheckResponse", schemars::schema_for!(CheckResponse)),
        ("QualifyRequest", schemars::schema_for!(QualifyRequest)),
        ("QualifyResponse", schemars::schema_for!(QualifyResponse)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::compliance::CompliancePolicy;
    use crate::contact::{ContactStore, NewContact};
    use crate::error::ErrorCode;
    use crate::providers::{StaticTraceProvider, StaticVerificationProvider, VerificationResult};
    use crate::resilience::{BreakerConfig, CircuitBreaker};
    use crate::scoring::LineType;
    use crate::suppression::SuppressionRegistry;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn gatekeeper() -> ComplianceGatekeeper {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
        let verifier = StaticVerificationProvider::new("verify").with_result(
            "4155550123",
            VerificationResult {
                line_type: LineType::Mobile,
                activity_confidence: Some(75),
                valid: true,
                flags: vec![],
            },
        );
        let gk = ComplianceGatekeeper::new(
            ContactStore::new(clock.clone()).shared(),
            SuppressionRegistry::new().shared(),
            CircuitBreaker::new(BreakerConfig::default(), clock.clone()).shared(),
            Arc::new(StaticTraceProvider::new("trace")),
            Arc::new(verifier),
            clock,
        )
        .with_policy(CompliancePolicy {
            require_trace: false,
            ..Default::default()
        });
        gk.store()
            .ingest(NewContact {
                id: Some("c-1".into()),
                team_id: "team-a".into(),
                phones: vec!["4155550123".into()],
                ..Default::default()
            })
            .unwrap();
        gk
    }

    #[tokio::test]
    async fn test_approve_response_shape() {
        let gk = gatekeeper();
        let response = approve(
            &gk,
            ApproveRequest {
                contact_id: Some("c-1".into()),
                team_id: Some("team-a".into()),
            },
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["status"], "CAMPAIGN_READY");
        assert_eq!(json["canContact"], true);
        assert!(json.get("reason").is_none());
    }

    #[tokio::test]
    async fn test_missing_team_is_validation_error() {
        let gk = gatekeeper();
        let err = approve(
            &gk,
            ApproveRequest {
                contact_id: Some("c-1".into()),
                team_id: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(err.body.code, ErrorCode::ValidationError);

        let err = qualify(&gk, QualifyRequest { team_id: Some("  ".into()) })
            .await
            .unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_check_uses_snake_case_and_reports_reason() {
        let gk = gatekeeper();
        let query: CheckQuery =
            serde_json::from_str(r#"{"contactId": "c-1", "teamId": "team-a"}"#).unwrap();
        let response = check(&gk, query).unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["can_contact"], false);
        assert_eq!(json["reason"], "not_campaign_ready");

        let err = check(
            &gk,
            CheckQuery {
                contact_id: Some("c-1".into()),
                team_id: Some("team-b".into()),
            },
        )
        .unwrap_err();
        assert_eq!(err.status, 404);
    }

    #[tokio::test]
    async fn test_qualify_counts() {
        let gk = gatekeeper();
        let response = qualify(&gk, QualifyRequest { team_id: Some("team-a".into()) })
            .await
            .unwrap();
        assert_eq!(response.ready, 1);
        assert_eq!(response.rejected, 0);
        assert!(response.errors.is_empty());
    }

    #[test]
    fn test_schemas_cover_every_route() {
        let schemas = schemas();
        assert_eq!(schemas.len(), 6);
        let approve = serde_json::to_value(&schemas["ApproveRequest"]).unwrap();
        assert!(approve["properties"].get("contactId").is_some());
    }
}
