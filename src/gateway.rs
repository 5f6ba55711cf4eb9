//! Per-request orchestration: dispatch, validate, transform, audit.
//!
//! Every call produces exactly one verdict, which is audited before the
//! caller sees anything. The only suspension point is the engine call,
//! which races a deadline for the single settlement.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditSubject};
use crate::config::GatewayConfig;
use crate::disclosure::{self, NoAnswerMatcher};
use crate::engine::http::HttpEngine;
use crate::engine::{ChatMessage, ChatRole, EngineError, EngineRequest, QueryEngine};
use crate::policy::{DisclaimMode, PolicyRegistry};
use crate::validator::{evaluate, Outcome, Settlement, Verdict, VerdictReason};

// ---------------------------------------------------------------------------
// Inbound contract
// ---------------------------------------------------------------------------

/// Caller request: a role claim and the conversation so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Caller role. Unauthenticated; unknown roles get the fallback grant.
    #[serde(default)]
    pub role: String,
    /// Conversation, oldest first. The last message must be the user's question.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Answer delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    /// Per-request id, also the audit trace id.
    pub id: String,
    /// Final, possibly rewritten, answer text.
    pub message: String,
    /// Unprefixed views the engine reported using.
    pub tables_used: Vec<String>,
    /// Generated structured query, when the engine returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    /// Engine-reported confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Engine-side execution time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    /// Total tokens the engine reported spending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Terminal failures reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Engine endpoint or credentials missing; no call was attempted.
    #[error("Query engine not configured")]
    NotConfigured,
    /// The request carried no usable question.
    #[error("{0}")]
    BadRequest(String),
    /// The answer was refused by policy.
    #[error("Access Denied: {0}")]
    AccessDenied(String),
    /// Network failure, timeout, or non-success status from the engine.
    #[error("engine transport failure: {0}")]
    Transport(String),
    /// The engine's response body was malformed.
    #[error("engine response malformed: {0}")]
    Parse(String),
    /// The gateway itself failed.
    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl From<&EngineError> for GatewayError {
    fn from(err: &EngineError) -> Self {
        if err.is_transport() {
            Self::Transport(err.to_string())
        } else {
            Self::Parse(err.to_string())
        }
    }
}

const DENY_MISSING_PROVENANCE: &str =
    "the answer could not be traced to data sources permitted for your role";
const DENY_UNAUTHORIZED: &str = "the answer drew on data sources not permitted for your role";

/// Default bound on one engine call, matching `engine.timeout_secs`.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(90);

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// The authorization gateway.
///
/// Holds only read-only state, so one instance serves all requests in
/// parallel behind an `Arc`.
pub struct Gateway {
    policy: PolicyRegistry,
    engine: Option<Arc<dyn QueryEngine>>,
    audit: AuditLogger,
    no_answer: NoAnswerMatcher,
    mode: DisclaimMode,
    history_limit: usize,
    deadline: Duration,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("policy", &self.policy)
            .field("engine", &self.engine.as_ref().map(|e| e.endpoint().to_owned()))
            .field("mode", &self.mode)
            .field("history_limit", &self.history_limit)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway with default no-answer patterns, disclose mode,
    /// a 10-message history window and a 90 second call deadline.
    pub fn new(
        policy: PolicyRegistry,
        engine: Option<Arc<dyn QueryEngine>>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            policy,
            engine,
            audit,
            no_answer: NoAnswerMatcher::default(),
            mode: DisclaimMode::default(),
            history_limit: 10,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Set handling of answers that used views outside the grant.
    pub fn with_disclaim_mode(mut self, mode: DisclaimMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the no-answer matcher.
    pub fn with_no_answer_matcher(mut self, matcher: NoAnswerMatcher) -> Self {
        self.no_answer = matcher;
        self
    }

    /// Set how many prior messages are folded into each question.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Bound each engine call. An expired call settles as an error and
    /// any later engine completion is ignored.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build a gateway from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy, patterns, engine URL, or audit log
    /// path are invalid.
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let policy = config.policy_registry()?;
        let audit = AuditLogger::new(&config.paths.audit_log).map_err(|e| {
            anyhow::anyhow!(
                "failed to open audit log {}: {e}",
                config.paths.audit_log.display()
            )
        })?;

        let engine: Option<Arc<dyn QueryEngine>> = match config.engine_target() {
            Some((url, creds)) => Some(Arc::new(HttpEngine::new(
                url,
                creds,
                config.engine.timeout(),
            )?)),
            None => {
                warn!("engine URL or credentials missing; chat requests will return 503");
                None
            }
        };

        Ok(Self::new(policy, engine, audit)
            .with_disclaim_mode(config.policy.disclaim_mode)
            .with_no_answer_matcher(config.no_answer_matcher()?)
            .with_history_limit(config.engine.history_messages)
            .with_deadline(config.engine.timeout()))
    }

    /// Whether an engine is available for dispatch.
    pub fn engine_configured(&self) -> bool {
        self.engine.is_some()
    }

    /// The policy in force.
    pub fn policy(&self) -> &PolicyRegistry {
        &self.policy
    }

    /// Answer one caller request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for Deny and Error outcomes, malformed
    /// requests, and a missing engine configuration.
    pub async fn answer(&self, request: ChatRequest) -> Result<ChatReply, GatewayError> {
        let trace_id = Uuid::new_v4().to_string();
        let grant = self.policy.grant(&request.role);
        if grant.fell_back {
            info!(
                trace_id = %trace_id,
                role = %request.role,
                effective_role = grant.effective_role,
                "unrecognized role, applying fallback grant"
            );
        }
        let subject = AuditSubject {
            trace_id: &trace_id,
            role: &request.role,
            effective_role: grant.effective_role,
            allowed_count: grant.allowed.len(),
        };

        let engine_request = self.engine_request(&request, grant.hint())?;

        let Some(engine) = self.engine.as_ref() else {
            self.audit.record(&subject, &Verdict::engine_failure());
            return Err(GatewayError::NotConfigured);
        };

        let settlement = Arc::new(Settlement::new());
        let mut expiry = tokio::spawn(expire_after(Arc::clone(&settlement), self.deadline));
        let result = tokio::select! {
            result = engine.answer_question(&engine_request) => Some(result),
            _ = &mut expiry => None,
        };
        expiry.abort();

        if let Some(result) = &result {
            let verdict = evaluate(&grant, result.as_ref(), &self.no_answer, self.mode);
            if let Err(e) = settlement.settle(verdict) {
                debug!(trace_id = %trace_id, error = %e, "ignoring late completion");
            }
        }
        let verdict = settlement
            .verdict()
            .ok_or_else(|| GatewayError::Internal("call completed without a verdict".to_owned()))?;

        self.audit.record(&subject, &verdict);

        match (verdict.outcome, result) {
            (Outcome::Error, Some(Err(err))) => Err(GatewayError::from(&err)),
            (Outcome::Error, _) => {
                warn!(trace_id = %trace_id, deadline = ?self.deadline, "engine call expired");
                Err(GatewayError::Transport(format!(
                    "engine call exceeded {:?} deadline",
                    self.deadline
                )))
            }
            (Outcome::Deny, _) => Err(GatewayError::AccessDenied(
                match verdict.reason {
                    VerdictReason::MissingProvenance => DENY_MISSING_PROVENANCE,
                    _ => DENY_UNAUTHORIZED,
                }
                .to_owned(),
            )),
            (Outcome::Allow | Outcome::Disclaim, Some(Ok(response))) => {
                let message = disclosure::transform(&verdict, &response.answer_text)
                    .ok_or_else(|| GatewayError::Internal("no message for outcome".to_owned()))?;
                Ok(ChatReply {
                    id: trace_id,
                    message,
                    tables_used: verdict
                        .resources_used
                        .iter()
                        .map(|view| view.name().to_owned())
                        .collect(),
                    sql_query: response.structured_query,
                    confidence: response.confidence,
                    execution_time: response.execution_time,
                    tokens: response.total_tokens,
                })
            }
            (outcome, _) => Err(GatewayError::Internal(format!(
                "verdict {outcome:?} does not match engine result"
            ))),
        }
    }

    fn engine_request(
        &self,
        request: &ChatRequest,
        resource_hint: Vec<String>,
    ) -> Result<EngineRequest, GatewayError> {
        let Some((last, earlier)) = request.messages.split_last() else {
            return Err(GatewayError::BadRequest("No question provided".to_owned()));
        };
        if last.role != ChatRole::User || last.content.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "The last message must be a non-empty user question".to_owned(),
            ));
        }
        let skip = earlier.len().saturating_sub(self.history_limit);
        Ok(EngineRequest {
            question: last.content.trim().to_owned(),
            history: earlier.iter().skip(skip).cloned().collect(),
            resource_hint,
        })
    }
}

/// Settle `settlement` as an engine failure once `deadline` passes.
async fn expire_after(settlement: Arc<Settlement>, deadline: Duration) -> bool {
    tokio::time::sleep(deadline).await;
    settlement.settle(Verdict::engine_failure()).is_ok()
}
