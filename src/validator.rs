//! Response validation: the single enforcement point for view access.
//!
//! The engine's resource hint is advisory. After each call this module
//! inspects what the engine reports it consulted and reaches exactly one
//! terminal outcome:
//!
//! 1. engine call failed → [`Outcome::Error`]
//! 2. no views reported, explicit "no answer" → [`Outcome::Allow`]
//! 3. no views reported, substantive answer → [`Outcome::Deny`] (fail-closed)
//! 4. all reported views permitted → [`Outcome::Allow`]
//! 5. some reported view not permitted → [`Outcome::Disclaim`], or
//!    [`Outcome::Deny`] under [`DisclaimMode::Deny`]
//!
//! A [`Settlement`] holds the terminal verdict for one call and refuses any
//! second transition.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::disclosure::NoAnswerMatcher;
use crate::engine::{EngineError, EngineResponse};
use crate::policy::{normalize_views, DisclaimMode, ResourceView, RoleGrant};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Terminal decision for one engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Deliver the answer.
    Allow,
    /// Deliver the answer with an advisory notice.
    Disclaim,
    /// Refuse the answer as a policy violation.
    Deny,
    /// The engine call failed.
    Error,
}

/// Why a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// Engine explicitly found nothing and touched no views.
    NoAnswer,
    /// Every reported view is permitted.
    Authorized,
    /// Some reported views are outside the role's grant.
    Unauthorized,
    /// Substantive answer with no usage report.
    MissingProvenance,
    /// Transport, status, timeout, or parse failure.
    EngineFailure,
}

/// The computed decision for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Terminal outcome.
    pub outcome: Outcome,
    /// Which branch produced it.
    pub reason: VerdictReason,
    /// Normalized views the engine reported.
    pub resources_used: Vec<ResourceView>,
    /// Reported views outside the role's grant.
    pub unauthorized: Vec<ResourceView>,
}

impl Verdict {
    /// Verdict for an engine call that produced no usable response.
    pub fn engine_failure() -> Self {
        Self {
            outcome: Outcome::Error,
            reason: VerdictReason::EngineFailure,
            resources_used: Vec::new(),
            unauthorized: Vec::new(),
        }
    }
}

/// Decide the outcome for one engine call.
pub fn evaluate(
    grant: &RoleGrant<'_>,
    result: Result<&EngineResponse, &EngineError>,
    no_answer: &NoAnswerMatcher,
    mode: DisclaimMode,
) -> Verdict {
    let response = match result {
        Ok(response) => response,
        Err(_) => return Verdict::engine_failure(),
    };

    let used = normalize_views(response.resources_used.iter().map(String::as_str));

    if used.is_empty() {
        let (outcome, reason) = if no_answer.is_no_answer(&response.answer_text) {
            (Outcome::Allow, VerdictReason::NoAnswer)
        } else {
            (Outcome::Deny, VerdictReason::MissingProvenance)
        };
        return Verdict {
            outcome,
            reason,
            resources_used: Vec::new(),
            unauthorized: Vec::new(),
        };
    }

    let unauthorized: Vec<ResourceView> = used
        .iter()
        .filter(|view| !grant.permits(view))
        .cloned()
        .collect();

    let (outcome, reason) = match (unauthorized.is_empty(), mode) {
        (true, _) => (Outcome::Allow, VerdictReason::Authorized),
        (false, DisclaimMode::Disclose) => (Outcome::Disclaim, VerdictReason::Unauthorized),
        (false, DisclaimMode::Deny) => (Outcome::Deny, VerdictReason::Unauthorized),
    };

    Verdict {
        outcome,
        reason,
        resources_used: used,
        unauthorized,
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Validation state for one call. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// No terminal outcome yet.
    Pending,
    /// Settled as [`Outcome::Allow`].
    Allow,
    /// Settled as [`Outcome::Disclaim`].
    Disclaim,
    /// Settled as [`Outcome::Deny`].
    Deny,
    /// Settled as [`Outcome::Error`].
    Error,
}

impl From<Outcome> for ValidationState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Allow => Self::Allow,
            Outcome::Disclaim => Self::Disclaim,
            Outcome::Deny => Self::Deny,
            Outcome::Error => Self::Error,
        }
    }
}

/// Rejected settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// A terminal outcome was already recorded.
    #[error("call already settled as {current:?}")]
    AlreadySettled {
        /// The state that won.
        current: ValidationState,
    },
}

/// One-shot holder for a call's terminal verdict.
///
/// Safe to share between racing completion sources; only the first
/// [`Settlement::settle`] succeeds.
#[derive(Debug, Default)]
pub struct Settlement {
    verdict: Mutex<Option<Verdict>>,
}

impl Settlement {
    /// A pending settlement.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal verdict.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::AlreadySettled`] if a verdict was already
    /// recorded; the recorded verdict is left untouched.
    pub fn settle(&self, verdict: Verdict) -> Result<(), SettlementError> {
        let mut slot = self.verdict.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            return Err(SettlementError::AlreadySettled {
                current: current.outcome.into(),
            });
        }
        *slot = Some(verdict);
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> ValidationState {
        let slot = self.verdict.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .map_or(ValidationState::Pending, |v| v.outcome.into())
    }

    /// A copy of the recorded verdict, if any.
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Consume the settlement, yielding the verdict if one was recorded.
    pub fn into_verdict(self) -> Option<Verdict> {
        self.verdict
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
