//! Audit logger for gateway decisions.
//!
//! Writes structured JSON entries, one per line, to an append-only sink.
//! Recording never fails the caller: write errors are reported through
//! `tracing` and dropped, so the response path is unaffected.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::policy::ResourceView;
use crate::validator::{Outcome, Verdict, VerdictReason};

/// Audit event type discriminator.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// The validator reached a terminal outcome for a call.
    GatewayDecision,
}

/// A single structured audit log entry.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    timestamp: String,
    trace_id: &'a str,
    event_type: AuditEventType,
    details: DecisionDetails<'a>,
}

#[derive(Debug, Serialize)]
struct DecisionDetails<'a> {
    role: &'a str,
    effective_role: &'a str,
    allowed_count: usize,
    used: Vec<&'a str>,
    unauthorized: Vec<&'a str>,
    outcome: Outcome,
    reason: VerdictReason,
}

/// Who asked, for one audit record.
#[derive(Debug, Clone, Copy)]
pub struct AuditSubject<'a> {
    /// Per-request correlation id.
    pub trace_id: &'a str,
    /// Role claimed by the caller.
    pub role: &'a str,
    /// Role whose grant was applied.
    pub effective_role: &'a str,
    /// Size of the applied grant.
    pub allowed_count: usize,
}

/// Audit logger writing structured JSON to an append-only sink.
pub struct AuditLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create an audit logger that appends to the given file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Create an audit logger from an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Record one decision. Never fails.
    pub fn record(&self, subject: &AuditSubject<'_>, verdict: &Verdict) {
        let used = names(&verdict.resources_used);
        let unauthorized = names(&verdict.unauthorized);

        match verdict.outcome {
            Outcome::Allow => info!(
                trace_id = subject.trace_id,
                role = subject.role,
                allowed_count = subject.allowed_count,
                used = ?used,
                reason = ?verdict.reason,
                "answer allowed"
            ),
            Outcome::Disclaim | Outcome::Deny => warn!(
                trace_id = subject.trace_id,
                role = subject.role,
                effective_role = subject.effective_role,
                allowed_count = subject.allowed_count,
                used = ?used,
                unauthorized = ?unauthorized,
                outcome = ?verdict.outcome,
                reason = ?verdict.reason,
                "policy violation"
            ),
            Outcome::Error => warn!(
                trace_id = subject.trace_id,
                role = subject.role,
                "engine call failed"
            ),
        }

        let entry = AuditEntry {
            timestamp: Utc::now().to_rfc3339(),
            trace_id: subject.trace_id,
            event_type: AuditEventType::GatewayDecision,
            details: DecisionDetails {
                role: subject.role,
                effective_role: subject.effective_role,
                allowed_count: subject.allowed_count,
                used,
                unauthorized,
                outcome: verdict.outcome,
                reason: verdict.reason,
            },
        };

        if let Err(e) = self.write_entry(&entry) {
            warn!(trace_id = subject.trace_id, error = %e, "failed to write audit entry");
        }
    }

    /// Write a single JSON line to the audit log.
    fn write_entry(&self, entry: &AuditEntry<'_>) -> anyhow::Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

fn names(views: &[ResourceView]) -> Vec<&str> {
    views.iter().map(ResourceView::name).collect()
}
