//! Error types for the VertexCare domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Tool-level errors become scratchpad observations; only the
//! session-level [`AgentErrorKind`] variants end a planning run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scratchpad::ScratchpadEntry;
use crate::session::{SessionId, SessionStatus};

// --- Tool errors ---

/// An error raised by a tool adapter or its external collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Patient not found: {0}")]
    NotFound(String),

    #[error("Transient failure in {tool_name}: {reason}")]
    Transient { tool_name: String, reason: String },

    #[error("Tool execution failed in {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },
}

impl ToolError {
    /// Whether the retry policy may re-attempt the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool registered twice: {0}")]
    Duplicate(String),
}

// --- Reasoning errors ---

/// Failure of the reasoning engine to produce the next step.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReasoningError {
    #[error("Reasoning engine unavailable: {message}")]
    Unavailable { message: String },

    #[error("Reasoning engine returned an unparsable instruction: {message}")]
    Unparsable { message: String },

    #[error("Reasoning engine timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

// --- Session errors ---

/// Why a session ended without a plan.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentErrorKind {
    #[error("reasoning step failed: {message}")]
    Reasoning { message: String },

    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u32 },

    #[error("no successful tool observation grounds the plan")]
    InsufficientEvidence,

    #[error("terminal output rejected: {reason}")]
    InvalidPlan { reason: String },

    #[error("session cancelled")]
    Cancelled,

    #[error("run deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("session is {status} and cannot be run")]
    NotRunnable { status: SessionStatus },

    #[error("invalid patient id: {reason}")]
    InvalidPatientId { reason: String },
}

impl From<ReasoningError> for AgentErrorKind {
    fn from(err: ReasoningError) -> Self {
        Self::Reasoning {
            message: err.to_string(),
        }
    }
}

/// The typed failure handed back to the caller of a planning run.
///
/// Carries the last scratchpad so the caller can inspect what the agent
/// saw before deciding whether to start a fresh session.
#[derive(Debug, Clone, Error, Serialize)]
#[error("session {session_id} failed: {kind}")]
pub struct AgentError {
    pub session_id: SessionId,
    pub kind: AgentErrorKind,
    pub scratchpad: Vec<ScratchpadEntry>,
}

impl AgentError {
    pub fn new(session_id: SessionId, kind: AgentErrorKind, scratchpad: Vec<ScratchpadEntry>) -> Self {
        Self {
            session_id,
            kind,
            scratchpad,
        }
    }

    /// Error without scratchpad context (e.g. the session never existed).
    pub fn bare(session_id: SessionId, kind: AgentErrorKind) -> Self {
        Self::new(session_id, kind, Vec::new())
    }

    /// Whether a fresh session for the same patient might succeed.
    pub fn retry_advised(&self) -> bool {
        matches!(
            self.kind,
            AgentErrorKind::Reasoning { .. }
                | AgentErrorKind::DeadlineExceeded { .. }
                | AgentErrorKind::InsufficientEvidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_displays_correctly() {
        let err = ToolError::Transient {
            tool_name: "predict_risk".into(),
            reason: "HTTP 503".into(),
        };
        assert!(err.to_string().contains("predict_risk"));
        assert!(err.to_string().contains("503"));
        assert!(err.is_transient());
        assert!(!ToolError::NotFound("P-1".into()).is_transient());
    }

    #[test]
    fn agent_error_kind_serializes_with_tag() {
        let json = serde_json::to_value(AgentErrorKind::StepLimitExceeded { limit: 5 }).unwrap();
        assert_eq!(json["kind"], "step_limit_exceeded");
        assert_eq!(json["limit"], 5);

        let json = serde_json::to_value(AgentErrorKind::InsufficientEvidence).unwrap();
        assert_eq!(json["kind"], "insufficient_evidence");
    }

    #[test]
    fn reasoning_error_converts_to_session_failure() {
        let kind: AgentErrorKind = ReasoningError::Timeout { timeout_ms: 250 }.into();
        match kind {
            AgentErrorKind::Reasoning { message } => assert!(message.contains("250ms")),
            other => panic!("Expected Reasoning, got {other:?}"),
        }
    }

    #[test]
    fn retry_advice_follows_failure_kind() {
        let id = SessionId::new();
        assert!(AgentError::bare(id, AgentErrorKind::InsufficientEvidence).retry_advised());
        assert!(!AgentError::bare(id, AgentErrorKind::Cancelled).retry_advised());
        assert!(
            !AgentError::bare(id, AgentErrorKind::StepLimitExceeded { limit: 3 }).retry_advised()
        );
    }
}
