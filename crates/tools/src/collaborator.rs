//! Collaborator traits: the external services behind each tool.
//!
//! The risk model, the explanation generator and the notes store are black
//! boxes. Each backend (fixtures, remote HTTP) implements these traits and
//! the tool adapters in this crate turn them into [`Tool`]s.
//!
//! [`Tool`]: vertexcare_core::Tool

use async_trait::async_trait;
use thiserror::Error;
use vertexcare_core::{RiskFactor, ToolError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("patient {0} not found")]
    NotFound(String),

    /// Temporary condition; the same call may succeed later.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator failed: {0}")]
    Failed(String),
}

impl CollaboratorError {
    /// Map to the tool-level error for `tool`.
    pub fn into_tool_error(self, tool: &str) -> ToolError {
        match self {
            Self::NotFound(patient) => ToolError::NotFound(patient),
            Self::Unavailable(reason) => ToolError::Transient {
                tool_name: tool.to_string(),
                reason,
            },
            Self::Failed(reason) => ToolError::ExecutionFailed {
                tool_name: tool.to_string(),
                reason,
            },
        }
    }
}

/// Readmission-risk model.
#[async_trait]
pub trait RiskModel: Send + Sync {
    /// Probability of readmission in `[0, 1]`.
    async fn predict(&self, patient_id: &str) -> Result<f64, CollaboratorError>;
}

/// Feature-attribution generator.
#[async_trait]
pub trait Explainer: Send + Sync {
    /// Per-feature contributions to `risk_score`, in any order.
    async fn attributions(
        &self,
        patient_id: &str,
        risk_score: f64,
    ) -> Result<Vec<RiskFactor>, CollaboratorError>;
}

/// Clinical and community-health-worker notes.
#[async_trait]
pub trait NotesStore: Send + Sync {
    async fn notes(&self, patient_id: &str) -> Result<Vec<String>, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_maps_to_transient() {
        let err = CollaboratorError::Unavailable("HTTP 503".into()).into_tool_error("explain");
        assert!(err.is_transient());
        assert!(err.to_string().contains("explain"));

        let err = CollaboratorError::NotFound("P-9".into()).into_tool_error("explain");
        assert_eq!(err, ToolError::NotFound("P-9".into()));
        assert!(!err.is_transient());
    }
}
