//! Collaborator tools for VertexCare.
//!
//! Three tools give the agent its evidence: `predict_risk`, `explain` and
//! `fetch_notes`. Each wraps a collaborator trait, and each collaborator has
//! a fixture backend (demo data or a JSON file) and a remote HTTP backend.

pub mod collaborator;
pub mod explanation;
pub mod fixture;
pub mod notes;
pub mod prediction;
pub mod remote;

use std::sync::Arc;
use vertexcare_core::tool::{Arguments, ToolRegistry};
use vertexcare_core::{RegistryError, ToolError};

pub use collaborator::{CollaboratorError, Explainer, NotesStore, RiskModel};
pub use explanation::ExplainTool;
pub use fixture::{FixtureError, FixtureStore, PatientRecord, Service};
pub use notes::FetchNotesTool;
pub use prediction::PredictRiskTool;
pub use remote::RemoteCollaborators;

/// Build a registry with the three collaborator tools.
pub fn default_registry(
    model: Arc<dyn RiskModel>,
    explainer: Arc<dyn Explainer>,
    notes: Arc<dyn NotesStore>,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(PredictRiskTool::new(model)))?;
    registry.register(Arc::new(ExplainTool::new(explainer)))?;
    registry.register(Arc::new(FetchNotesTool::new(notes)))?;
    Ok(registry)
}

/// Registry whose tools all read from one fixture store.
pub fn fixture_registry(store: Arc<FixtureStore>) -> Result<ToolRegistry, RegistryError> {
    default_registry(store.clone(), store.clone(), store)
}

/// Registry whose tools all call one remote backend.
pub fn remote_registry(remote: Arc<RemoteCollaborators>) -> Result<ToolRegistry, RegistryError> {
    default_registry(remote.clone(), remote.clone(), remote)
}

/// Non-empty `patientId` argument.
pub(crate) fn patient_id_arg(arguments: &Arguments) -> Result<&str, ToolError> {
    arguments
        .get("patientId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments("'patientId' must be a non-empty string".into()))
}
