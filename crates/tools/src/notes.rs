//! `fetch_notes`: free-text notes recorded for a patient.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use vertexcare_core::tool::{Arguments, ParamType, Tool, ToolSpec};
use vertexcare_core::ToolError;

use crate::collaborator::NotesStore;
use crate::patient_id_arg;

pub const NAME: &str = "fetch_notes";

pub struct FetchNotesTool {
    spec: ToolSpec,
    store: Arc<dyn NotesStore>,
}

impl FetchNotesTool {
    pub fn new(store: Arc<dyn NotesStore>) -> Self {
        let spec = ToolSpec::new(
            NAME,
            "Fetch the latest clinical and community-health-worker notes for a patient. Useful for social or logistical barriers.",
        )
        .required("patientId", ParamType::String, "Patient identifier");
        Self { spec, store }
    }
}

#[async_trait]
impl Tool for FetchNotesTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<Value, ToolError> {
        let patient_id = patient_id_arg(arguments)?;
        let notes = self
            .store
            .notes(patient_id)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        Ok(serde_json::json!({
            "patientId": patient_id,
            "notes": notes,
        }))
    }
}
