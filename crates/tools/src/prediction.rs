//! `predict_risk`: readmission-risk score for one patient.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use vertexcare_core::tool::{Arguments, ParamType, Tool, ToolSpec};
use vertexcare_core::{RiskBand, ToolError};

use crate::collaborator::RiskModel;
use crate::patient_id_arg;

pub const NAME: &str = "predict_risk";

pub struct PredictRiskTool {
    spec: ToolSpec,
    model: Arc<dyn RiskModel>,
}

impl PredictRiskTool {
    pub fn new(model: Arc<dyn RiskModel>) -> Self {
        let spec = ToolSpec::new(
            NAME,
            "Predict the patient's 30-day readmission risk. Returns riskScore (0-1) and riskBand (LOW/MEDIUM/HIGH).",
        )
        .required("patientId", ParamType::String, "Patient identifier");
        Self { spec, model }
    }
}

#[async_trait]
impl Tool for PredictRiskTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<Value, ToolError> {
        let patient_id = patient_id_arg(arguments)?;
        let score = self
            .model
            .predict(patient_id)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        if !(0.0..=1.0).contains(&score) {
            return Err(ToolError::ExecutionFailed {
                tool_name: NAME.into(),
                reason: format!("model returned out-of-range score {score}"),
            });
        }

        let band = RiskBand::from_score(score);
        debug!(patient_id, score, %band, "Risk predicted");

        Ok(serde_json::json!({
            "patientId": patient_id,
            "riskScore": score,
            "riskBand": band,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::CollaboratorError;

    struct FixedModel(Result<f64, CollaboratorError>);

    #[async_trait]
    impl RiskModel for FixedModel {
        async fn predict(&self, _patient_id: &str) -> Result<f64, CollaboratorError> {
            self.0.clone()
        }
    }

    fn args(patient: &str) -> Arguments {
        let mut a = Arguments::new();
        a.insert("patientId".into(), patient.into());
        a
    }

    #[tokio::test]
    async fn returns_score_and_band() {
        let tool = PredictRiskTool::new(Arc::new(FixedModel(Ok(0.82))));
        let payload = tool.invoke(&args("P-100")).await.unwrap();
        assert_eq!(payload["patientId"], "P-100");
        assert_eq!(payload["riskScore"], 0.82);
        assert_eq!(payload["riskBand"], "HIGH");
    }

    #[tokio::test]
    async fn out_of_range_score_is_rejected() {
        let tool = PredictRiskTool::new(Arc::new(FixedModel(Ok(1.7))));
        let err = tool.invoke(&args("P-100")).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn unavailable_model_is_transient() {
        let tool = PredictRiskTool::new(Arc::new(FixedModel(Err(
            CollaboratorError::Unavailable("503".into()),
        ))));
        let err = tool.invoke(&args("P-100")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn spec_requires_patient_id() {
        let tool = PredictRiskTool::new(Arc::new(FixedModel(Ok(0.1))));
        assert_eq!(tool.name(), "predict_risk");
        assert!(tool.spec().validate(&Arguments::new()).is_err());
        assert!(tool.spec().validate(&args("P-1")).is_ok());
    }
}
