//! `explain`: top contributing features behind a risk score.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use vertexcare_core::tool::{Arguments, ParamType, Tool, ToolSpec};
use vertexcare_core::ToolError;

use crate::collaborator::Explainer;
use crate::patient_id_arg;

pub const NAME: &str = "explain";

/// Factors returned when the caller gives no `topK`.
pub const DEFAULT_TOP_K: usize = 3;

pub struct ExplainTool {
    spec: ToolSpec,
    explainer: Arc<dyn Explainer>,
}

impl ExplainTool {
    pub fn new(explainer: Arc<dyn Explainer>) -> Self {
        let spec = ToolSpec::new(
            NAME,
            "Explain a risk score: the features contributing most to it, ordered by contribution.",
        )
        .required("patientId", ParamType::String, "Patient identifier")
        .required(
            "riskScore",
            ParamType::Number,
            "Score returned by predict_risk",
        )
        .optional(
            "topK",
            ParamType::Integer,
            "How many factors to return (default 3)",
        );
        Self { spec, explainer }
    }
}

#[async_trait]
impl Tool for ExplainTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<Value, ToolError> {
        let patient_id = patient_id_arg(arguments)?;
        let risk_score = arguments
            .get("riskScore")
            .and_then(Value::as_f64)
            .filter(|s| (0.0..=1.0).contains(s))
            .ok_or_else(|| ToolError::InvalidArguments("'riskScore' must be in [0, 1]".into()))?;
        let top_k = match arguments.get("topK").and_then(Value::as_i64) {
            None => DEFAULT_TOP_K,
            Some(k) if k >= 1 => k as usize,
            Some(k) => {
                return Err(ToolError::InvalidArguments(format!(
                    "'topK' must be at least 1, got {k}"
                )));
            }
        };

        let mut factors = self
            .explainer
            .attributions(patient_id, risk_score)
            .await
            .map_err(|e| e.into_tool_error(NAME))?;

        factors.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
        factors.truncate(top_k);

        Ok(serde_json::json!({
            "patientId": patient_id,
            "topFactors": factors,
        }))
    }
}
