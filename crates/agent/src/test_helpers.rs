//! Shared test doubles for controller, manager and dispatch tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vertexcare_core::tool::{Arguments, ParamType, Tool, ToolSpec};
use vertexcare_core::{
    CaseContext, DraftRecommendation, PlanDraft, Priority, Proposal, ReasoningEngine,
    ReasoningError, Scratchpad, ToolError, ToolInvocation, ToolRegistry,
};

enum Behavior {
    Ok(Value),
    /// Transient failure for the first `n` calls, then `Ok`.
    Flaky(u32, Value),
    Hang,
    Fail,
}

/// A tool with scripted behavior that counts its calls.
pub struct StubTool {
    spec: ToolSpec,
    behavior: Behavior,
    calls: Arc<AtomicU32>,
}

impl StubTool {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            spec: ToolSpec::new(name, format!("stub {name}"))
                .required("patientId", ParamType::String, "Patient identifier")
                .optional("riskScore", ParamType::Number, "Risk score"),
            behavior,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn ok(name: &str, payload: Value) -> Self {
        Self::new(name, Behavior::Ok(payload))
    }

    pub fn flaky(name: &str, failures: u32, payload: Value) -> Self {
        Self::new(name, Behavior::Flaky(failures, payload))
    }

    /// Never returns.
    pub fn hanging(name: &str) -> Self {
        Self::new(name, Behavior::Hang)
    }

    /// Permanent execution failure.
    pub fn failing(name: &str) -> Self {
        Self::new(name, Behavior::Fail)
    }

    pub fn calls(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, _arguments: &Arguments) -> Result<Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::Ok(payload) => Ok(payload.clone()),
            Behavior::Flaky(failures, payload) => {
                if call <= *failures {
                    Err(ToolError::Transient {
                        tool_name: self.spec.name.clone(),
                        reason: "HTTP 503".into(),
                    })
                } else {
                    Ok(payload.clone())
                }
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
            Behavior::Fail => Err(ToolError::ExecutionFailed {
                tool_name: self.spec.name.clone(),
                reason: "bad payload".into(),
            }),
        }
    }
}

pub fn registry_with(tools: Vec<StubTool>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(Arc::new(tool)).unwrap();
    }
    registry
}

/// Registry for the P-100 scenario: a 0.82 HIGH prediction and its factors.
pub fn p100_registry() -> ToolRegistry {
    registry_with(vec![
        StubTool::ok(
            "predict_risk",
            serde_json::json!({"patientId": "P-100", "riskScore": 0.82, "riskBand": "HIGH"}),
        ),
        StubTool::ok(
            "explain",
            serde_json::json!({"patientId": "P-100", "topFactors": [
                {"feature": "missed_appointments", "contribution": 0.4},
                {"feature": "transport_access", "contribution": 0.3}
            ]}),
        ),
    ])
}

/// Replays a fixed list of proposals, then reports itself unavailable.
pub struct ScriptedReasoner {
    script: Mutex<Vec<Proposal>>,
    calls: AtomicU32,
}

impl ScriptedReasoner {
    pub fn new(mut script: Vec<Proposal>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
        }
    }

    /// predict → explain → finish citing both, for patient P-100.
    pub fn p100() -> Self {
        Self::new(vec![
            Proposal::invoke(
                "Need the baseline risk",
                ToolInvocation::new("predict_risk").arg("patientId", "P-100"),
            ),
            Proposal::invoke(
                "Risk is high, need the drivers",
                ToolInvocation::new("explain")
                    .arg("patientId", "P-100")
                    .arg("riskScore", 0.82),
            ),
            Proposal::finish("Enough evidence", p100_draft()),
        ])
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose(
        &self,
        _scratchpad: &Scratchpad,
        _case: &CaseContext,
        _tools: &[vertexcare_core::ToolSpec],
    ) -> Result<Proposal, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ReasoningError::Unavailable {
                message: "script exhausted".into(),
            })
    }
}

/// Always asks for a tool nobody registered.
pub struct UnknownToolReasoner;

#[async_trait]
impl ReasoningEngine for UnknownToolReasoner {
    fn name(&self) -> &str {
        "unknown-tool"
    }

    async fn propose(
        &self,
        _scratchpad: &Scratchpad,
        case: &CaseContext,
        _tools: &[vertexcare_core::ToolSpec],
    ) -> Result<Proposal, ReasoningError> {
        Ok(Proposal::invoke(
            "Try the oracle",
            ToolInvocation::new("oracle").arg("patientId", case.patient_id.clone()),
        ))
    }
}

/// Never answers.
pub struct StalledReasoner;

#[async_trait]
impl ReasoningEngine for StalledReasoner {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn propose(
        &self,
        _scratchpad: &Scratchpad,
        _case: &CaseContext,
        _tools: &[vertexcare_core::ToolSpec],
    ) -> Result<Proposal, ReasoningError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ReasoningError::Unavailable {
            message: "unreachable".into(),
        })
    }
}

pub fn p100_draft() -> PlanDraft {
    PlanDraft {
        summary: "High readmission risk driven by missed appointments and transport".into(),
        risk_score: Some(0.82),
        confidence: Some(0.8),
        recommendations: vec![
            DraftRecommendation {
                action: "Schedule a home visit to review medication adherence.".into(),
                rationale: "Risk score 0.82 is HIGH".into(),
                priority: Priority::Medium,
                evidence: vec![1],
            },
            DraftRecommendation {
                action: "Arrange medical transport immediately.".into(),
                rationale: "transport_access contributes 0.3".into(),
                priority: Priority::High,
                evidence: vec![1, 2],
            },
        ],
    }
}
