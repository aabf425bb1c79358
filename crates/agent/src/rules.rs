//! Rule-based reasoning engine.
//!
//! Deterministic strategy: predict the risk, explain it, read the notes,
//! then finish with a plan built from what was observed. A tool that is not
//! registered or has already been attempted is skipped. Without a risk score
//! there is nothing to plan from, so the engine finishes early and lets the
//! synthesizer reject the draft.

use async_trait::async_trait;
use serde_json::Value;
use vertexcare_core::{
    CaseContext, DraftRecommendation, PlanDraft, Priority, Proposal, ReasoningEngine,
    ReasoningError, RiskBand, RiskFactor, Scratchpad, ScratchpadEntry, ToolInvocation, ToolSpec,
};

const PREDICT: &str = "predict_risk";
const EXPLAIN: &str = "explain";
const NOTES: &str = "fetch_notes";

/// Scores below this get a routine follow-up.
const LOW_RISK_THRESHOLD: f64 = 0.2;
/// Scores at or above this get a home visit even when a social barrier is found.
const HOME_VISIT_THRESHOLD: f64 = 0.5;

const TRANSPORT_FEATURE: &str = "transport";
const FINANCIAL_FEATURE: &str = "financial";
const TRANSPORT_KEYWORDS: &[&str] = &["ride", "transport", "no car"];
const FINANCIAL_KEYWORDS: &[&str] = &["afford", "co-pay", "copay", "financial"];

const TRANSPORT_ACTION: &str = "Arrange medical transport immediately.";
const FINANCIAL_ACTION: &str = "Refer patient to social work for financial assistance programs.";
const FOLLOW_UP_ACTION: &str = "Schedule a standard 30-day follow-up call.";
const HOME_VISIT_ACTION: &str = "Schedule a home visit to review medication adherence.";

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedReasoner;

impl RuleBasedReasoner {
    pub const NAME: &'static str = "rules";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReasoningEngine for RuleBasedReasoner {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn propose(
        &self,
        scratchpad: &Scratchpad,
        case: &CaseContext,
        tools: &[ToolSpec],
    ) -> Result<Proposal, ReasoningError> {
        let offered = |name: &str| tools.iter().any(|t| t.name == name);
        let pending = |name: &str| offered(name) && !scratchpad.attempted(name);
        let last_step = case.remaining_steps() == 0;
        let patient = case.patient_id.as_str();

        if !last_step && pending(PREDICT) {
            return Ok(Proposal::invoke(
                "I need the baseline readmission risk first.",
                ToolInvocation::new(PREDICT).arg("patientId", patient),
            ));
        }

        let Some((predict_step, score)) = prediction(scratchpad) else {
            return Ok(Proposal::finish(
                "No risk prediction is available, so there is nothing to ground a plan on.",
                PlanDraft {
                    summary: "Risk could not be determined.".into(),
                    risk_score: None,
                    confidence: None,
                    recommendations: Vec::new(),
                },
            ));
        };

        if !last_step && pending(EXPLAIN) {
            return Ok(Proposal::invoke(
                format!("The risk score is {score:.2}. I need the factors driving it."),
                ToolInvocation::new(EXPLAIN)
                    .arg("patientId", patient)
                    .arg("riskScore", score),
            ));
        }

        if !last_step && pending(NOTES) {
            return Ok(Proposal::invoke(
                "I have the clinical picture. The notes may show social or logistical barriers.",
                ToolInvocation::new(NOTES).arg("patientId", patient),
            ));
        }

        let evidence = Evidence::gather(scratchpad, predict_step, score);
        Ok(Proposal::finish(
            "I have enough evidence to write the plan.",
            evidence.draft(scratchpad),
        ))
    }
}

/// Step and score of the latest successful prediction.
fn prediction(scratchpad: &Scratchpad) -> Option<(u32, f64)> {
    let entry = scratchpad.latest_success(PREDICT)?;
    let score = entry.observation.payload()?.get("riskScore")?.as_f64()?;
    Some((entry.step, score))
}

fn payload_field<'a>(entry: &'a ScratchpadEntry, field: &str) -> Option<&'a Value> {
    entry.observation.payload()?.get(field)
}

/// A barrier and the step that revealed it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Barrier {
    step: u32,
}

struct Evidence {
    predict_step: u32,
    score: f64,
    explain_step: Option<u32>,
    factors: Vec<RiskFactor>,
    transport: Option<Barrier>,
    financial: Option<Barrier>,
}

impl Evidence {
    fn gather(scratchpad: &Scratchpad, predict_step: u32, score: f64) -> Self {
        let explained = scratchpad.latest_success(EXPLAIN);
        let factors: Vec<RiskFactor> = explained
            .and_then(|e| payload_field(e, "topFactors"))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let explain_step = explained.map(|e| e.step);

        let notes = scratchpad.latest_success(NOTES);
        let note_text = notes
            .and_then(|e| payload_field(e, "notes"))
            .and_then(Value::as_array)
            .map(|notes| {
                notes
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
                    .to_lowercase()
            })
            .unwrap_or_default();
        let notes_step = notes.map(|e| e.step);

        let find = |feature: &str, keywords: &[&str]| {
            let from_factors = explain_step
                .filter(|_| factors.iter().any(|f| f.feature.contains(feature)))
                .map(|step| Barrier { step });
            from_factors.or_else(|| {
                notes_step
                    .filter(|_| keywords.iter().any(|k| note_text.contains(k)))
                    .map(|step| Barrier { step })
            })
        };

        Self {
            predict_step,
            score,
            transport: find(TRANSPORT_FEATURE, TRANSPORT_KEYWORDS),
            financial: find(FINANCIAL_FEATURE, FINANCIAL_KEYWORDS),
            explain_step,
            factors,
        }
    }

    fn clinical_evidence(&self) -> Vec<u32> {
        let mut steps = vec![self.predict_step];
        steps.extend(self.explain_step);
        steps
    }

    fn draft(&self, scratchpad: &Scratchpad) -> PlanDraft {
        let band = RiskBand::from_score(self.score);
        let mut recommendations = Vec::new();

        if let Some(barrier) = self.transport {
            recommendations.push(DraftRecommendation {
                action: TRANSPORT_ACTION.into(),
                rationale: "A transportation barrier threatens upcoming appointments.".into(),
                priority: Priority::High,
                evidence: vec![barrier.step],
            });
        }
        if let Some(barrier) = self.financial {
            recommendations.push(DraftRecommendation {
                action: FINANCIAL_ACTION.into(),
                rationale: "The patient reports difficulty paying for care or medication.".into(),
                priority: Priority::High,
                evidence: vec![barrier.step],
            });
        }

        let has_barrier = !recommendations.is_empty();
        if !has_barrier && self.score < LOW_RISK_THRESHOLD {
            recommendations.push(DraftRecommendation {
                action: FOLLOW_UP_ACTION.into(),
                rationale: format!("Risk score {:.2} is {band}.", self.score),
                priority: Priority::Low,
                evidence: vec![self.predict_step],
            });
        } else if !has_barrier || self.score >= HOME_VISIT_THRESHOLD {
            recommendations.push(DraftRecommendation {
                action: HOME_VISIT_ACTION.into(),
                rationale: format!("Risk score {:.2} is {band}; {}.", self.score, self.drivers()),
                priority: if has_barrier {
                    Priority::Medium
                } else {
                    Priority::High
                },
                evidence: self.clinical_evidence(),
            });
        }

        // One point per collaborator that answered.
        let answered = [PREDICT, EXPLAIN, NOTES]
            .iter()
            .filter(|tool| scratchpad.latest_success(tool).is_some())
            .count();

        PlanDraft {
            summary: self.summary(band),
            risk_score: Some(self.score),
            confidence: Some((answered as f64 / 3.0).min(1.0)),
            recommendations,
        }
    }

    fn drivers(&self) -> String {
        match self.factors.as_slice() {
            [] => "no explanation was available".into(),
            [only] => format!("driven by {}", only.feature),
            [first, second, ..] => format!("driven by {} and {}", first.feature, second.feature),
        }
    }

    fn summary(&self, band: RiskBand) -> String {
        match (self.transport.is_some(), self.financial.is_some()) {
            (true, true) => "Patient is at risk due to transportation and financial barriers.".into(),
            (true, false) => "Patient is at risk due to a critical transportation barrier for an upcoming appointment.".into(),
            (false, true) => "Patient is at risk due to a financial concern regarding medication co-pays.".into(),
            (false, false) if self.score < LOW_RISK_THRESHOLD => {
                "Patient is at low risk and appears to be managing well.".into()
            }
            (false, false) => format!(
                "Patient is at {} risk, {}.",
                band.to_string().to_lowercase(),
                self.drivers()
            ),
        }
    }
}
