//! Plan synthesis: turns a terminal draft into a grounded plan.
//!
//! A pure function of the draft and the scratchpad. Every number in the
//! resulting risk summary comes from a successful tool observation, and
//! every recommendation must cite at least one successful step. A plan
//! grounded only in notes carries no risk summary.

use chrono::Utc;
use serde_json::Value;
use vertexcare_core::{
    AgentErrorKind, AgentSession, InterventionPlan, PlanDraft, Recommendation, RiskBand,
    RiskFactor, RiskSummary, ScratchpadEntry,
};

const SCORE_EPSILON: f64 = 1e-9;

/// Validate `draft` against the session's scratchpad and build the plan.
pub fn synthesize(
    session: &AgentSession,
    draft: PlanDraft,
) -> Result<InterventionPlan, AgentErrorKind> {
    let scratchpad = session.scratchpad();
    if scratchpad.successful_count() == 0 {
        return Err(AgentErrorKind::InsufficientEvidence);
    }

    if draft.recommendations.is_empty() {
        return Err(invalid("plan has no recommendations"));
    }

    let mut recommendations = Vec::with_capacity(draft.recommendations.len());
    for (i, rec) in draft.recommendations.into_iter().enumerate() {
        let n = i + 1;
        if rec.action.trim().is_empty() {
            return Err(invalid(format!("recommendation {n} has an empty action")));
        }
        if rec.rationale.trim().is_empty() {
            return Err(invalid(format!("recommendation {n} has an empty rationale")));
        }
        if rec.evidence.is_empty() {
            return Err(invalid(format!("recommendation {n} cites no evidence")));
        }

        let mut evidence = rec.evidence;
        evidence.sort_unstable();
        evidence.dedup();
        for &step in &evidence {
            match scratchpad.entry(step) {
                None => {
                    return Err(invalid(format!(
                        "recommendation {n} cites step {step}, which does not exist"
                    )));
                }
                Some(entry) if !entry.succeeded() => {
                    return Err(invalid(format!(
                        "recommendation {n} cites step {step}, which failed"
                    )));
                }
                Some(_) => {}
            }
        }

        recommendations.push(Recommendation {
            rank: 0,
            action: rec.action.trim().to_string(),
            priority: rec.priority,
            rationale: rec.rationale.trim().to_string(),
            evidence,
        });
    }

    if let Some(score) = draft.risk_score {
        if !(0.0..=1.0).contains(&score) {
            return Err(invalid(format!("risk score {score} is outside [0, 1]")));
        }
        let reported = scratchpad
            .successful()
            .filter_map(observed_risk)
            .any(|(s, _)| (s - score).abs() < SCORE_EPSILON);
        if !reported {
            return Err(invalid(format!(
                "risk score {score} was not reported by any tool"
            )));
        }
    }

    if let Some(confidence) = draft.confidence
        && !(0.0..=1.0).contains(&confidence)
    {
        return Err(invalid(format!("confidence {confidence} is outside [0, 1]")));
    }

    // Stable: equal priorities keep the draft's order.
    recommendations.sort_by_key(|r| r.priority);
    for (i, rec) in recommendations.iter_mut().enumerate() {
        rec.rank = i as u32 + 1;
    }

    // Latest successful observation wins.
    let risk = scratchpad
        .successful()
        .filter_map(observed_risk)
        .last()
        .map(|(risk_score, risk_band)| RiskSummary {
            risk_score,
            risk_band,
            top_factors: scratchpad
                .successful()
                .filter_map(observed_factors)
                .last()
                .unwrap_or_default(),
        });

    let summary = match (draft.summary.trim(), &risk) {
        ("", Some(r)) => format!("{} readmission risk ({:.2})", r.risk_band, r.risk_score),
        ("", None) => "Readmission risk not determined".to_string(),
        (s, _) => s.to_string(),
    };

    Ok(InterventionPlan {
        session_id: session.id,
        patient_id: session.patient_id.clone(),
        summary,
        risk,
        confidence: draft.confidence,
        recommendations,
        steps_taken: session.step_count,
        generated_at: Utc::now(),
    })
}

fn invalid(reason: impl Into<String>) -> AgentErrorKind {
    AgentErrorKind::InvalidPlan {
        reason: reason.into(),
    }
}

/// `riskScore`/`riskBand` of a successful observation.
fn observed_risk(entry: &ScratchpadEntry) -> Option<(f64, RiskBand)> {
    let payload = entry.observation.payload()?;
    let score = payload.get("riskScore").and_then(Value::as_f64)?;
    let band = payload
        .get("riskBand")
        .and_then(|b| serde_json::from_value(b.clone()).ok())
        .unwrap_or_else(|| RiskBand::from_score(score));
    Some((score, band))
}

/// `topFactors` of a successful observation.
fn observed_factors(entry: &ScratchpadEntry) -> Option<Vec<RiskFactor>> {
    let payload = entry.observation.payload()?;
    serde_json::from_value(payload.get("topFactors")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::p100_draft;
    use vertexcare_core::{
        DraftRecommendation, Priority, ToolFailureKind, ToolInvocation, ToolResult,
    };

    fn session_with(observations: Vec<ToolResult>) -> AgentSession {
        let mut session = AgentSession::new("P-100", 5);
        session.start().unwrap();
        for obs in observations {
            session.begin_step();
            session
                .scratchpad_mut()
                .append("t", ToolInvocation::new("x"), obs, 1)
                .unwrap();
        }
        session
    }

    fn prediction() -> ToolResult {
        ToolResult::success(serde_json::json!({"riskScore": 0.82, "riskBand": "HIGH"}))
    }

    fn explanation() -> ToolResult {
        ToolResult::success(serde_json::json!({"topFactors": [
            {"feature": "missed_appointments", "contribution": 0.4},
            {"feature": "transport_access", "contribution": 0.3}
        ]}))
    }

    fn reason(err: AgentErrorKind) -> String {
        match err {
            AgentErrorKind::InvalidPlan { reason } => reason,
            other => panic!("Expected InvalidPlan, got {other:?}"),
        }
    }

    #[test]
    fn grounded_plan_is_ranked_by_priority() {
        let session = session_with(vec![prediction(), explanation()]);
        let plan = synthesize(&session, p100_draft()).unwrap();

        let risk = plan.risk.unwrap();
        assert_eq!(risk.risk_score, 0.82);
        assert_eq!(risk.risk_band, RiskBand::High);
        assert_eq!(risk.top_factors.len(), 2);
        assert_eq!(plan.recommendations.len(), 2);
        assert_eq!(plan.recommendations[0].rank, 1);
        assert_eq!(plan.recommendations[0].priority, Priority::High);
        assert_eq!(plan.recommendations[1].priority, Priority::Medium);
        assert_eq!(plan.steps_taken, 2);
    }

    #[test]
    fn no_successful_observation_is_insufficient_evidence() {
        let session = session_with(vec![ToolResult::failure(ToolFailureKind::Timeout, "slow")]);
        assert_eq!(
            synthesize(&session, p100_draft()).unwrap_err(),
            AgentErrorKind::InsufficientEvidence
        );
    }

    #[test]
    fn notes_alone_ground_a_plan_without_risk() {
        let notes = ToolResult::success(serde_json::json!({
            "patientId": "P-100",
            "notes": ["Needs a ride to cardiology next week."]
        }));
        let session = session_with(vec![notes]);
        let draft = PlanDraft {
            summary: String::new(),
            risk_score: None,
            confidence: None,
            recommendations: vec![DraftRecommendation {
                action: "Arrange medical transport immediately.".into(),
                rationale: "Notes mention a missing ride".into(),
                priority: Priority::High,
                evidence: vec![1],
            }],
        };

        let plan = synthesize(&session, draft).unwrap();
        assert!(plan.risk.is_none());
        assert_eq!(plan.summary, "Readmission risk not determined");
        assert_eq!(plan.recommendations[0].evidence, vec![1]);

        let json = serde_json::to_value(&plan).unwrap();
        assert!(json.get("risk").is_none());
    }

    #[test]
    fn draft_score_without_a_prediction_is_invalid() {
        let session = session_with(vec![explanation()]);
        let mut draft = p100_draft();
        draft.recommendations.truncate(1);
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("not reported"));
    }

    #[test]
    fn citations_must_point_at_successful_steps() {
        let session = session_with(vec![
            prediction(),
            ToolResult::failure(ToolFailureKind::Transient, "503"),
        ]);
        let err = synthesize(&session, p100_draft()).unwrap_err();
        assert!(reason(err).contains("step 2, which failed"));

        let session = session_with(vec![prediction()]);
        let err = synthesize(&session, p100_draft()).unwrap_err();
        assert!(reason(err).contains("does not exist"));
    }

    #[test]
    fn empty_recommendations_or_fields_are_invalid() {
        let session = session_with(vec![prediction(), explanation()]);

        let mut draft = p100_draft();
        draft.recommendations.clear();
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("no recommendations"));

        let mut draft = p100_draft();
        draft.recommendations[0].rationale = "  ".into();
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("empty rationale"));

        let mut draft = p100_draft();
        draft.recommendations[1].evidence.clear();
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("cites no evidence"));
    }

    #[test]
    fn risk_score_must_match_an_observation() {
        let session = session_with(vec![prediction(), explanation()]);

        let mut draft = p100_draft();
        draft.risk_score = Some(0.5);
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("not reported"));

        let mut draft = p100_draft();
        draft.risk_score = Some(1.5);
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("outside"));

        let mut draft = p100_draft();
        draft.confidence = Some(-0.1);
        assert!(reason(synthesize(&session, draft).unwrap_err()).contains("confidence"));
    }

    #[test]
    fn equal_priorities_keep_draft_order() {
        let session = session_with(vec![prediction()]);
        let rec = |action: &str, priority| DraftRecommendation {
            action: action.into(),
            rationale: "r".into(),
            priority,
            evidence: vec![1],
        };
        let draft = PlanDraft {
            summary: String::new(),
            risk_score: None,
            confidence: None,
            recommendations: vec![
                rec("a", Priority::Low),
                rec("b", Priority::High),
                rec("c", Priority::Low),
                rec("d", Priority::High),
            ],
        };
        let plan = synthesize(&session, draft).unwrap();
        let order: Vec<&str> = plan.recommendations.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
        assert_eq!(plan.summary, "HIGH readmission risk (0.82)");
        assert!(plan.risk.unwrap().top_factors.is_empty());
    }

    #[test]
    fn band_is_derived_when_not_reported() {
        let session = session_with(vec![ToolResult::success(serde_json::json!({"riskScore": 0.3}))]);
        let mut draft = p100_draft();
        draft.risk_score = Some(0.3);
        draft.recommendations.truncate(1);
        let plan = synthesize(&session, draft).unwrap();
        assert_eq!(plan.risk.unwrap().risk_band, RiskBand::Medium);
    }
}
