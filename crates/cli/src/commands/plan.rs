//! `vertexcare plan`: Generate an intervention plan for one patient.

use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;
use vertexcare_config::{AppConfig, CollaboratorBackend};
use vertexcare_core::{AgentError, InterventionPlan, ScratchpadEntry};
use vertexcare_gateway::runtime::{build_manager, spawn_event_logger};

pub async fn run(
    patient: String,
    fixtures: Option<PathBuf>,
    deadline_ms: Option<u64>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(path) = fixtures {
        config.collaborators.backend = CollaboratorBackend::Fixture;
        config.collaborators.fixtures_path = Some(path);
    }

    let manager = build_manager(&config)?;
    let _event_logger = spawn_event_logger(manager.events());
    let deadline = Duration::from_millis(deadline_ms.unwrap_or(config.gateway.run_deadline_ms));

    match manager.plan_for(&patient, deadline).await {
        Ok(plan) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print!("{}", render_plan(&plan));
            }
            Ok(())
        }
        Err(err) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&err)?);
            } else {
                eprint!("{}", render_failure(&err));
            }
            Err(failure_message(&err).into())
        }
    }
}

pub fn render_plan(plan: &InterventionPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "🩺 Intervention plan for patient {}", plan.patient_id);
    let _ = writeln!(out, "==================");
    let _ = writeln!(out, "  {}", plan.summary);
    let confidence = plan
        .confidence
        .map(|c| format!(", confidence {c:.2}"))
        .unwrap_or_default();
    match &plan.risk {
        Some(risk) => {
            let _ = writeln!(
                out,
                "  Risk: {:.2} ({}){confidence}",
                risk.risk_score, risk.risk_band
            );
            if !risk.top_factors.is_empty() {
                let factors: Vec<String> = risk
                    .top_factors
                    .iter()
                    .map(|f| format!("{} ({:+.2})", f.feature, f.contribution))
                    .collect();
                let _ = writeln!(out, "  Drivers: {}", factors.join(", "));
            }
        }
        None => {
            let _ = writeln!(out, "  Risk: not determined{confidence}");
        }
    }
    let _ = writeln!(out);
    for rec in &plan.recommendations {
        let _ = writeln!(out, "  {}. [{}] {}", rec.rank, rec.priority, rec.action);
        let evidence: Vec<String> = rec.evidence.iter().map(u32::to_string).collect();
        let _ = writeln!(
            out,
            "     {} (steps {})",
            rec.rationale,
            evidence.join(", ")
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Session {} · {} steps",
        plan.session_id, plan.steps_taken
    );
    out
}

pub fn render_failure(err: &AgentError) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "❌ No plan: {}", err.kind);
    if err.retry_advised() {
        let _ = writeln!(out, "   A new session may succeed.");
    }
    if !err.scratchpad.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "   Scratchpad:");
        for entry in &err.scratchpad {
            let _ = writeln!(out, "   {}", render_entry(entry));
        }
    }
    out
}

/// One-line error for the process exit; the details were printed above.
pub fn failure_message(err: &AgentError) -> String {
    format!("session {} produced no plan: {}", err.session_id, err.kind)
}

fn render_entry(entry: &ScratchpadEntry) -> String {
    let outcome = match entry.observation.failure_info() {
        None => "ok".to_string(),
        Some(f) => format!("{} ({})", f.kind, f.message),
    };
    format!(
        "{}. {} × {} → {}",
        entry.step, entry.action.tool, entry.attempts, outcome
    )
}
