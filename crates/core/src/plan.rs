//! Intervention plan types: the draft a reasoning step proposes and the
//! validated plan handed back to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::SessionId;

/// Urgency of a recommendation. Orders `High < Medium < Low` so an
/// ascending sort puts the most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "High", alias = "high", alias = "HIGH")]
    High,
    #[serde(rename = "Medium", alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(rename = "Low", alias = "low", alias = "LOW")]
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        })
    }
}

/// Coarse readmission-risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    /// Band for a probability: `< 0.2` low, `< 0.5` medium, otherwise high.
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::Low
        } else if score < 0.5 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

/// A feature and its signed contribution to the predicted risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub feature: String,
    pub contribution: f64,
}

// ── Draft (reasoning output) ─────────────────────────────────────────────

/// One proposed recommendation. `evidence` lists the 1-based scratchpad
/// steps it relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRecommendation {
    pub action: String,
    #[serde(default)]
    pub rationale: String,
    pub priority: Priority,
    #[serde(default)]
    pub evidence: Vec<u32>,
}

/// The terminal output of a reasoning step, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub recommendations: Vec<DraftRecommendation>,
}

// ── Validated plan ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub risk_score: f64,
    pub risk_band: RiskBand,
    #[serde(default)]
    pub top_factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// 1-based position after priority ordering.
    pub rank: u32,
    pub action: String,
    pub priority: Priority,
    pub rationale: String,
    pub evidence: Vec<u32>,
}

/// A grounded, ranked plan for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionPlan {
    pub session_id: SessionId,
    pub patient_id: String,
    pub summary: String,
    /// Present only when a tool reported a risk score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub recommendations: Vec<Recommendation>,
    pub steps_taken: u32,
    pub generated_at: DateTime<Utc>,
}
