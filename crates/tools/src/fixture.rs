//! In-process collaborator backend backed by patient records.
//!
//! Ships a built-in demo set and can load records from a JSON file:
//!
//! ```json
//! [
//!   {
//!     "patientId": "P-100",
//!     "riskScore": 0.82,
//!     "factors": [{ "feature": "missed_appointments", "contribution": 0.4 }],
//!     "notes": ["Missed last two cardiology follow-ups."]
//!   }
//! ]
//! ```
//!
//! `delayMs` and `unavailable` simulate slow or failing services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use vertexcare_core::RiskFactor;

use crate::collaborator::{CollaboratorError, Explainer, NotesStore, RiskModel};

/// Which collaborator a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    RiskModel,
    Explainer,
    Notes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub patient_id: String,
    pub risk_score: f64,
    #[serde(default)]
    pub factors: Vec<RiskFactor>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Artificial latency per call, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// Services that answer this patient with a transient failure.
    #[serde(default)]
    pub unavailable: Vec<Service>,
}

impl PatientRecord {
    pub fn new(patient_id: &str, risk_score: f64) -> Self {
        Self {
            patient_id: patient_id.into(),
            risk_score,
            factors: Vec::new(),
            notes: Vec::new(),
            delay_ms: 0,
            unavailable: Vec::new(),
        }
    }

    pub fn factor(mut self, feature: &str, contribution: f64) -> Self {
        self.factors.push(RiskFactor {
            feature: feature.into(),
            contribution,
        });
        self
    }

    pub fn note(mut self, text: &str) -> Self {
        self.notes.push(text.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_outage(mut self, service: Service) -> Self {
        self.unavailable.push(service);
        self
    }
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixtures from {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid fixture file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("fixture for {patient_id} has risk score {score} outside [0, 1]")]
    ScoreOutOfRange { patient_id: String, score: f64 },
}

/// Patient records keyed by id; implements every collaborator trait.
#[derive(Debug, Clone, Default)]
pub struct FixtureStore {
    patients: HashMap<String, PatientRecord>,
}

impl FixtureStore {
    pub fn new(records: impl IntoIterator<Item = PatientRecord>) -> Result<Self, FixtureError> {
        let mut patients = HashMap::new();
        for record in records {
            if !(0.0..=1.0).contains(&record.risk_score) {
                return Err(FixtureError::ScoreOutOfRange {
                    patient_id: record.patient_id,
                    score: record.risk_score,
                });
            }
            patients.insert(record.patient_id.clone(), record);
        }
        Ok(Self { patients })
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path).map_err(|e| FixtureError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let records: Vec<PatientRecord> =
            serde_json::from_str(&content).map_err(|e| FixtureError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::new(records)
    }

    /// Built-in demo patients.
    ///
    /// `P-100` is a high-risk patient with a transport barrier, `P-200` has a
    /// risk model that never answers in time, and `1`..`5` cover the classic
    /// triage cases (clinical risk, transport, low risk, financial, mixed).
    pub fn demo() -> Self {
        let records = vec![
            PatientRecord::new("P-100", 0.82)
                .factor("missed_appointments", 0.4)
                .factor("transport_access", 0.3)
                .factor("age", 0.08)
                .note("Missed the last two cardiology follow-ups.")
                .note("No car at home; daughter works weekdays."),
            PatientRecord::new("P-200", 0.55)
                .factor("sumcomorbidities", 0.35)
                .note("Recently discharged after CHF exacerbation.")
                .with_delay(Duration::from_secs(60)),
            PatientRecord::new("1", 0.75)
                .factor("age", 0.31)
                .factor("sumcomorbidities", 0.22)
                .factor("diabetes", 0.12)
                .note("Patient seems to be managing well at home."),
            PatientRecord::new("2", 0.45)
                .factor("hypertension", 0.2)
                .factor("llm_transportation_issue", 0.15)
                .factor("age", 0.07)
                .note("Patient is worried about getting a ride to their cardiology appointment next week."),
            PatientRecord::new("3", 0.15)
                .factor("race_black", 0.04)
                .factor("sdoh_pcp_1_0", 0.03)
                .factor("age", 0.02)
                .note("Patient in good spirits. Reports taking all medications as prescribed."),
            PatientRecord::new("4", 0.65)
                .factor("age", 0.25)
                .factor("llm_financial_concern", 0.21)
                .factor("hypertension", 0.1)
                .note("Patient initially denied any financial issues, but later mentioned they may have trouble affording their new medication co-pay."),
            PatientRecord::new("5", 0.85)
                .factor("sumcomorbidities", 0.33)
                .factor("llm_transportation_issue", 0.24)
                .factor("llm_financial_concern", 0.19)
                .note("Patient needs a ride to their appointment and also needs to be enrolled in the food assistance program."),
        ];

        let patients = records
            .into_iter()
            .map(|r| (r.patient_id.clone(), r))
            .collect();
        Self { patients }
    }

    pub fn get(&self, patient_id: &str) -> Option<&PatientRecord> {
        self.patients.get(patient_id)
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// Patient ids, sorted.
    pub fn patient_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.patients.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    async fn lookup(
        &self,
        patient_id: &str,
        service: Service,
    ) -> Result<&PatientRecord, CollaboratorError> {
        let record = self
            .patients
            .get(patient_id)
            .ok_or_else(|| CollaboratorError::NotFound(patient_id.to_string()))?;

        if record.delay_ms > 0 {
            debug!(patient_id, delay_ms = record.delay_ms, ?service, "Simulating slow collaborator");
            tokio::time::sleep(Duration::from_millis(record.delay_ms)).await;
        }
        if record.unavailable.contains(&service) {
            return Err(CollaboratorError::Unavailable(format!(
                "{service:?} is not answering for {patient_id}"
            )));
        }
        Ok(record)
    }
}

#[async_trait]
impl RiskModel for FixtureStore {
    async fn predict(&self, patient_id: &str) -> Result<f64, CollaboratorError> {
        Ok(self.lookup(patient_id, Service::RiskModel).await?.risk_score)
    }
}

#[async_trait]
impl Explainer for FixtureStore {
    async fn attributions(
        &self,
        patient_id: &str,
        _risk_score: f64,
    ) -> Result<Vec<RiskFactor>, CollaboratorError> {
        Ok(self
            .lookup(patient_id, Service::Explainer)
            .await?
            .factors
            .clone())
    }
}

#[async_trait]
impl NotesStore for FixtureStore {
    async fn notes(&self, patient_id: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.lookup(patient_id, Service::Notes).await?.notes.clone())
    }
}
