//! Scratchpad: the append-only transcript of one planning session.
//!
//! Each entry records one loop iteration: the reasoning step's thought, the
//! tool invocation it requested, and the observation the dispatch produced.
//! Later iterations see every earlier entry; the order is significant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tool::{ToolInvocation, ToolResult};

/// One iteration's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    /// 1-based position in the scratchpad.
    pub step: u32,
    pub thought: String,
    pub action: ToolInvocation,
    pub observation: ToolResult,
    /// Dispatch attempts spent on this action (retries included).
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl ScratchpadEntry {
    pub fn succeeded(&self) -> bool {
        self.observation.is_success()
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("scratchpad is full ({capacity} entries)")]
pub struct ScratchpadFull {
    pub capacity: usize,
}

/// Bounded, append-only transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scratchpad {
    entries: Vec<ScratchpadEntry>,
    capacity: usize,
}

impl Scratchpad {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append an entry and return it.
    pub fn append(
        &mut self,
        thought: impl Into<String>,
        action: ToolInvocation,
        observation: ToolResult,
        attempts: u32,
    ) -> Result<&ScratchpadEntry, ScratchpadFull> {
        if self.entries.len() >= self.capacity {
            return Err(ScratchpadFull {
                capacity: self.capacity,
            });
        }
        let step = self.entries.len() as u32 + 1;
        self.entries.push(ScratchpadEntry {
            step,
            thought: thought.into(),
            action,
            observation,
            attempts,
            timestamp: Utc::now(),
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn entries(&self) -> &[ScratchpadEntry] {
        &self.entries
    }

    /// Entry by 1-based step number.
    pub fn entry(&self, step: u32) -> Option<&ScratchpadEntry> {
        step.checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
    }

    pub fn last(&self) -> Option<&ScratchpadEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries whose observation is a success payload.
    pub fn successful(&self) -> impl Iterator<Item = &ScratchpadEntry> {
        self.entries.iter().filter(|e| e.succeeded())
    }

    pub fn successful_count(&self) -> usize {
        self.successful().count()
    }

    /// Most recent successful entry for `tool`.
    pub fn latest_success(&self, tool: &str) -> Option<&ScratchpadEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.action.tool == tool && e.succeeded())
    }

    /// Whether `tool` has been attempted at all.
    pub fn attempted(&self, tool: &str) -> bool {
        self.entries.iter().any(|e| e.action.tool == tool)
    }

    /// Render as `Thought / Action / Observation` text for reasoning prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!("Thought: {}\n", entry.thought));
            out.push_str(&format!("Action: {}\n", entry.action.render()));
            out.push_str(&format!("Observation: {}\n", entry.observation.summary()));
        }
        out
    }

    pub fn into_entries(self) -> Vec<ScratchpadEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolFailureKind;

    fn predict() -> ToolInvocation {
        ToolInvocation::new("predict_risk").arg("patientId", "P-100")
    }

    #[test]
    fn append_assigns_steps_in_order() {
        let mut pad = Scratchpad::new(4);
        pad.append("first", predict(), ToolResult::success(serde_json::json!({})), 1)
            .unwrap();
        let second = pad
            .append(
                "second",
                predict(),
                ToolResult::failure(ToolFailureKind::Timeout, "slow"),
                3,
            )
            .unwrap();
        assert_eq!(second.step, 2);
        assert_eq!(pad.len(), 2);
        assert_eq!(pad.entry(1).unwrap().thought, "first");
        assert!(pad.entry(0).is_none());
        assert!(pad.entry(3).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut pad = Scratchpad::new(1);
        pad.append("a", predict(), ToolResult::success(serde_json::json!(1)), 1)
            .unwrap();
        let err = pad
            .append("b", predict(), ToolResult::success(serde_json::json!(2)), 1)
            .unwrap_err();
        assert_eq!(err.capacity, 1);
        assert_eq!(pad.len(), 1);
    }

    #[test]
    fn successful_entries_and_latest() {
        let mut pad = Scratchpad::new(5);
        pad.append(
            "try",
            predict(),
            ToolResult::failure(ToolFailureKind::Transient, "503"),
            3,
        )
        .unwrap();
        pad.append(
            "again",
            predict(),
            ToolResult::success(serde_json::json!({"riskScore": 0.4})),
            1,
        )
        .unwrap();

        assert_eq!(pad.successful_count(), 1);
        assert_eq!(pad.latest_success("predict_risk").unwrap().step, 2);
        assert!(pad.latest_success("explain").is_none());
        assert!(pad.attempted("predict_risk"));
        assert!(!pad.attempted("fetch_notes"));
    }

    #[test]
    fn render_lists_thought_action_observation() {
        let mut pad = Scratchpad::new(2);
        pad.append(
            "Need the baseline risk",
            predict(),
            ToolResult::success(serde_json::json!({"riskScore": 0.82})),
            1,
        )
        .unwrap();
        let text = pad.render();
        assert!(text.contains("Thought: Need the baseline risk"));
        assert!(text.contains(r#"Action: predict_risk({"patientId":"P-100"})"#));
        assert!(text.contains(r#"Observation: {"riskScore":0.82}"#));
    }
}
