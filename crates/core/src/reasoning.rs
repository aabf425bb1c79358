//! Reasoning step contract.
//!
//! Given the scratchpad so far, the case, and the available tools, a
//! reasoning engine returns a thought plus exactly one of: the next tool to
//! invoke, or a terminal plan draft.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReasoningError;
use crate::plan::PlanDraft;
use crate::scratchpad::Scratchpad;
use crate::session::SessionId;
use crate::tool::{ToolInvocation, ToolSpec};

/// What the engine knows about the case being planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseContext {
    pub session_id: SessionId,
    pub patient_id: String,
    /// 1-based number of the iteration being proposed.
    pub step: u32,
    pub max_steps: u32,
}

impl CaseContext {
    /// Iterations left after this one.
    pub fn remaining_steps(&self) -> u32 {
        self.max_steps.saturating_sub(self.step)
    }
}

/// The engine's decision for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextAction {
    Invoke(ToolInvocation),
    Finish(PlanDraft),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub thought: String,
    pub next: NextAction,
}

impl Proposal {
    pub fn invoke(thought: impl Into<String>, invocation: ToolInvocation) -> Self {
        Self {
            thought: thought.into(),
            next: NextAction::Invoke(invocation),
        }
    }

    pub fn finish(thought: impl Into<String>, draft: PlanDraft) -> Self {
        Self {
            thought: thought.into(),
            next: NextAction::Finish(draft),
        }
    }
}

/// A source of reasoning steps: a rule set, a language model, a test script.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    async fn propose(
        &self,
        scratchpad: &Scratchpad,
        case: &CaseContext,
        tools: &[ToolSpec],
    ) -> Result<Proposal, ReasoningError>;
}
