//! The agent loop, the core of VertexCare.
//!
//! Each session follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Reason**: the reasoning engine reads the scratchpad and proposes
//!    either a tool invocation or a terminal plan draft
//! 2. **Act**: the invocation is dispatched through the tool registry under
//!    a deadline, with retries for timeouts and transient failures
//! 3. **Observe**: the outcome, success or failure, is appended to the
//!    scratchpad and the loop goes back to step 1
//!
//! A draft ends the loop and is validated by the synthesizer, which only
//! accepts plans grounded in successful observations. Step limits,
//! cancellation and an overall deadline bound every session.

pub mod controller;
pub mod dispatch;
pub mod llm;
pub mod manager;
pub mod parser;
pub mod rules;
pub mod synthesizer;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;
use vertexcare_config::{ReasoningConfig, ReasoningEngineKind};
use vertexcare_core::{ReasoningEngine, ReasoningError};

pub use controller::LoopController;
pub use dispatch::{Dispatched, check_patient, dispatch};
pub use llm::LlmReasoner;
pub use manager::SessionManager;
pub use parser::parse_response;
pub use rules::RuleBasedReasoner;
pub use synthesizer::synthesize;

/// Build the reasoning engine selected by `config`.
pub fn build_reasoner(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningEngine>, ReasoningError> {
    match config.engine {
        ReasoningEngineKind::Rules => Ok(Arc::new(RuleBasedReasoner::new())),
        ReasoningEngineKind::Llm => Ok(Arc::new(LlmReasoner::from_config(config)?)),
    }
}
