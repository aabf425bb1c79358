//! # VertexCare Core
//!
//! Domain types, traits, and error definitions for the VertexCare
//! care-planning agent. This crate has **no framework dependencies**: it
//! defines the model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Each seam is a trait here ([`Tool`], [`ReasoningEngine`]). Implementations
//! live in their own crates, so collaborators can be swapped by configuration
//! and faked in tests.

pub mod cancel;
pub mod error;
pub mod event;
pub mod plan;
pub mod policy;
pub mod reasoning;
pub mod scratchpad;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cancel::CancelToken;
pub use error::{AgentError, AgentErrorKind, ReasoningError, RegistryError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use plan::{
    DraftRecommendation, InterventionPlan, PlanDraft, Priority, Recommendation, RiskBand,
    RiskFactor, RiskSummary,
};
pub use policy::{LoopPolicy, RetryPolicy};
pub use reasoning::{CaseContext, NextAction, Proposal, ReasoningEngine};
pub use scratchpad::{Scratchpad, ScratchpadEntry};
pub use session::{AgentSession, SessionId, SessionSnapshot, SessionStatus, TransitionError};
pub use tool::{
    Arguments, ParamSpec, ParamType, Tool, ToolFailure, ToolFailureKind, ToolInvocation,
    ToolRegistry, ToolResult, ToolSpec,
};
