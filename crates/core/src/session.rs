//! Agent sessions and their status machine.
//!
//! ```text
//! Created ──► Running ──► Finished
//!    │           ├──────► Failed
//!    └───────────┴──────► Cancelled
//! ```
//!
//! A session reaches exactly one terminal status. Every transition goes
//! through [`AgentSession::transition`], which rejects anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AgentErrorKind;
use crate::scratchpad::{Scratchpad, ScratchpadEntry};

/// Unique identifier of a planning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    fn can_move_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Created, Cancelled)
                | (Running, Finished)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One planning run for one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: SessionId,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    /// Loop iterations started so far.
    pub step_count: u32,
    status: SessionStatus,
    scratchpad: Scratchpad,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<AgentErrorKind>,
}

impl AgentSession {
    /// Create a session whose scratchpad holds at most `max_steps` entries.
    pub fn new(patient_id: impl Into<String>, max_steps: u32) -> Self {
        Self {
            id: SessionId::new(),
            patient_id: patient_id.into(),
            created_at: Utc::now(),
            step_count: 0,
            status: SessionStatus::Created,
            scratchpad: Scratchpad::new(max_steps as usize),
            failure: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn scratchpad(&self) -> &Scratchpad {
        &self.scratchpad
    }

    pub fn scratchpad_mut(&mut self) -> &mut Scratchpad {
        &mut self.scratchpad
    }

    pub fn failure(&self) -> Option<&AgentErrorKind> {
        self.failure.as_ref()
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), TransitionError> {
        if !self.status.can_move_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Running)
    }

    pub fn finish(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Finished)
    }

    /// Move to `Failed`, recording why.
    pub fn fail(&mut self, kind: AgentErrorKind) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Failed)?;
        self.failure = Some(kind);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Cancelled)?;
        self.failure = Some(AgentErrorKind::Cancelled);
        Ok(())
    }

    /// Count a new loop iteration and return its 1-based number.
    pub fn begin_step(&mut self) -> u32 {
        self.step_count += 1;
        self.step_count
    }

    /// Serializable view for audit and API responses.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            patient_id: self.patient_id.clone(),
            status: self.status,
            step_count: self.step_count,
            created_at: self.created_at,
            failure: self.failure.clone(),
            scratchpad: self.scratchpad.entries().to_vec(),
        }
    }
}

/// Point-in-time copy of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub patient_id: String,
    pub status: SessionStatus,
    pub step_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<AgentErrorKind>,
    pub scratchpad: Vec<ScratchpadEntry>,
}
