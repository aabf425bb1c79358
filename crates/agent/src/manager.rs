//! Session management: the entry points callers use.
//!
//! `start_session` creates a session, `run_to_end` drives it under an
//! overall deadline, `cancel` stops it, `snapshot` exposes it for audit.
//! Sessions run concurrently; they share only the registry, the reasoning
//! engine and the event bus.
//!
//! Each run executes on its own task and parks the session back in its slot
//! when done. A caller that stops waiting cancels the run; the task still
//! settles the session. Terminal sessions are kept until pruned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use vertexcare_core::{
    AgentError, AgentErrorKind, AgentSession, CancelToken, EventBus, InterventionPlan,
    LoopPolicy, ReasoningEngine, SessionId, SessionSnapshot, SessionStatus, ToolRegistry,
};

use crate::controller::LoopController;

/// Longest accepted patient id.
const MAX_PATIENT_ID_LEN: usize = 64;

type Slots = Arc<Mutex<HashMap<SessionId, Slot>>>;

enum SlotState {
    /// Not running: waiting for `run_to_end` (`Created`) or terminal.
    Parked(AgentSession),
    /// Owned by a running loop; the snapshot is taken at start.
    Running(SessionSnapshot),
}

struct Slot {
    policy: LoopPolicy,
    cancel: CancelToken,
    state: SlotState,
    /// When the session reached a terminal status.
    ended: Option<Instant>,
}

impl Slot {
    fn snapshot(&self) -> SessionSnapshot {
        match &self.state {
            SlotState::Parked(s) => s.snapshot(),
            SlotState::Running(snap) => snap.clone(),
        }
    }

    fn status(&self) -> SessionStatus {
        match &self.state {
            SlotState::Parked(s) => s.status(),
            SlotState::Running(_) => SessionStatus::Running,
        }
    }

    fn park(&mut self, session: AgentSession) {
        if session.status().is_terminal() {
            self.ended.get_or_insert_with(Instant::now);
        }
        self.state = SlotState::Parked(session);
    }
}

fn lock(slots: &Mutex<HashMap<SessionId, Slot>>) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancels a run whose caller went away before it finished.
struct AbandonGuard {
    id: SessionId,
    cancel: Option<CancelToken>,
}

impl AbandonGuard {
    fn disarm(mut self) {
        self.cancel = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            warn!(session_id = %self.id, "Run abandoned by its caller, cancelling");
            cancel.cancel();
        }
    }
}

pub struct SessionManager {
    controller: Arc<LoopController>,
    registry: Arc<ToolRegistry>,
    events: Arc<EventBus>,
    default_policy: LoopPolicy,
    sessions: Slots,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ToolRegistry>,
        reasoner: Arc<dyn ReasoningEngine>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            controller: Arc::new(LoopController::new(registry.clone(), reasoner, events.clone())),
            registry,
            events,
            default_policy: LoopPolicy::default(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Policy used by [`start_session`](Self::start_session).
    pub fn with_policy(mut self, policy: LoopPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn default_policy(&self) -> &LoopPolicy {
        &self.default_policy
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
        lock(&self.sessions)
    }

    /// Create a session for `patient_id` under the default policy.
    pub fn start_session(&self, patient_id: &str) -> Result<SessionId, AgentErrorKind> {
        self.start_session_with(patient_id, self.default_policy.clone())
    }

    /// Create a session with an explicit policy.
    pub fn start_session_with(
        &self,
        patient_id: &str,
        policy: LoopPolicy,
    ) -> Result<SessionId, AgentErrorKind> {
        let patient_id = validate_patient_id(patient_id)?;
        let session = AgentSession::new(patient_id, policy.max_steps);
        let id = session.id;

        info!(session_id = %id, patient_id, "Session created");
        self.slots().insert(
            id,
            Slot {
                policy,
                cancel: CancelToken::new(),
                state: SlotState::Parked(session),
                ended: None,
            },
        );
        Ok(id)
    }

    /// Drive a created session to its end, giving up after `deadline`.
    ///
    /// Dropping the returned future cancels the run.
    pub async fn run_to_end(
        &self,
        id: SessionId,
        deadline: Duration,
    ) -> Result<InterventionPlan, AgentError> {
        let (session, policy, cancel) = {
            let mut slots = self.slots();
            let slot = slots.get_mut(&id).ok_or_else(|| unknown(id))?;
            let running = match &slot.state {
                SlotState::Parked(s) if s.status() == SessionStatus::Created => {
                    let mut snap = s.snapshot();
                    snap.status = SessionStatus::Running;
                    snap
                }
                _ => return Err(not_runnable(id, slot.status())),
            };
            let session = match std::mem::replace(&mut slot.state, SlotState::Running(running)) {
                SlotState::Parked(session) => session,
                SlotState::Running(prev) => {
                    slot.state = SlotState::Running(prev);
                    return Err(not_runnable(id, SessionStatus::Running));
                }
            };
            (session, slot.policy.clone(), slot.cancel.clone())
        };

        let guard = AbandonGuard {
            id,
            cancel: Some(cancel.clone()),
        };
        let task = tokio::spawn(drive(
            self.controller.clone(),
            self.sessions.clone(),
            session,
            policy,
            cancel,
            deadline,
        ));
        let joined = task.await;
        guard.disarm();

        match joined {
            Ok(result) => result,
            Err(err) => {
                self.slots().remove(&id);
                if err.is_panic() {
                    error!(session_id = %id, "Session task panicked");
                    std::panic::resume_unwind(err.into_panic());
                }
                warn!(session_id = %id, "Session task was shut down");
                Err(AgentError::bare(id, AgentErrorKind::Cancelled))
            }
        }
    }

    /// Start and run in one call.
    pub async fn plan_for(
        &self,
        patient_id: &str,
        deadline: Duration,
    ) -> Result<InterventionPlan, AgentError> {
        let id = self
            .start_session(patient_id)
            .map_err(|kind| AgentError::bare(SessionId::new(), kind))?;
        self.run_to_end(id, deadline).await
    }

    /// Request cancellation. A created session is cancelled at once; a
    /// running one stops at its next suspension point; a terminal one is
    /// left as is.
    pub fn cancel(&self, id: SessionId) -> Result<SessionStatus, AgentError> {
        let mut slots = self.slots();
        let slot = slots.get_mut(&id).ok_or_else(|| unknown(id))?;
        slot.cancel.cancel();

        if let SlotState::Parked(session) = &mut slot.state
            && session.status() == SessionStatus::Created
        {
            let kind = self.controller.terminate(session, AgentErrorKind::Cancelled);
            slot.ended = Some(Instant::now());
            info!(session_id = %id, reason = %kind, "Session cancelled before running");
            return Ok(SessionStatus::Cancelled);
        }

        let status = slot.status();
        info!(session_id = %id, %status, "Cancellation requested");
        Ok(status)
    }

    pub fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, AgentError> {
        self.slots()
            .get(&id)
            .map(Slot::snapshot)
            .ok_or_else(|| unknown(id))
    }

    /// Ids and statuses of all known sessions.
    pub fn list(&self) -> Vec<(SessionId, SessionStatus)> {
        self.slots()
            .iter()
            .map(|(id, slot)| (*id, slot.status()))
            .collect()
    }

    /// Forget a session, cancelling it if it is still running.
    pub fn remove(&self, id: SessionId) -> Result<SessionSnapshot, AgentError> {
        let slot = self.slots().remove(&id).ok_or_else(|| unknown(id))?;
        slot.cancel.cancel();
        Ok(slot.snapshot())
    }

    /// Drop sessions that ended at least `retention` ago; returns how many
    /// were removed.
    pub fn prune_expired(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            !slot
                .ended
                .is_some_and(|at| now.saturating_duration_since(at) >= retention)
        });
        before - slots.len()
    }

    /// Drop terminal sessions; returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        self.prune_expired(Duration::ZERO)
    }
}

/// Body of the task spawned by `run_to_end`.
async fn drive(
    controller: Arc<LoopController>,
    sessions: Slots,
    mut session: AgentSession,
    policy: LoopPolicy,
    cancel: CancelToken,
    deadline: Duration,
) -> Result<InterventionPlan, AgentError> {
    let id = session.id;
    let result = match tokio::time::timeout(deadline, controller.run(&mut session, &policy, &cancel))
        .await
    {
        Ok(result) => result,
        Err(_) => {
            let kind = AgentErrorKind::DeadlineExceeded {
                deadline_ms: deadline.as_millis() as u64,
            };
            warn!(session_id = %id, deadline_ms = deadline.as_millis() as u64, "Run deadline exceeded");
            Err(controller.terminate(&mut session, kind))
        }
    };

    let result =
        result.map_err(|kind| AgentError::new(id, kind, session.scratchpad().entries().to_vec()));

    if let Some(slot) = lock(&sessions).get_mut(&id) {
        slot.park(session);
    }
    result
}

fn unknown(id: SessionId) -> AgentError {
    AgentError::bare(
        id,
        AgentErrorKind::UnknownSession {
            session_id: id.to_string(),
        },
    )
}

fn not_runnable(id: SessionId, status: SessionStatus) -> AgentError {
    AgentError::bare(id, AgentErrorKind::NotRunnable { status })
}

fn validate_patient_id(patient_id: &str) -> Result<&str, AgentErrorKind> {
    let id = patient_id.trim();
    let reason = if id.is_empty() {
        "patient id is empty".to_string()
    } else if id.len() > MAX_PATIENT_ID_LEN {
        format!("patient id longer than {MAX_PATIENT_ID_LEN} characters")
    } else if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        format!("patient id contains '{c}'")
    } else {
        return Ok(id);
    };
    Err(AgentErrorKind::InvalidPatientId { reason })
}
