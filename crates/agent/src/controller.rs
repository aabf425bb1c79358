//! Loop controller: drives one session from `Created` to a terminal status.
//!
//! Each iteration:
//!
//! 1. Stop if cancellation was requested.
//! 2. Stop with `StepLimitExceeded` once `max_steps` iterations have run.
//! 3. Ask the reasoning engine for a proposal, under `reasoning_timeout`.
//! 4. `Finish(draft)`: synthesize the plan and end the session.
//! 5. `Invoke(call)`: dispatch it and append the observation to the scratchpad.
//!
//! Reasoning calls and tool dispatches race the session's [`CancelToken`];
//! a cancelled call is dropped and its result never recorded.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vertexcare_core::{
    AgentErrorKind, AgentSession, CancelToken, CaseContext, DomainEvent, EventBus,
    InterventionPlan, LoopPolicy, NextAction, ReasoningEngine, ReasoningError, SessionStatus,
    ToolRegistry,
};

use crate::dispatch::{Dispatched, check_patient, dispatch};
use crate::synthesizer::synthesize;

pub struct LoopController {
    registry: Arc<ToolRegistry>,
    reasoner: Arc<dyn ReasoningEngine>,
    events: Arc<EventBus>,
}

impl LoopController {
    pub fn new(
        registry: Arc<ToolRegistry>,
        reasoner: Arc<dyn ReasoningEngine>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            reasoner,
            events,
        }
    }

    /// Run `session` to completion under `policy`.
    ///
    /// On return the session is terminal, except when it was not runnable
    /// to begin with.
    pub async fn run(
        &self,
        session: &mut AgentSession,
        policy: &LoopPolicy,
        cancel: &CancelToken,
    ) -> Result<InterventionPlan, AgentErrorKind> {
        if session.status() != SessionStatus::Created {
            return Err(AgentErrorKind::NotRunnable {
                status: session.status(),
            });
        }
        if cancel.is_cancelled() {
            return Err(self.terminate(session, AgentErrorKind::Cancelled));
        }

        session
            .start()
            .map_err(|e| AgentErrorKind::NotRunnable { status: e.from })?;
        info!(
            session_id = %session.id,
            patient_id = %session.patient_id,
            reasoner = self.reasoner.name(),
            max_steps = policy.max_steps,
            "Session started"
        );
        self.events.publish(DomainEvent::SessionStarted {
            session_id: session.id,
            patient_id: session.patient_id.clone(),
            max_steps: policy.max_steps,
            timestamp: Utc::now(),
        });

        let specs = self.registry.specs();

        loop {
            if cancel.is_cancelled() {
                return Err(self.terminate(session, AgentErrorKind::Cancelled));
            }
            if session.step_count >= policy.max_steps {
                return Err(self.terminate(
                    session,
                    AgentErrorKind::StepLimitExceeded {
                        limit: policy.max_steps,
                    },
                ));
            }

            let step = session.begin_step();
            let case = CaseContext {
                session_id: session.id,
                patient_id: session.patient_id.clone(),
                step,
                max_steps: policy.max_steps,
            };

            // ── Reason ──
            let started = Instant::now();
            let timeout = policy.reasoning_timeout();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(
                    timeout,
                    self.reasoner.propose(session.scratchpad(), &case, &specs),
                ) => Some(r),
            };

            let proposal = match outcome {
                None => return Err(self.terminate(session, AgentErrorKind::Cancelled)),
                Some(Err(_)) => {
                    let err = ReasoningError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    };
                    return Err(self.terminate(session, err.into()));
                }
                Some(Ok(Err(err))) => return Err(self.terminate(session, err.into())),
                Some(Ok(Ok(proposal))) => proposal,
            };

            let finished = matches!(proposal.next, NextAction::Finish(_));
            debug!(
                session_id = %session.id,
                step,
                thought = %proposal.thought,
                finished,
                "Reasoning step completed"
            );
            self.events.publish(DomainEvent::ReasoningCompleted {
                session_id: session.id,
                step,
                finished,
                duration_ms: started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });

            match proposal.next {
                // ── Finish ──
                NextAction::Finish(draft) => {
                    return match synthesize(session, draft) {
                        Ok(plan) => {
                            if let Err(e) = session.finish() {
                                warn!(session_id = %session.id, error = %e, "Finish rejected");
                            }
                            info!(
                                session_id = %session.id,
                                steps = session.step_count,
                                recommendations = plan.recommendations.len(),
                                "Session finished"
                            );
                            self.publish_end(session, None);
                            Ok(plan)
                        }
                        Err(kind) => Err(self.terminate(session, kind)),
                    };
                }

                // ── Act ──
                NextAction::Invoke(mut invocation) => {
                    if invocation.timeout_ms.is_none() {
                        invocation.timeout_ms =
                            Some(policy.effective_timeout(&invocation).as_millis() as u64);
                    }

                    let dispatched = match check_patient(&invocation, &session.patient_id) {
                        Err(failure) => {
                            warn!(
                                session_id = %session.id,
                                step,
                                tool = %invocation.tool,
                                reason = %failure.message,
                                "Invocation names another patient"
                            );
                            Some(Dispatched::rejected(failure))
                        }
                        Ok(()) => tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            d = dispatch(&self.registry, &invocation, policy) => Some(d),
                        },
                    };
                    let Some(dispatched) = dispatched else {
                        return Err(self.terminate(session, AgentErrorKind::Cancelled));
                    };

                    let failure = dispatched.result.failure_info().map(|f| f.kind);
                    info!(
                        session_id = %session.id,
                        step,
                        tool = %invocation.tool,
                        attempts = dispatched.attempts,
                        ok = failure.is_none(),
                        "Observation recorded"
                    );
                    self.events.publish(DomainEvent::ToolDispatched {
                        session_id: session.id,
                        step,
                        tool_name: invocation.tool.clone(),
                        attempts: dispatched.attempts,
                        failure,
                        duration_ms: dispatched.elapsed.as_millis() as u64,
                        timestamp: Utc::now(),
                    });

                    if let Err(full) = session.scratchpad_mut().append(
                        proposal.thought,
                        invocation,
                        dispatched.result,
                        dispatched.attempts,
                    ) {
                        warn!(session_id = %session.id, error = %full, "Scratchpad full");
                        return Err(self.terminate(
                            session,
                            AgentErrorKind::StepLimitExceeded {
                                limit: policy.max_steps,
                            },
                        ));
                    }
                }
            }
        }
    }

    /// Move a non-terminal session to `Failed` (or `Cancelled`) and report it.
    pub fn terminate(&self, session: &mut AgentSession, kind: AgentErrorKind) -> AgentErrorKind {
        if session.status().is_terminal() {
            return kind;
        }

        let moved = match kind {
            AgentErrorKind::Cancelled => session.cancel(),
            _ => session.fail(kind.clone()),
        };
        if let Err(e) = moved {
            warn!(session_id = %session.id, error = %e, "Could not record session failure");
            return kind;
        }

        warn!(
            session_id = %session.id,
            status = %session.status(),
            steps = session.step_count,
            reason = %kind,
            "Session ended without a plan"
        );
        self.publish_end(session, Some(kind.to_string()));
        kind
    }

    fn publish_end(&self, session: &AgentSession, reason: Option<String>) {
        self.events.publish(DomainEvent::SessionEnded {
            session_id: session.id,
            status: session.status(),
            steps: session.step_count,
            reason,
            timestamp: Utc::now(),
        });
    }
}
