//! Tool dispatch: resolve, validate, call under a deadline, retry.
//!
//! Every outcome is a [`ToolResult`]; nothing here ends a session.
//! Calls that name a patient other than the session's are rejected as
//! `validation` failures before anything is resolved.
//! `timeout` and `transient` failures are retried per the loop's
//! [`RetryPolicy`](vertexcare_core::RetryPolicy), everything else is final.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use vertexcare_core::{
    LoopPolicy, ToolFailure, ToolFailureKind, ToolInvocation, ToolRegistry, ToolResult,
};

/// Result of dispatching one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub result: ToolResult,
    /// Calls made to the tool; 0 when resolution or validation failed.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl Dispatched {
    /// Rejected before any call was made.
    pub fn rejected(failure: ToolFailure) -> Self {
        Self {
            result: ToolResult::Failure(failure),
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// A `patientId` argument, when present as a string, must name the
/// session's patient.
pub fn check_patient(invocation: &ToolInvocation, patient_id: &str) -> Result<(), ToolFailure> {
    match invocation.arguments.get("patientId").and_then(|v| v.as_str()) {
        Some(requested) if requested.trim() != patient_id => Err(ToolFailure::new(
            ToolFailureKind::Validation,
            format!(
                "{} was asked about patient '{}' but this session is for '{}'",
                invocation.tool,
                requested.trim(),
                patient_id
            ),
        )),
        _ => Ok(()),
    }
}

/// Dispatch `invocation` against `registry` under `policy`.
pub async fn dispatch(
    registry: &ToolRegistry,
    invocation: &ToolInvocation,
    policy: &LoopPolicy,
) -> Dispatched {
    let started = Instant::now();

    let tool = match registry.resolve(invocation) {
        Ok(tool) => tool,
        Err(failure) => {
            debug!(tool = %invocation.tool, kind = %failure.kind, "Invocation rejected before dispatch");
            return Dispatched {
                elapsed: started.elapsed(),
                ..Dispatched::rejected(failure)
            };
        }
    };

    let deadline = policy.effective_timeout(invocation);
    let max_attempts = policy.retry.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;

        let failure =
            match tokio::time::timeout(deadline, tool.invoke(&invocation.arguments)).await {
                Ok(Ok(payload)) => {
                    return Dispatched {
                        result: ToolResult::success(payload),
                        attempts,
                        elapsed: started.elapsed(),
                    };
                }
                Ok(Err(e)) => ToolFailure::from(e),
                Err(_) => ToolFailure::new(
                    ToolFailureKind::Timeout,
                    format!(
                        "{} did not respond within {}ms",
                        invocation.tool,
                        deadline.as_millis()
                    ),
                ),
            };

        if !failure.kind.is_retryable() || attempts >= max_attempts {
            return Dispatched {
                result: ToolResult::Failure(failure),
                attempts,
                elapsed: started.elapsed(),
            };
        }

        let backoff = policy.retry.backoff(attempts - 1);
        warn!(
            tool = %invocation.tool,
            attempt = attempts,
            max_attempts,
            kind = %failure.kind,
            backoff_ms = backoff.as_millis() as u64,
            "Tool call failed, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}
