//! Loop policy: the tunables a session runs under.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::tool::ToolInvocation;

/// Bounds on re-attempting a failed tool dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first; at most `1 + max_retries` calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_initial_backoff_ms() -> u64 {
    200
}
fn default_max_backoff_ms() -> u64 {
    2_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based):
    /// `min(initial × multiplier^retry, max)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Termination and deadline settings for one session.
///
/// Handed to each session at start, so sessions with different policies
/// can run side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPolicy {
    /// Maximum loop iterations (reasoning calls) per session.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_reasoning_timeout_ms")]
    pub reasoning_timeout_ms: u64,

    /// Default per-call tool deadline.
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Per-tool overrides of `tool_timeout_ms`, keyed by tool name.
    #[serde(default)]
    pub tool_timeouts: HashMap<String, u64>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_steps() -> u32 {
    5
}
fn default_reasoning_timeout_ms() -> u64 {
    30_000
}
fn default_tool_timeout_ms() -> u64 {
    10_000
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            reasoning_timeout_ms: default_reasoning_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            tool_timeouts: HashMap::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LoopPolicy {
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reasoning_timeout(mut self, timeout: Duration) -> Self {
        self.reasoning_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning_timeout_ms)
    }

    /// Configured deadline for `tool`.
    pub fn timeout_for(&self, tool: &str) -> Duration {
        let ms = self
            .tool_timeouts
            .get(tool)
            .copied()
            .unwrap_or(self.tool_timeout_ms);
        Duration::from_millis(ms)
    }

    /// Deadline for a concrete invocation: its own `timeout_ms` if set,
    /// else the configured one for the tool.
    pub fn effective_timeout(&self, invocation: &ToolInvocation) -> Duration {
        invocation
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.timeout_for(&invocation.tool))
    }
}
