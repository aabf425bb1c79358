//! Tool contract: the uniform call surface every collaborator is adapted to.
//!
//! A tool wraps one external capability (risk prediction, explanation,
//! note lookup) behind `invoke(arguments)`. Its [`ToolSpec`] is the static
//! description the reasoning step chooses from, and the schema the registry
//! checks arguments against before any external call is made.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RegistryError, ToolError};

/// Named argument values passed to a tool.
pub type Arguments = serde_json::Map<String, Value>;

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` is acceptable for this parameter type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Static description of a tool. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique name the reasoning step refers to (e.g. `predict_risk`).
    pub name: String,

    /// Human-readable description consumed by the reasoning step.
    pub description: String,

    /// Accepted parameters.
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a required parameter.
    pub fn required(self, name: &str, ty: ParamType, description: &str) -> Self {
        self.param(name, ty, true, description)
    }

    /// Add an optional parameter.
    pub fn optional(self, name: &str, ty: ParamType, description: &str) -> Self {
        self.param(name, ty, false, description)
    }

    fn param(mut self, name: &str, ty: ParamType, required: bool, description: &str) -> Self {
        self.parameters.push(ParamSpec {
            name: name.to_string(),
            ty,
            required,
            description: description.to_string(),
        });
        self
    }

    /// JSON Schema describing this tool's parameters.
    pub fn json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({ "type": p.ty.as_str(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check `arguments` against the parameter list.
    ///
    /// Rejects missing required parameters, values of the wrong type and
    /// parameters the tool does not declare.
    pub fn validate(&self, arguments: &Arguments) -> Result<(), String> {
        for param in &self.parameters {
            match arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(format!(
                        "missing required argument '{}' for {}",
                        param.name, self.name
                    ));
                }
                Some(value) if !value.is_null() && !param.ty.matches(value) => {
                    return Err(format!(
                        "argument '{}' of {} must be {}, got {}",
                        param.name,
                        self.name,
                        param.ty,
                        json_type_name(value)
                    ));
                }
                _ => {}
            }
        }

        if let Some(unknown) = arguments
            .keys()
            .find(|k| !self.parameters.iter().any(|p| &p.name == *k))
        {
            return Err(format!("unknown argument '{}' for {}", unknown, self.name));
        }

        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single requested call, produced by the reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the tool to call.
    pub tool: String,

    /// Argument values.
    #[serde(default)]
    pub arguments: Arguments,

    /// Per-call deadline in milliseconds. When absent the loop policy decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            arguments: Arguments::new(),
            timeout_ms: None,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.to_string(), value.into());
        self
    }

    /// Set an explicit per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// One-line rendering, e.g. `predict_risk({"patientId":"P-100"})`.
    pub fn render(&self) -> String {
        format!("{}({})", self.tool, Value::Object(self.arguments.clone()))
    }
}

/// Category of a failed tool dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// Arguments did not satisfy the tool's spec.
    Validation,
    /// No tool is registered under the requested name.
    UnknownTool,
    /// The call did not return within its deadline.
    Timeout,
    /// The collaborator reported a temporary failure.
    Transient,
    /// The collaborator reported a permanent failure.
    Execution,
}

impl ToolFailureKind {
    /// Whether the retry policy applies to this kind of failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UnknownTool => "unknown_tool",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Execution => "execution",
        }
    }
}

impl fmt::Display for ToolFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure descriptor of a tool dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<ToolError> for ToolFailure {
    fn from(err: ToolError) -> Self {
        let kind = match &err {
            ToolError::InvalidArguments(_) => ToolFailureKind::Validation,
            ToolError::Transient { .. } => ToolFailureKind::Transient,
            ToolError::NotFound(_) | ToolError::ExecutionFailed { .. } => {
                ToolFailureKind::Execution
            }
        };
        Self::new(kind, err.to_string())
    }
}

/// Outcome of dispatching a [`ToolInvocation`]: a payload or a failure, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success { payload: Value },
    Failure(ToolFailure),
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        Self::Success { payload }
    }

    pub fn failure(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self::Failure(ToolFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failure(_) => None,
        }
    }

    /// The failure descriptor, if any.
    pub fn failure_info(&self) -> Option<&ToolFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    /// Compact text form used in transcripts and logs.
    pub fn summary(&self) -> String {
        match self {
            Self::Success { payload } => payload.to_string(),
            Self::Failure(f) => format!("ERROR[{}] {}", f.kind, f.message),
        }
    }
}

/// The core Tool trait.
///
/// Each collaborator adapter implements this trait and is registered in the
/// [`ToolRegistry`]. Arguments reaching `invoke` have already been validated
/// against [`Tool::spec`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static description of this tool.
    fn spec(&self) -> &ToolSpec;

    /// The unique name of this tool.
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Call the underlying collaborator.
    async fn invoke(&self, arguments: &Arguments) -> Result<Value, ToolError>;
}

/// A registry of available tools.
///
/// Built once at startup, then shared read-only (behind `Arc`) by every
/// session. The loop controller uses it to:
/// 1. List tool specs for the reasoning step
/// 2. Resolve and validate invocations before dispatch
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool under the same name is a configuration error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool specs, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec().clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up the tool for `invocation` and check its arguments.
    ///
    /// Fails fast with an `unknown_tool` or `validation` failure; nothing
    /// external is called.
    pub fn resolve(&self, invocation: &ToolInvocation) -> Result<Arc<dyn Tool>, ToolFailure> {
        let tool = self.get(&invocation.tool).ok_or_else(|| {
            ToolFailure::new(
                ToolFailureKind::UnknownTool,
                format!(
                    "no tool named '{}' (available: {})",
                    invocation.tool,
                    self.names().join(", ")
                ),
            )
        })?;

        tool.spec()
            .validate(&invocation.arguments)
            .map_err(|msg| ToolFailure::new(ToolFailureKind::Validation, msg))?;

        Ok(tool)
    }
}
