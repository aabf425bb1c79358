//! LLM-backed reasoning engine.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. The model
//! sees the tool schemas, the numbered scratchpad and the plan format, and
//! answers in `Thought / Action` or `Thought / Final Answer` text, which
//! [`parse_response`] turns into a proposal. Generation stops at
//! `Observation:` so the model never invents tool output.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write;
use std::time::Duration;
use tracing::{debug, warn};
use vertexcare_config::ReasoningConfig;
use vertexcare_core::{
    CaseContext, Proposal, ReasoningEngine, ReasoningError, Scratchpad, ToolSpec,
};

use crate::parser::parse_response;

const STOP_SEQUENCE: &str = "Observation:";

const SYSTEM_PROMPT: &str = "\
You are a care-planning assistant for community health workers. Given a \
patient id, gather evidence with the available tools and then write a \
prioritized intervention plan to reduce the patient's 30-day readmission risk.

Answer in exactly one of these two forms.

To call a tool:
Thought: <your reasoning>
Action: <tool_name>(<JSON object of arguments>)

To finish:
Thought: <your reasoning>
Final Answer: <JSON plan>

The JSON plan has this shape:
{\"summary\": string, \"riskScore\": number, \"confidence\": number between 0 and 1,
 \"recommendations\": [{\"action\": string, \"rationale\": string,
   \"priority\": \"High\" | \"Medium\" | \"Low\", \"evidence\": [step numbers]}]}

Rules:
- Call one tool per answer and wait for its observation.
- Every recommendation must cite, in evidence, the numbers of the steps whose \
observations support it. Only successful steps count.
- riskScore must be a score a tool actually returned.
- Never write an Observation yourself.";

/// Reasoning engine backed by a chat-completions endpoint.
pub struct LlmReasoner {
    api_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl LlmReasoner {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Result<Self, ReasoningError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ReasoningError::Unavailable {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 1024,
            client,
        })
    }

    pub fn from_config(config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let mut reasoner = Self::new(&config.api_url, &config.model)?
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);
        reasoner.api_key = config.api_key.clone().filter(|k| !k.is_empty());
        Ok(reasoner)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// System prompt with the tool catalogue appended.
    fn system_prompt(tools: &[ToolSpec]) -> String {
        let mut prompt = String::from(SYSTEM_PROMPT);
        prompt.push_str("\n\nAvailable tools:\n");
        for tool in tools {
            let _ = writeln!(
                prompt,
                "- {}: {}\n  arguments: {}",
                tool.name,
                tool.description,
                tool.json_schema()
            );
        }
        prompt
    }

    /// Case header plus the numbered scratchpad.
    fn user_prompt(scratchpad: &Scratchpad, case: &CaseContext) -> String {
        let mut prompt = format!(
            "Begin analysis for patientId \"{}\". This is step {} of {}.\n",
            case.patient_id, case.step, case.max_steps
        );
        if case.remaining_steps() == 0 {
            prompt.push_str("This is the last step: you must give a Final Answer now.\n");
        }
        for entry in scratchpad.entries() {
            let _ = write!(
                prompt,
                "\nStep {}:\nThought: {}\nAction: {}\nObservation: {}\n",
                entry.step,
                entry.thought,
                entry.action.render(),
                entry.observation.summary()
            );
        }
        prompt
    }
}

#[async_trait]
impl ReasoningEngine for LlmReasoner {
    fn name(&self) -> &str {
        "llm"
    }

    async fn propose(
        &self,
        scratchpad: &Scratchpad,
        case: &CaseContext,
        tools: &[ToolSpec],
    ) -> Result<Proposal, ReasoningError> {
        let url = format!("{}/chat/completions", self.api_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": Self::system_prompt(tools) },
                { "role": "user", "content": Self::user_prompt(scratchpad, case) },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stop": [STOP_SEQUENCE],
            "stream": false,
        });

        debug!(model = %self.model, session_id = %case.session_id, step = case.step, "Requesting reasoning step");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| ReasoningError::Unavailable {
            message: format!("request failed: {e}"),
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(ReasoningError::Unavailable {
                message: "rate limited".into(),
            });
        }
        if status == 401 || status == 403 {
            return Err(ReasoningError::Unavailable {
                message: "invalid API key or insufficient permissions".into(),
            });
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Reasoning endpoint returned error");
            return Err(ReasoningError::Unavailable {
                message: format!("HTTP {status}: {error_body}"),
            });
        }

        let api_response: ApiResponse =
            response
                .json()
                .await
                .map_err(|e| ReasoningError::Unparsable {
                    message: format!("failed to parse response: {e}"),
                })?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ReasoningError::Unparsable {
                message: "no content in response".into(),
            })?;

        parse_response(&content)
    }
}

// ── Wire types ──

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}
