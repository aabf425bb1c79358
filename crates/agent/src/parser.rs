//! Parser for text-mode reasoning output.
//!
//! A language model answers in one of two shapes:
//!
//! ```text
//! Thought: I need the baseline risk.
//! Action: predict_risk({"patientId": "P-100"})
//! ```
//!
//! ```text
//! Thought: I have enough evidence.
//! Final Answer: {"summary": "...", "recommendations": [...]}
//! ```
//!
//! Action arguments may also be written as keywords:
//! `explain(patientId="P-100", riskScore=0.82)`.

use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use vertexcare_core::tool::Arguments;
use vertexcare_core::{PlanDraft, Proposal, ReasoningError, ToolInvocation};

const FINAL_ANSWER: &str = "Final Answer:";

type Pattern = LazyLock<Result<Regex, regex_lite::Error>>;

static ACTION_RE: Pattern = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Action:\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$")
});
static THOUGHT_RE: Pattern =
    LazyLock::new(|| Regex::new(r"(?s)Thought:(.*?)(?:Action:|Final Answer:|$)"));

/// Parse one model response into a proposal.
pub fn parse_response(text: &str) -> Result<Proposal, ReasoningError> {
    let thought = thought(text)?;

    if let Some(idx) = text.find(FINAL_ANSWER) {
        let body = &text[idx + FINAL_ANSWER.len()..];
        let draft: PlanDraft = serde_json::from_str(json_object(body)?)
            .map_err(|e| unparsable(format!("final answer is not a valid plan: {e}")))?;
        return Ok(Proposal::finish(thought, draft));
    }

    let caps = compiled(&ACTION_RE)?
        .captures(text)
        .ok_or_else(|| unparsable("response has neither an Action nor a Final Answer"))?;
    let tool = caps.get(1).map_or("", |m| m.as_str());
    let raw_args = caps.get(2).map_or("", |m| m.as_str()).trim();

    let mut invocation = ToolInvocation::new(tool);
    invocation.arguments = parse_arguments(raw_args)?;
    Ok(Proposal::invoke(thought, invocation))
}

fn thought(text: &str) -> Result<String, ReasoningError> {
    Ok(compiled(&THOUGHT_RE)?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default())
}

/// Arguments as a JSON object, keywords, or nothing.
fn parse_arguments(raw: &str) -> Result<Arguments, ReasoningError> {
    if raw.is_empty() {
        return Ok(Arguments::new());
    }
    if raw.starts_with('{') {
        return match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(unparsable("action arguments must be an object")),
            Err(e) => Err(unparsable(format!("action arguments are not valid JSON: {e}"))),
        };
    }

    let mut arguments = Arguments::new();
    for pair in raw.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| unparsable(format!("expected key=value, got '{}'", pair.trim())))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(unparsable("empty argument name"));
        }
        arguments.insert(key.to_string(), keyword_value(value.trim()));
    }
    Ok(arguments)
}

/// JSON literal when it parses (numbers, quoted strings, booleans),
/// otherwise the bare text.
fn keyword_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        Value::String(raw.trim_matches(|c| c == '\'' || c == '"').to_string())
    })
}

/// The outermost `{...}` in `body`, ignoring code fences.
fn json_object(body: &str) -> Result<&str, ReasoningError> {
    let start = body.find('{');
    let end = body.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&body[start..=end]),
        _ => Err(unparsable("final answer contains no JSON object")),
    }
}

fn compiled(pattern: &'static Pattern) -> Result<&'static Regex, ReasoningError> {
    LazyLock::force(pattern)
        .as_ref()
        .map_err(|e| unparsable(format!("bad pattern: {e}")))
}

fn unparsable(message: impl Into<String>) -> ReasoningError {
    ReasoningError::Unparsable {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertexcare_core::{NextAction, Priority};

    fn invocation(p: Proposal) -> ToolInvocation {
        match p.next {
            NextAction::Invoke(inv) => inv,
            other => panic!("Expected an invocation, got {other:?}"),
        }
    }

    #[test]
    fn json_action() {
        let p = parse_response(
            "Thought: I need the baseline risk.\nAction: predict_risk({\"patientId\": \"P-100\"})\n",
        )
        .unwrap();
        assert_eq!(p.thought, "I need the baseline risk.");
        let inv = invocation(p);
        assert_eq!(inv.tool, "predict_risk");
        assert_eq!(inv.arguments["patientId"], "P-100");
    }

    #[test]
    fn keyword_action() {
        let inv = invocation(
            parse_response("Thought: drivers\nAction: explain(patientId=\"P-100\", riskScore=0.82, topK=2)")
                .unwrap(),
        );
        assert_eq!(inv.tool, "explain");
        assert_eq!(inv.arguments["patientId"], "P-100");
        assert_eq!(inv.arguments["riskScore"], 0.82);
        assert_eq!(inv.arguments["topK"], 2);
    }

    #[test]
    fn patterns_compile_once_and_are_reused() {
        assert!(ACTION_RE.is_ok());
        assert!(THOUGHT_RE.is_ok());
        let first = compiled(&ACTION_RE).unwrap() as *const Regex;
        for patient in ["P-100", "P-200", "3"] {
            let text = format!("Thought: next\nAction: predict_risk(patientId={patient})");
            assert_eq!(invocation(parse_response(&text).unwrap()).arguments["patientId"], patient);
        }
        assert_eq!(compiled(&ACTION_RE).unwrap() as *const Regex, first);
    }

    #[test]
    fn bare_keyword_values_are_strings() {
        let inv = invocation(parse_response("Action: fetch_notes(patientId=P-100)").unwrap());
        assert_eq!(inv.arguments["patientId"], "P-100");
    }

    #[test]
    fn text_after_the_action_line_is_ignored() {
        let inv = invocation(
            parse_response(
                "Thought: go\nAction: predict_risk({\"patientId\": \"1\"})\nObservation: made up",
            )
            .unwrap(),
        );
        assert_eq!(inv.arguments.len(), 1);
    }

    #[test]
    fn fenced_final_answer() {
        let text = r#"Thought: Enough evidence.
Final Answer:
```json
{
  "summary": "High risk",
  "riskScore": 0.82,
  "recommendations": [
    {"action": "Arrange medical transport immediately.", "rationale": "transport", "priority": "High", "evidence": [2]}
  ]
}
```"#;
        let p = parse_response(text).unwrap();
        assert_eq!(p.thought, "Enough evidence.");
        match p.next {
            NextAction::Finish(draft) => {
                assert_eq!(draft.risk_score, Some(0.82));
                assert_eq!(draft.recommendations[0].priority, Priority::High);
                assert_eq!(draft.recommendations[0].evidence, vec![2]);
            }
            other => panic!("Expected a plan, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_unparsable() {
        for text in [
            "I think we should call the model",
            "Action: predict_risk({not json})",
            "Action: predict_risk([1, 2])",
            "Action: explain(patientId)",
            "Final Answer: nothing structured",
            "Final Answer: {\"recommendations\": \"none\"}",
        ] {
            assert!(
                matches!(parse_response(text), Err(ReasoningError::Unparsable { .. })),
                "{text}"
            );
        }
    }
}
