// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! `cognition`: a single LLM round trip, optionally
//! schema-constrained with one retry on a format/validation failure.

use std::time::Duration;

use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::schema::{self, Schema};
use crate::workflow::CognitionNode;

const MAX_ATTEMPTS_WITH_SCHEMA: u32 = 2;
const MAX_ATTEMPTS_WITHOUT_SCHEMA: u32 = 1;
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Ceiling for a single LLM round trip.
const COGNITION_TIMEOUT: Duration = Duration::from_secs(60);

fn build_system_prompt(schema: Option<&Schema>) -> String {
    match schema {
        Some(schema) => {
            let exemplar = schema::example_value(schema);
            let exemplar = serde_json::to_string(&exemplar).unwrap_or_else(|_| "{}".to_string());
            format!(
                "Respond with a single JSON value and nothing else. It must match this shape:\n{}\n\nExample of a well-formed response: {exemplar}",
                schema::describe(schema)
            )
        }
        None => {
            "Respond with a single JSON value and nothing else. For example: {\"answer\": \"...\"}"
                .to_string()
        }
    }
}

/// Strips a surrounding ```` ``` ```` / ```` ```json ```` code fence, if present.
fn clean_llm_output(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.strip_prefix('\n').unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Finds the first balanced `{...}` or `[...]` substring, respecting quoted
/// strings and escapes, without assuming the rest of `s` is itself valid
/// JSON (models sometimes wrap a JSON value in prose).
fn find_balanced(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let start = s.find(['{', '['])?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return s.get(start..=i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses `cleaned` as JSON directly; on failure, falls back to the first
/// balanced bracketed substring.
fn parse_json_lenient(cleaned: &str) -> std::result::Result<Value, String> {
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Ok(value);
    }
    match find_balanced(cleaned) {
        Some(candidate) => serde_json::from_str(candidate)
            .map_err(|e| format!("could not parse LLM output as JSON: {e}")),
        None => Err("LLM output contained no JSON value".to_string()),
    }
}

/// Executes one `cognition` node.
pub async fn execute(dispatcher: &Dispatcher, node: &CognitionNode) -> Result<Value> {
    let prompt = dispatcher.state().resolve_template(&node.prompt);
    let input = node.input.as_ref().map(|v| dispatcher.resolve(v));
    let parsed_schema = node.schema.as_ref().map(Schema::from_value);
    let system = build_system_prompt(parsed_schema.as_ref());

    let mut user = prompt;
    if let Some(input) = &input {
        let rendered = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
        user = format!("{user}\n\nInput:\n{rendered}");
    }

    let max_attempts = if parsed_schema.is_some() {
        MAX_ATTEMPTS_WITH_SCHEMA
    } else {
        MAX_ATTEMPTS_WITHOUT_SCHEMA
    };

    let mut last_diagnostic = String::new();
    for attempt in 0..max_attempts {
        dispatcher.cancellation().check()?;
        let mut this_user = user.clone();
        if attempt > 0 {
            this_user = format!(
                "{this_user}\n\nThe previous attempt failed: {last_diagnostic}. Respond again, matching the required shape exactly."
            );
        }
        let raw = tokio::time::timeout(
            COGNITION_TIMEOUT,
            dispatcher
                .llm()
                .chat(&system, &this_user, node.model.as_deref(), DEFAULT_TEMPERATURE),
        )
        .await
        .map_err(|_| Error::CognitionTimeout)??;
        let cleaned = clean_llm_output(&raw);
        match parse_json_lenient(cleaned) {
            Ok(value) => {
                if let Some(parsed_schema) = &parsed_schema {
                    match schema::validate(parsed_schema, &value) {
                        Ok(()) => {
                            if let Some(output) = &node.output {
                                dispatcher.set_by_path(output, value.clone());
                            }
                            return Ok(value);
                        }
                        Err(diagnostic) => last_diagnostic = diagnostic,
                    }
                } else {
                    if let Some(output) = &node.output {
                        dispatcher.set_by_path(output, value.clone());
                    }
                    return Ok(value);
                }
            }
            Err(diagnostic) => last_diagnostic = diagnostic,
        }
    }
    Err(Error::CognitionFormatError(last_diagnostic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_llm_output_strips_fenced_json() {
        assert_eq!(clean_llm_output("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(clean_llm_output("```\n[1,2]\n```"), "[1,2]");
        assert_eq!(clean_llm_output("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn parse_json_lenient_accepts_well_formed_json() {
        assert_eq!(parse_json_lenient("{\"a\": 1}").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn parse_json_lenient_extracts_balanced_braces_from_prose() {
        let raw = "Sure, here you go: {\"label\": \"spam\", \"note\": \"uses {braces} in text\"} thanks!";
        let value = parse_json_lenient(raw).unwrap();
        assert_eq!(value["label"], json!("spam"));
    }

    #[test]
    fn parse_json_lenient_rejects_non_json_prose() {
        assert!(parse_json_lenient("sorry, I can't help with that").is_err());
    }

    #[test]
    fn build_system_prompt_describes_schema_fields() {
        let schema = Schema::from_value(&json!({"label": "string"}));
        let prompt = build_system_prompt(Some(&schema));
        assert!(prompt.contains("label"));
    }

    #[test]
    fn build_system_prompt_includes_a_worked_example() {
        let schema = Schema::from_value(&json!({"label": "string"}));
        let prompt = build_system_prompt(Some(&schema));
        assert!(prompt.contains("Example"));
        assert!(prompt.contains("\"label\":\"example\""));
    }
}
