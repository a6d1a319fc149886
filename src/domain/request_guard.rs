//! Usage: Boundary checks on an externally built chat-completions request body.
//!
//! The body itself is opaque to the transport; only the flags the stream
//! pipeline depends on are checked here.

use serde_json::Value;

/// Effort value that expresses "reasoning disabled".
pub const REASONING_DISABLED_EFFORT: &str = "none";

const REASONING_MODES: [&str; 3] = ["effort", "max_tokens", "enabled"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestBodyViolation {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("`stream` must be an explicit boolean")]
    StreamFlag,
    #[error("usage reporting flag must be an explicit boolean")]
    UsageFlag,
    #[error("`reasoning` must be an object")]
    ReasoningShape,
    #[error("reasoning effort \"none\" must not be combined with `max_tokens`")]
    DisabledWithBudget,
    #[error("reasoning sets more than one control mode: {0}")]
    ConflictingReasoningModes(String),
    #[error("reasoning must be disabled with effort \"none\", not `enabled: false`")]
    DisabledViaEnabledFlag,
    #[error("reasoning `{field}` has an invalid value")]
    ReasoningValue { field: &'static str },
}

pub fn validate_request_body(body: &Value) -> Result<(), RequestBodyViolation> {
    let obj = body.as_object().ok_or(RequestBodyViolation::NotAnObject)?;

    if !obj.get("stream").is_some_and(Value::is_boolean) {
        return Err(RequestBodyViolation::StreamFlag);
    }

    let usage_flag = obj
        .get("usage")
        .map(|usage| usage.get("include"))
        .or_else(|| {
            obj.get("stream_options")
                .map(|opts| opts.get("include_usage"))
        });
    match usage_flag {
        Some(Some(flag)) if flag.is_boolean() => {}
        _ => return Err(RequestBodyViolation::UsageFlag),
    }

    match obj.get("reasoning") {
        None | Some(Value::Null) => Ok(()),
        Some(reasoning) => validate_reasoning(reasoning),
    }
}

fn validate_reasoning(reasoning: &Value) -> Result<(), RequestBodyViolation> {
    let obj = reasoning
        .as_object()
        .ok_or(RequestBodyViolation::ReasoningShape)?;

    let effort = obj.get("effort").filter(|v| !v.is_null());
    let max_tokens = obj.get("max_tokens").filter(|v| !v.is_null());
    let enabled = obj.get("enabled").filter(|v| !v.is_null());

    if let Some(effort) = effort {
        if !effort.as_str().is_some_and(|s| !s.trim().is_empty()) {
            return Err(RequestBodyViolation::ReasoningValue { field: "effort" });
        }
    }
    if max_tokens.is_some_and(|v| !v.is_u64()) {
        return Err(RequestBodyViolation::ReasoningValue {
            field: "max_tokens",
        });
    }
    if enabled.is_some_and(|v| !v.is_boolean()) {
        return Err(RequestBodyViolation::ReasoningValue { field: "enabled" });
    }

    let disabled = effort.and_then(Value::as_str) == Some(REASONING_DISABLED_EFFORT);
    if disabled && max_tokens.is_some() {
        return Err(RequestBodyViolation::DisabledWithBudget);
    }

    let modes: Vec<&str> = REASONING_MODES
        .iter()
        .copied()
        .filter(|mode| obj.get(*mode).is_some_and(|v| !v.is_null()))
        .collect();
    if modes.len() > 1 {
        return Err(RequestBodyViolation::ConflictingReasoningModes(
            modes.join(", "),
        ));
    }

    if enabled.and_then(Value::as_bool) == Some(false) {
        return Err(RequestBodyViolation::DisabledViaEnabledFlag);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(reasoning: Value) -> Value {
        json!({
            "model": "openai/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "usage": {"include": true},
            "reasoning": reasoning,
        })
    }

    #[test]
    fn accepts_each_single_reasoning_mode() {
        assert_eq!(validate_request_body(&body(Value::Null)), Ok(()));
        assert_eq!(validate_request_body(&body(json!({"effort": "high"}))), Ok(()));
        assert_eq!(validate_request_body(&body(json!({"effort": "none"}))), Ok(()));
        assert_eq!(validate_request_body(&body(json!({"max_tokens": 2048}))), Ok(()));
        assert_eq!(
            validate_request_body(&body(json!({"enabled": true, "exclude": false}))),
            Ok(())
        );
    }

    #[test]
    fn rejects_disabled_sentinel_with_budget() {
        assert_eq!(
            validate_request_body(&body(json!({"effort": "none", "max_tokens": 1000}))),
            Err(RequestBodyViolation::DisabledWithBudget)
        );
    }

    #[test]
    fn rejects_conflicting_modes_and_enabled_false() {
        assert!(matches!(
            validate_request_body(&body(json!({"effort": "low", "enabled": true}))),
            Err(RequestBodyViolation::ConflictingReasoningModes(modes)) if modes == "effort, enabled"
        ));
        assert_eq!(
            validate_request_body(&body(json!({"enabled": false}))),
            Err(RequestBodyViolation::DisabledViaEnabledFlag)
        );
    }

    #[test]
    fn stream_and_usage_flags_must_be_explicit_booleans() {
        let missing_stream = json!({"usage": {"include": true}});
        assert_eq!(
            validate_request_body(&missing_stream),
            Err(RequestBodyViolation::StreamFlag)
        );

        let string_stream = json!({"stream": "true", "usage": {"include": true}});
        assert_eq!(
            validate_request_body(&string_stream),
            Err(RequestBodyViolation::StreamFlag)
        );

        let missing_usage = json!({"stream": true});
        assert_eq!(
            validate_request_body(&missing_usage),
            Err(RequestBodyViolation::UsageFlag)
        );

        let stream_options = json!({"stream": false, "stream_options": {"include_usage": false}});
        assert_eq!(validate_request_body(&stream_options), Ok(()));

        assert_eq!(
            validate_request_body(&json!([])),
            Err(RequestBodyViolation::NotAnObject)
        );
    }
}
