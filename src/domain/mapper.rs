//! Usage: Chunk mapper (one decoded JSON frame -> ordered domain events).
//!
//! Output order for one frame is fixed:
//! meta, reasoning details (array order), reasoning summary, reasoning text,
//! message text, media, tool-call fragments, usage.
//! A frame carrying one of the known error shapes yields exactly one `StreamError`
//! and nothing else.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::events::{DomainEvent, MediaRef, MetaFields, ToolCallFragment};
use crate::protocol::detect_stream_error;

const REASONING_SUMMARY_TYPE: &str = "reasoning.summary";

// Every wire field is lenient: a known field with an unexpected type reads as
// absent instead of failing the whole frame.
#[derive(Debug, Default, Deserialize)]
struct WireFrame {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    provider: Option<String>,
    #[serde(default, deserialize_with = "lenient_items")]
    choices: Option<Vec<WireChoice>>,
    #[serde(default, deserialize_with = "lenient")]
    usage: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChoice {
    #[serde(default, deserialize_with = "lenient")]
    delta: Option<WireDelta>,
    /// Some providers send the final (non-delta) message shape on the last frame.
    #[serde(default, deserialize_with = "lenient")]
    message: Option<WireDelta>,
    #[serde(default, deserialize_with = "lenient")]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default, deserialize_with = "lenient")]
    content: Option<WireContent>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning_content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning_details: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning_summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    images: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_items")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<Value>),
}

#[derive(Debug, Default, Deserialize)]
struct WireToolCall {
    #[serde(default, deserialize_with = "lenient")]
    index: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    function: Option<WireFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunction {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    arguments: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(T::deserialize(value).ok())
}

/// Array field whose unreadable entries are dropped one by one.
fn lenient_items<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(Some(
        items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
    ))
}

/// Maps one frame into zero or more events targeting `message_id`.
pub fn map_frame(frame: &Value, message_id: &str) -> Vec<DomainEvent> {
    if let Some(error) = detect_stream_error(frame) {
        return vec![DomainEvent::StreamError { error }];
    }

    let wire = match WireFrame::deserialize(frame) {
        Ok(wire) => wire,
        Err(err) => {
            tracing::warn!(error = %err, "stream frame shape not recognized, skipped");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    let choice = wire
        .choices
        .as_ref()
        .and_then(|choices| choices.first());
    let delta = choice.and_then(|c| c.delta.as_ref().or(c.message.as_ref()));

    let meta = MetaFields {
        generation_id: non_empty(wire.id.as_deref()),
        model: non_empty(wire.model.as_deref()),
        provider: non_empty(wire.provider.as_deref()),
        finish_reason: non_empty(choice.and_then(|c| c.finish_reason.as_deref())),
    };
    if !meta.is_empty() {
        out.push(DomainEvent::MetaDelta { fields: meta });
    }

    if let Some(delta) = delta {
        map_delta(delta, message_id, &mut out);
    }

    if let Some(usage) = wire.usage.filter(|usage| !usage.is_empty()) {
        out.push(DomainEvent::UsageDelta { usage });
    }

    out
}

fn map_delta(delta: &WireDelta, message_id: &str, out: &mut Vec<DomainEvent>) {
    let details = delta.reasoning_details.as_deref().unwrap_or_default();
    for detail in details.iter().filter(|d| d.is_object()) {
        out.push(DomainEvent::ReasoningDetail {
            message_id: message_id.to_string(),
            detail: detail.clone(),
            identity_key: reasoning_identity_key(detail),
        });
    }

    let summary = non_empty(delta.reasoning_summary.as_deref()).or_else(|| {
        details
            .iter()
            .rev()
            .filter(|d| d.get("type").and_then(Value::as_str) == Some(REASONING_SUMMARY_TYPE))
            .find_map(|d| non_empty(d.get("summary").and_then(Value::as_str)))
    });
    if let Some(summary) = summary {
        out.push(DomainEvent::ReasoningSummary {
            message_id: message_id.to_string(),
            summary,
        });
    }

    let reasoning_text = delta
        .reasoning
        .as_deref()
        .or(delta.reasoning_content.as_deref())
        .filter(|text| !text.is_empty());
    if let Some(text) = reasoning_text {
        out.push(DomainEvent::ReasoningDeltaText {
            message_id: message_id.to_string(),
            text: text.to_string(),
        });
    }

    let mut media = Vec::new();
    match &delta.content {
        Some(WireContent::Text(text)) if !text.is_empty() => {
            out.push(DomainEvent::MessageDeltaText {
                message_id: message_id.to_string(),
                text: text.clone(),
            });
        }
        Some(WireContent::Parts(parts)) => {
            let text: String = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if !text.is_empty() {
                out.push(DomainEvent::MessageDeltaText {
                    message_id: message_id.to_string(),
                    text,
                });
            }
            media.extend(
                parts
                    .iter()
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("image_url"))
                    .filter_map(media_ref),
            );
        }
        _ => {}
    }
    media.extend(
        delta
            .images
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(media_ref),
    );
    let mut seen_urls = std::collections::HashSet::new();
    for media in media {
        if seen_urls.insert(media.url.clone()) {
            out.push(DomainEvent::MediaDelta {
                message_id: message_id.to_string(),
                media,
            });
        }
    }

    let tool_calls = delta.tool_calls.as_deref().unwrap_or_default();
    for (position, call) in tool_calls.iter().enumerate() {
        let function = call.function.as_ref();
        let fragment = ToolCallFragment {
            index: call.index.unwrap_or(position as u32),
            id: non_empty(call.id.as_deref()),
            name: non_empty(function.and_then(|f| f.name.as_deref())),
            arguments: function
                .and_then(|f| f.arguments.clone())
                .filter(|args| !args.is_empty()),
        };
        out.push(DomainEvent::ToolCallDelta {
            message_id: message_id.to_string(),
            fragment,
        });
    }
}

/// Upstream `id` when present, else a sha256 fingerprint of the canonical JSON.
pub fn reasoning_identity_key(detail: &Value) -> String {
    if let Some(id) = non_empty(detail.get("id").and_then(Value::as_str)) {
        return id;
    }
    // serde_json maps are key-sorted, so the serialized form is canonical.
    let canonical = serde_json::to_string(detail).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("sha256:{digest:x}")
}

fn media_ref(value: &Value) -> Option<MediaRef> {
    let url = match value {
        Value::String(url) => Some(url.as_str()),
        Value::Object(obj) => obj
            .get("image_url")
            .and_then(|image| match image {
                Value::String(url) => Some(url.as_str()),
                other => other.get("url").and_then(Value::as_str),
            })
            .or_else(|| obj.get("url").and_then(Value::as_str)),
        _ => None,
    }?;
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    Some(MediaRef {
        url: url.to_string(),
        mime_type: data_url_mime_type(url),
    })
}

fn data_url_mime_type(url: &str) -> Option<String> {
    let rest = url.strip_prefix("data:")?;
    let end = rest.find([';', ','])?;
    non_empty(Some(&rest[..end]))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
