//! Usage: Pure state reducer folding domain events into `RootState`, plus run creation.
//!
//! Status machine: `created -> streaming -> completed | errored | aborted`.
//! Terminal statuses are sticky: events for a terminal (or unknown) run are ignored.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use super::events::{DomainEvent, MediaRef, MetaFields, ToolCallFragment, UsageMap};
use super::projection::resolve_visibility;
use super::state::{
    ContentBlock, Message, MessageRole, ReasoningVisibility, RootState, Run, RunStatus,
    StoredReasoningDetail, ToolCall,
};

const REASONING_ENCRYPTED_TYPE: &str = "reasoning.encrypted";

#[derive(Debug, Clone, Default)]
pub struct StartGeneration {
    pub model: String,
    pub request_id: Option<String>,
    pub reasoning_policy: Option<ReasoningVisibility>,
    /// Optional user prompt recorded ahead of the assistant message in the run's order.
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationHandle {
    pub run_id: String,
    pub request_id: String,
    pub assistant_message_id: String,
    pub prompt_message_id: Option<String>,
}

impl GenerationHandle {
    pub fn generate(request_id: Option<String>, with_prompt: bool) -> Self {
        Self {
            run_id: new_id("run"),
            request_id: request_id
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| new_id("req")),
            assistant_message_id: new_id("msg"),
            prompt_message_id: with_prompt.then(|| new_id("msg")),
        }
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// Creates a run in `created` status before any network activity.
pub fn start_generation(state: RootState, params: StartGeneration) -> (RootState, GenerationHandle) {
    let handle = GenerationHandle::generate(params.request_id.clone(), params.prompt.is_some());
    let state = start_generation_with(state, params, &handle);
    (state, handle)
}

/// Same as [`start_generation`] with caller-chosen identifiers.
pub fn start_generation_with(
    mut state: RootState,
    params: StartGeneration,
    handle: &GenerationHandle,
) -> RootState {
    if state.runs.contains_key(&handle.run_id) {
        tracing::warn!(run_id = %handle.run_id, "start_generation ignored: run already exists");
        return state;
    }
    let ids_taken = std::iter::once(&handle.assistant_message_id)
        .chain(handle.prompt_message_id.as_ref())
        .any(|id| state.messages.contains_key(id));
    if ids_taken {
        tracing::warn!(run_id = %handle.run_id, "start_generation ignored: message id already exists");
        return state;
    }

    let mut order = Vec::with_capacity(2);

    if let (Some(prompt_id), Some(prompt)) = (&handle.prompt_message_id, params.prompt) {
        let mut message = Message::new(prompt_id.clone(), MessageRole::User);
        message.content.push(ContentBlock::Text { text: prompt });
        message.is_complete = true;
        state.messages.insert(prompt_id.clone(), message);
        order.push(prompt_id.clone());
    }

    let mut assistant = Message::new(handle.assistant_message_id.clone(), MessageRole::Assistant);
    assistant.is_target = true;
    assistant.reasoning.visibility = resolve_visibility(params.reasoning_policy, None, false);
    state
        .messages
        .insert(handle.assistant_message_id.clone(), assistant);
    order.push(handle.assistant_message_id.clone());

    state.runs.insert(
        handle.run_id.clone(),
        Run {
            run_id: handle.run_id.clone(),
            request_id: handle.request_id.clone(),
            model: params.model,
            assistant_message_id: handle.assistant_message_id.clone(),
            status: RunStatus::Created,
            generation_id: None,
            model_resolved: None,
            provider: None,
            finish_reason: None,
            usage: UsageMap::new(),
            error: None,
            abort_reason: None,
            reasoning_policy: params.reasoning_policy,
        },
    );
    state.run_messages.insert(handle.run_id.clone(), order);

    tracing::debug!(
        run_id = %handle.run_id,
        request_id = %handle.request_id,
        "generation run created"
    );
    state
}

/// Folds `events` (in order) into `state` for `run_id`.
pub fn reduce(mut state: RootState, run_id: &str, events: &[DomainEvent]) -> RootState {
    for event in events {
        apply_event(&mut state, run_id, event);
    }
    state
}

/// Applies one event in place. Returns `false` when the event was ignored
/// (unknown run, run already terminal, or a message owned by another run).
pub fn apply_event(state: &mut RootState, run_id: &str, event: &DomainEvent) -> bool {
    let RootState {
        runs,
        messages,
        run_messages,
    } = state;

    let Some(run) = runs.get_mut(run_id) else {
        tracing::debug!(run_id, event = event.kind(), "event for unknown run ignored");
        return false;
    };
    if run.status.is_terminal() {
        tracing::debug!(
            run_id,
            status = run.status.as_str(),
            event = event.kind(),
            "event for terminal run ignored"
        );
        return false;
    }

    let order = run_messages.entry(run_id.to_string()).or_default();

    if let Some(message_id) = event.message_id() {
        if messages.contains_key(message_id) && !order.iter().any(|id| id == message_id) {
            tracing::debug!(
                run_id,
                message_id,
                event = event.kind(),
                "event for a message owned by another run ignored"
            );
            return false;
        }
    }

    match event {
        DomainEvent::StreamComment { .. } => mark_streaming(run),
        DomainEvent::StreamDone => {
            run.status = RunStatus::Completed;
            complete_messages(messages, order);
        }
        DomainEvent::StreamAbort { reason } => {
            run.status = RunStatus::Aborted;
            run.abort_reason = Some(reason.clone());
            complete_messages(messages, order);
        }
        DomainEvent::StreamError { error } => {
            run.status = RunStatus::Errored;
            run.error = Some(error.clone());
            complete_messages(messages, order);
        }
        DomainEvent::MessageDeltaText { message_id, text } => {
            mark_streaming(run);
            if !text.is_empty() {
                append_text(message_mut(messages, order, message_id), text);
            }
        }
        DomainEvent::ReasoningDeltaText { message_id, text } => {
            mark_streaming(run);
            if !text.is_empty() {
                let message = message_mut(messages, order, message_id);
                message.reasoning.text.push_str(text);
                refresh_visibility(run, message);
            }
        }
        DomainEvent::ReasoningDetail {
            message_id,
            detail,
            identity_key,
        } => {
            mark_streaming(run);
            let message = message_mut(messages, order, message_id);
            apply_reasoning_detail(message, detail, identity_key);
            refresh_visibility(run, message);
        }
        DomainEvent::ReasoningSummary {
            message_id,
            summary,
        } => {
            mark_streaming(run);
            let message = message_mut(messages, order, message_id);
            message.reasoning.summary = Some(summary.clone());
            refresh_visibility(run, message);
        }
        DomainEvent::MediaDelta { message_id, media } => {
            mark_streaming(run);
            append_media(message_mut(messages, order, message_id), media);
        }
        DomainEvent::UsageDelta { usage } => {
            mark_streaming(run);
            merge_usage(&mut run.usage, usage);
        }
        DomainEvent::MetaDelta { fields } => {
            mark_streaming(run);
            apply_meta(run, fields);
        }
        DomainEvent::ToolCallDelta {
            message_id,
            fragment,
        } => {
            mark_streaming(run);
            merge_tool_call(message_mut(messages, order, message_id), fragment);
        }
    }

    true
}

fn mark_streaming(run: &mut Run) {
    if run.status == RunStatus::Created {
        run.status = RunStatus::Streaming;
    }
}

fn complete_messages(messages: &mut BTreeMap<String, Message>, order: &[String]) {
    for id in order {
        if let Some(message) = messages.get_mut(id) {
            if message.is_target {
                message.is_complete = true;
            }
        }
    }
}

/// Looks up a message of this run, creating an assistant message (appended to the run order) if unknown.
fn message_mut<'a>(
    messages: &'a mut BTreeMap<String, Message>,
    order: &mut Vec<String>,
    message_id: &str,
) -> &'a mut Message {
    if !order.iter().any(|id| id == message_id) {
        order.push(message_id.to_string());
    }
    messages.entry(message_id.to_string()).or_insert_with(|| {
        let mut message = Message::new(message_id, MessageRole::Assistant);
        message.is_target = true;
        message
    })
}

fn append_text(message: &mut Message, text: &str) {
    if let Some(ContentBlock::Text { text: last }) = message.content.last_mut() {
        last.push_str(text);
        return;
    }
    message.content.push(ContentBlock::Text {
        text: text.to_string(),
    });
}

fn append_media(message: &mut Message, media: &MediaRef) {
    let seen = message.content.iter().any(|block| {
        matches!(block, ContentBlock::Image { media: existing } if existing.url == media.url)
    });
    if !seen {
        message.content.push(ContentBlock::Image {
            media: media.clone(),
        });
    }
}

fn apply_reasoning_detail(message: &mut Message, detail: &Value, identity_key: &str) {
    if message.reasoning.contains_detail(identity_key) {
        tracing::debug!(
            message_id = %message.id,
            identity_key,
            "duplicate reasoning detail dropped"
        );
        return;
    }
    if is_excluded_detail(detail) {
        message.reasoning.has_excluded_content = true;
    }
    message.reasoning.details.push(StoredReasoningDetail {
        identity_key: identity_key.to_string(),
        detail: detail.clone(),
    });
}

fn is_excluded_detail(detail: &Value) -> bool {
    let detail_type = detail.get("type").and_then(Value::as_str);
    if detail_type == Some(REASONING_ENCRYPTED_TYPE) {
        return true;
    }
    detail.get("data").is_some() && detail.get("text").is_none() && detail.get("summary").is_none()
}

fn refresh_visibility(run: &Run, message: &mut Message) {
    message.reasoning.visibility =
        resolve_visibility(run.reasoning_policy, None, message.reasoning.has_content());
}

/// Key-wise merge; later values win per key, unrelated keys survive.
pub fn merge_usage(target: &mut UsageMap, delta: &UsageMap) {
    for (key, value) in delta {
        target.insert(key.clone(), value.clone());
    }
}

fn apply_meta(run: &mut Run, fields: &MetaFields) {
    fn set_once(slot: &mut Option<String>, value: &Option<String>) {
        if slot.is_none() {
            if let Some(v) = value.as_ref().filter(|v| !v.is_empty()) {
                *slot = Some(v.clone());
            }
        }
    }

    set_once(&mut run.generation_id, &fields.generation_id);
    set_once(&mut run.model_resolved, &fields.model);
    set_once(&mut run.provider, &fields.provider);
    set_once(&mut run.finish_reason, &fields.finish_reason);
}

fn merge_tool_call(message: &mut Message, fragment: &ToolCallFragment) {
    let position = message
        .tool_calls
        .iter()
        .position(|call| call.index == fragment.index);
    let call = match position {
        Some(idx) => &mut message.tool_calls[idx],
        None => {
            message.tool_calls.push(ToolCall {
                index: fragment.index,
                ..ToolCall::default()
            });
            let last = message.tool_calls.len() - 1;
            &mut message.tool_calls[last]
        }
    };

    if call.id.is_none() {
        call.id = fragment.id.clone();
    }
    if call.name.is_none() {
        call.name = fragment.name.clone();
    }
    if let Some(arguments) = fragment.arguments.as_deref() {
        call.arguments.push_str(arguments);
    }
}
