//! Usage: Pure projection of reducer state into a "current view" of one run.
//!
//! Resolution order for reasoning visibility: explicit per-run policy, then the
//! legacy per-conversation preference, then `Visible` when any reasoning content
//! arrived, else `Off` (no reasoning record attached).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::{MediaRef, StreamErrorInfo, UsageMap};
use super::state::{
    ReasoningView, ReasoningVisibility, RootState, RunStatus, StoredReasoningDetail, ToolCall,
};

const SUMMARY_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionOptions {
    pub legacy_preference: Option<ReasoningVisibility>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningRecord {
    pub visibility: ReasoningVisibility,
    pub summary: String,
    pub summary_synthesized: bool,
    pub text: String,
    pub details: Vec<StoredReasoningDetail>,
    pub has_excluded_content: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub run_id: String,
    pub status: RunStatus,
    pub generation_id: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: UsageMap,
    pub error: Option<StreamErrorInfo>,
    pub abort_reason: Option<String>,
    pub text: String,
    pub reasoning_text: String,
    pub reasoning_details: Vec<StoredReasoningDetail>,
    pub reasoning_summary: Option<String>,
    pub media: Vec<MediaRef>,
    pub tool_calls: Vec<ToolCall>,
    /// Final reasoning record; `None` when visibility resolves to `Off`.
    pub reasoning: Option<ReasoningRecord>,
}

pub fn resolve_visibility(
    explicit: Option<ReasoningVisibility>,
    legacy_preference: Option<ReasoningVisibility>,
    reasoning_received: bool,
) -> ReasoningVisibility {
    if let Some(visibility) = explicit {
        return visibility;
    }
    if let Some(visibility) = legacy_preference {
        return visibility;
    }
    if reasoning_received {
        ReasoningVisibility::Visible
    } else {
        ReasoningVisibility::Off
    }
}

pub fn project_run(state: &RootState, run_id: &str, options: ProjectionOptions) -> Option<RunView> {
    let run = state.run(run_id)?;
    let message = state.message(&run.assistant_message_id);

    let (text, media, tool_calls, reasoning) = match message {
        Some(message) => (
            message.text(),
            message.media(),
            message.tool_calls.clone(),
            message.reasoning.clone(),
        ),
        None => (String::new(), Vec::new(), Vec::new(), ReasoningView::default()),
    };

    let visibility = resolve_visibility(
        run.reasoning_policy,
        options.legacy_preference,
        reasoning.has_content(),
    );
    let record = match visibility {
        ReasoningVisibility::Off => None,
        ReasoningVisibility::Visible => Some(reasoning_record(&reasoning, visibility)),
    };

    Some(RunView {
        run_id: run.run_id.clone(),
        status: run.status,
        generation_id: run.generation_id.clone(),
        model: run.model_resolved.clone().or_else(|| Some(run.model.clone())),
        provider: run.provider.clone(),
        finish_reason: run.finish_reason.clone(),
        usage: run.usage.clone(),
        error: run.error.clone(),
        abort_reason: run.abort_reason.clone(),
        text,
        reasoning_text: reasoning.text,
        reasoning_details: reasoning.details,
        reasoning_summary: reasoning.summary,
        media,
        tool_calls,
        reasoning: record,
    })
}

fn reasoning_record(reasoning: &ReasoningView, visibility: ReasoningVisibility) -> ReasoningRecord {
    let (summary, summary_synthesized) = match reasoning.summary.as_deref() {
        Some(summary) if !summary.trim().is_empty() => (summary.to_string(), false),
        _ => (synthesize_summary(reasoning), true),
    };
    ReasoningRecord {
        visibility,
        summary,
        summary_synthesized,
        text: reasoning.text.clone(),
        details: reasoning.details.clone(),
        has_excluded_content: reasoning.has_excluded_content,
    }
}

/// Deterministic fallback summary when the model supplied none.
pub fn synthesize_summary(reasoning: &ReasoningView) -> String {
    let stream_text = reasoning.text.trim();
    if !stream_text.is_empty() {
        return truncate_chars(stream_text, SUMMARY_MAX_CHARS);
    }

    let first_detail_text = reasoning.details.first().and_then(|stored| {
        ["text", "summary"]
            .iter()
            .filter_map(|key| stored.detail.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
    });
    if let Some(text) = first_detail_text {
        return truncate_chars(text, SUMMARY_MAX_CHARS);
    }

    let count = reasoning.details.len();
    let noun = if count == 1 { "detail" } else { "details" };
    format!("Reasoning recorded ({count} {noun})")
}

fn truncate_chars(source: &str, max_chars: usize) -> String {
    if source.chars().count() <= max_chars {
        return source.to_string();
    }
    let head: String = source.chars().take(max_chars).collect();
    format!("{}…", head.trim_end())
}
