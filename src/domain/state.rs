//! Usage: Run / Message / RootState model folded by the reducer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::{MediaRef, StreamErrorInfo, UsageMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Streaming,
    Completed,
    Errored,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }
}

/// Whether reasoning content is recorded on the final message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningVisibility {
    Off,
    Visible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub request_id: String,
    pub model: String,
    pub assistant_message_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub generation_id: Option<String>,
    #[serde(default)]
    pub model_resolved: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub usage: UsageMap,
    #[serde(default)]
    pub error: Option<StreamErrorInfo>,
    #[serde(default)]
    pub abort_reason: Option<String>,
    /// Explicit per-run reasoning configuration; `None` defers to preference/auto.
    #[serde(default)]
    pub reasoning_policy: Option<ReasoningVisibility>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { media: MediaRef },
    Other { value: Value },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReasoningDetail {
    pub identity_key: String,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningView {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub details: Vec<StoredReasoningDetail>,
    pub visibility: ReasoningVisibility,
    #[serde(default)]
    pub has_excluded_content: bool,
}

impl Default for ReasoningView {
    fn default() -> Self {
        Self {
            summary: None,
            text: String::new(),
            details: Vec::new(),
            visibility: ReasoningVisibility::Off,
            has_excluded_content: false,
        }
    }
}

impl ReasoningView {
    pub fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.details.is_empty() || self.summary.is_some()
    }

    pub fn contains_detail(&self, identity_key: &str) -> bool {
        self.details.iter().any(|d| d.identity_key == identity_key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub is_target: bool,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub reasoning: ReasoningView,
}

impl Message {
    pub fn new(id: impl Into<String>, role: MessageRole) -> Self {
        Self {
            id: id.into(),
            role,
            content: Vec::new(),
            tool_calls: Vec::new(),
            is_target: false,
            is_complete: false,
            reasoning: ReasoningView::default(),
        }
    }

    /// Concatenation of all text blocks in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn media(&self) -> Vec<MediaRef> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Image { media } => Some(media.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Root state keyed by run id. `BTreeMap` keeps iteration (and serialization) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootState {
    pub runs: BTreeMap<String, Run>,
    pub messages: BTreeMap<String, Message>,
    pub run_messages: BTreeMap<String, Vec<String>>,
}

impl RootState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, run_id: &str) -> Option<&Run> {
        self.runs.get(run_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.get(message_id)
    }

    /// Messages of a run in display order.
    pub fn run_messages(&self, run_id: &str) -> Vec<&Message> {
        self.run_messages
            .get(run_id)
            .map(|ids| ids.iter().filter_map(|id| self.messages.get(id)).collect())
            .unwrap_or_default()
    }
}
