//! Usage: Domain event vocabulary produced by the chunk mapper and folded by the reducer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key-wise usage map (`prompt_tokens`, `completion_tokens`, `cost`, ...).
pub type UsageMap = Map<String, Value>;

/// Normalized mid-stream error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    pub origin: ErrorOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Where in the frame the error was found, or which layer raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    TopLevel,
    Choice,
    Delta,
    FinishReason,
    /// Byte stream failed after a successful status line.
    StreamRead,
    /// Request was rejected before any stream existed.
    Transport,
}

/// Meta fields resolved from frames. All first-write-wins in the reducer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl MetaFields {
    pub fn is_empty(&self) -> bool {
        self.generation_id.is_none()
            && self.model.is_none()
            && self.provider.is_none()
            && self.finish_reason.is_none()
    }
}

/// One tool-call fragment as streamed; fragments with the same `index` merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    StreamComment {
        text: String,
    },
    StreamDone,
    StreamAbort {
        reason: String,
    },
    StreamError {
        error: StreamErrorInfo,
    },
    MessageDeltaText {
        message_id: String,
        text: String,
    },
    ReasoningDeltaText {
        message_id: String,
        text: String,
    },
    ReasoningDetail {
        message_id: String,
        detail: Value,
        identity_key: String,
    },
    ReasoningSummary {
        message_id: String,
        summary: String,
    },
    MediaDelta {
        message_id: String,
        media: MediaRef,
    },
    UsageDelta {
        usage: UsageMap,
    },
    MetaDelta {
        fields: MetaFields,
    },
    ToolCallDelta {
        message_id: String,
        fragment: ToolCallFragment,
    },
}

impl DomainEvent {
    /// Terminal events end the run; a `StreamError` is always terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamDone | Self::StreamAbort { .. } | Self::StreamError { .. }
        )
    }

    /// Target message of content-bearing events.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::MessageDeltaText { message_id, .. }
            | Self::ReasoningDeltaText { message_id, .. }
            | Self::ReasoningDetail { message_id, .. }
            | Self::ReasoningSummary { message_id, .. }
            | Self::MediaDelta { message_id, .. }
            | Self::ToolCallDelta { message_id, .. } => Some(message_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StreamComment { .. } => "stream_comment",
            Self::StreamDone => "stream_done",
            Self::StreamAbort { .. } => "stream_abort",
            Self::StreamError { .. } => "stream_error",
            Self::MessageDeltaText { .. } => "message_delta_text",
            Self::ReasoningDeltaText { .. } => "reasoning_delta_text",
            Self::ReasoningDetail { .. } => "reasoning_detail",
            Self::ReasoningSummary { .. } => "reasoning_summary",
            Self::MediaDelta { .. } => "media_delta",
            Self::UsageDelta { .. } => "usage_delta",
            Self::MetaDelta { .. } => "meta_delta",
            Self::ToolCallDelta { .. } => "tool_call_delta",
        }
    }
}
