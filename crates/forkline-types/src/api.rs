use serde::{Deserialize, Serialize};

use crate::models::{BranchId, Message, MessageId, MessageType, Metadata, SessionId};

// -- Envelope --

/// Response envelope expected by clients: `code` mirrors the HTTP status,
/// `timestamp` is milliseconds since the epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "success".into(),
            data: Some(data),
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: None,
        }
    }

    pub fn failure(code: u16, kind: &str, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: Some(kind.to_string()),
        }
    }
}

// -- Sessions --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub title: String,
    pub description: Option<String>,
    pub model_name: Option<String>,
    pub model_config: Option<Metadata>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub session_id: SessionId,
    pub content: String,
    pub message_type: Option<MessageType>,
    pub attachments: Option<Vec<String>>,
    pub parent_id: Option<MessageId>,
    pub branch_id: Option<BranchId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RollbackRequest {
    pub session_id: SessionId,
    pub target_message_id: MessageId,
    pub reason: Option<String>,
    pub save_current_as_checkpoint: Option<bool>,
    pub checkpoint_name: Option<String>,
}

// -- Branches --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateBranchRequest {
    pub session_id: SessionId,
    pub fork_message_id: Option<MessageId>,
    pub parent_branch_id: Option<BranchId>,
    pub branch_name: Option<String>,
    pub description: Option<String>,
    pub fork_reason: Option<String>,
    pub switch_to_new_branch: Option<bool>,
}

// -- Edits --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditMessageRequest {
    pub message_id: MessageId,
    pub new_content: String,
    pub edit_reason: Option<String>,
    pub regenerate_response: Option<bool>,
}

/// The edited message and, when a new reply was requested, that reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageResponse {
    pub message: Message,
    pub regenerated_reply: Option<Message>,
}
