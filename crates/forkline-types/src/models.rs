use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = i64;
pub type MessageId = i64;
pub type BranchId = i64;
pub type UserId = i64;

/// Opaque key/value map carried on sessions and messages.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Characters kept in message previews (branch views, rollback points).
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub description: String,
    pub user_id: UserId,
    pub active_branch_id: BranchId,
    pub model_name: String,
    pub model_config: Metadata,
    pub status: SessionStatus,
    pub create_time: DateTime<Utc>,
    pub last_active_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    #[default]
    Text,
    Markdown,
    Code,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Markdown => "MARKDOWN",
            MessageType::Code => "CODE",
        }
    }
}

/// A node in a session's message forest.
///
/// Messages are never overwritten: edits append to the edit history and only
/// `content`/`edited` track the current version. Deletion is a soft mark until
/// the session is cleaned up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub parent_id: Option<MessageId>,
    pub role: Role,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub token_count: u32,
    pub edited: bool,
    pub create_time: DateTime<Utc>,
    pub metadata: Metadata,
    /// Live (non-deleted) children. Maintained incrementally.
    pub children_count: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl Message {
    pub fn preview(&self) -> String {
        preview(&self.content)
    }
}

pub fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Deleted,
}

/// A named pointer into the message forest. Branches never own messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: BranchId,
    pub session_id: SessionId,
    pub name: String,
    pub description: String,
    pub parent_branch_id: Option<BranchId>,
    pub fork_message_id: Option<MessageId>,
    pub head_message_id: Option<MessageId>,
    pub is_main: bool,
    pub status: BranchStatus,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Branch {
    pub fn is_live(&self) -> bool {
        self.status == BranchStatus::Active
    }
}

/// One version of a message's content. Version 0 is the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditHistory {
    pub message_id: MessageId,
    pub version_index: u32,
    pub content: String,
    pub edit_time: DateTime<Utc>,
    pub editor_id: UserId,
    pub edit_reason: String,
    pub is_current: bool,
    pub char_difference: i64,
}

/// Projected view of a message on the active branch, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPoint {
    pub message_id: MessageId,
    pub role: Role,
    pub content_preview: String,
    pub create_time: DateTime<Utc>,
    pub depth: u32,
    pub is_current_head: bool,
}

/// Branch plus the derived fields clients render in branch lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchView {
    #[serde(flatten)]
    pub branch: Branch,
    pub fork_message_preview: Option<String>,
    pub head_message_preview: Option<String>,
    pub message_count: u32,
    pub divergence_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchTreeNode {
    pub id: BranchId,
    pub name: String,
    pub description: String,
    pub is_main: bool,
    pub status: BranchStatus,
    pub fork_message_id: Option<MessageId>,
    pub head_message_id: Option<MessageId>,
    pub create_time: DateTime<Utc>,
    pub children: Vec<BranchTreeNode>,
    pub depth: u32,
    pub is_on_active_path: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchTree {
    pub session_id: SessionId,
    pub active_branch_id: BranchId,
    pub total_branches: usize,
    pub root: BranchTreeNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBranchSummary {
    pub id: BranchId,
    pub name: String,
    pub head_message_id: Option<MessageId>,
    pub status: BranchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub active_branch: Option<ActiveBranchSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub session_id: SessionId,
    pub branch_id: BranchId,
    pub old_head_id: MessageId,
    pub new_head_id: MessageId,
    pub skipped_message_count: u32,
    pub checkpoint_branch_id: Option<BranchId>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetargetedBranch {
    pub branch_id: BranchId,
    pub new_head_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageResult {
    pub deleted_message_id: MessageId,
    pub deleted_count: usize,
    /// New head of the active branch when the deletion moved it.
    pub new_head_id: Option<MessageId>,
    pub message: String,
    pub affected_message_ids: Vec<MessageId>,
    pub retargeted_branches: Vec<RetargetedBranch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Deleted,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteEntry {
    pub message_id: MessageId,
    pub outcome: BatchOutcome,
    pub error: Option<String>,
    pub affected_message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResult {
    pub deleted_count: usize,
    pub failed_count: usize,
    pub entries: Vec<BatchDeleteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardResult {
    pub session_id: SessionId,
    pub branch_id: BranchId,
    /// The new head, or `None` when there is nothing to move forward to.
    pub message: Option<Message>,
    pub remaining_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub session_id: SessionId,
    pub purged_count: usize,
    pub purged_message_ids: Vec<MessageId>,
}
