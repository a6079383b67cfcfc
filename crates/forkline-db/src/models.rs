//! Database row types. These map directly to SQLite rows and stay distinct
//! from the forkline-types models; enums are stored as their wire strings and
//! maps and lists as JSON text.

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use forkline_types::models::{
    Branch, BranchStatus, EditHistory, Message, MessageType, Metadata, Role, Session,
    SessionStatus,
};

pub struct SessionRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub user_id: i64,
    pub active_branch_id: i64,
    pub model_name: String,
    pub model_config: String,
    pub status: String,
    pub create_time: String,
    pub last_active_time: String,
}

pub struct MessageRow {
    pub id: i64,
    pub session_id: i64,
    pub parent_id: Option<i64>,
    pub role: String,
    pub content: String,
    pub message_type: String,
    pub attachments: String,
    pub token_count: u32,
    pub edited: bool,
    pub create_time: String,
    pub metadata: String,
    pub children_count: u32,
    pub deleted: bool,
}

pub struct BranchRow {
    pub id: i64,
    pub session_id: i64,
    pub name: String,
    pub description: String,
    pub parent_branch_id: Option<i64>,
    pub fork_message_id: Option<i64>,
    pub head_message_id: Option<i64>,
    pub is_main: bool,
    pub status: String,
    pub create_time: String,
    pub update_time: String,
}

pub struct EditRow {
    pub message_id: i64,
    pub version_index: u32,
    pub content: String,
    pub edit_time: String,
    pub editor_id: i64,
    pub edit_reason: String,
    pub is_current: bool,
    pub char_difference: i64,
}

/// Fixed-width RFC 3339 so stored timestamps sort as text.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .map_err(|e| anyhow!("Bad timestamp '{}': {}", text, e))?
        .with_timezone(&Utc))
}

fn parse_map(text: &str) -> Result<Metadata> {
    Ok(serde_json::from_str(text)?)
}

pub fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Archived => "archived",
    }
}

pub fn branch_status_str(status: BranchStatus) -> &'static str {
    match status {
        BranchStatus::Active => "active",
        BranchStatus::Deleted => "deleted",
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "active" => SessionStatus::Active,
            "archived" => SessionStatus::Archived,
            other => return Err(anyhow!("Unknown session status: {}", other)),
        };
        Ok(Session {
            id: row.id,
            title: row.title,
            description: row.description,
            user_id: row.user_id,
            active_branch_id: row.active_branch_id,
            model_name: row.model_name,
            model_config: parse_map(&row.model_config)?,
            status,
            create_time: parse_time(&row.create_time)?,
            last_active_time: parse_time(&row.last_active_time)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let role = match row.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => return Err(anyhow!("Unknown role: {}", other)),
        };
        let message_type = match row.message_type.as_str() {
            "TEXT" => MessageType::Text,
            "MARKDOWN" => MessageType::Markdown,
            "CODE" => MessageType::Code,
            other => return Err(anyhow!("Unknown message type: {}", other)),
        };
        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            parent_id: row.parent_id,
            role,
            content: row.content,
            message_type,
            attachments: serde_json::from_str(&row.attachments)?,
            token_count: row.token_count,
            edited: row.edited,
            create_time: parse_time(&row.create_time)?,
            metadata: parse_map(&row.metadata)?,
            children_count: row.children_count,
            deleted: row.deleted,
        })
    }
}

impl TryFrom<BranchRow> for Branch {
    type Error = anyhow::Error;

    fn try_from(row: BranchRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "active" => BranchStatus::Active,
            "deleted" => BranchStatus::Deleted,
            other => return Err(anyhow!("Unknown branch status: {}", other)),
        };
        Ok(Branch {
            id: row.id,
            session_id: row.session_id,
            name: row.name,
            description: row.description,
            parent_branch_id: row.parent_branch_id,
            fork_message_id: row.fork_message_id,
            head_message_id: row.head_message_id,
            is_main: row.is_main,
            status,
            create_time: parse_time(&row.create_time)?,
            update_time: parse_time(&row.update_time)?,
        })
    }
}

impl TryFrom<EditRow> for EditHistory {
    type Error = anyhow::Error;

    fn try_from(row: EditRow) -> Result<Self> {
        Ok(EditHistory {
            message_id: row.message_id,
            version_index: row.version_index,
            content: row.content,
            edit_time: parse_time(&row.edit_time)?,
            editor_id: row.editor_id,
            edit_reason: row.edit_reason,
            is_current: row.is_current,
            char_difference: row.char_difference,
        })
    }
}
