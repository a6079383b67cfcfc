//! Per-message edit history.
//!
//! History is append-only. Version 0 is the message's original content and is
//! materialised on the first edit; every later change, including a restore of
//! an old version, appends a new current version.

use chrono::Utc;
use forkline_types::diff::{DiffGranularity, VersionDiff};
use forkline_types::models::{EditHistory, Message, MessageId, UserId};
use tracing::debug;

use crate::diff;
use crate::error::{EngineError, EngineResult};
use crate::graph::estimate_tokens;
use crate::state::SessionState;
use crate::store::ChangeSet;

const ORIGINAL_REASON: &str = "original";

impl SessionState {
    /// Versions of a message, oldest first. A never-edited message reports
    /// its content as the single current version 0.
    pub fn history_of(&self, message_id: MessageId) -> EngineResult<Vec<EditHistory>> {
        let message = self.message(message_id)?;
        match self.edits.get(&message_id) {
            Some(entries) if !entries.is_empty() => Ok(entries.clone()),
            _ => Ok(vec![self.original_version(message)]),
        }
    }

    fn original_version(&self, message: &Message) -> EditHistory {
        EditHistory {
            message_id: message.id,
            version_index: 0,
            content: message.content.clone(),
            edit_time: message.create_time,
            editor_id: self.session.user_id,
            edit_reason: ORIGINAL_REASON.to_string(),
            is_current: true,
            char_difference: 0,
        }
    }

    /// Append `new_content` as the current version of a message. Identical
    /// content is a no-op unless `force` is set.
    pub(crate) fn record_edit(
        &mut self,
        message_id: MessageId,
        new_content: String,
        reason: String,
        editor_id: UserId,
        force: bool,
        changes: &mut ChangeSet,
    ) -> EngineResult<Message> {
        let message = self.live_message(message_id)?;
        if new_content.trim().is_empty() {
            return Err(EngineError::EmptyContent);
        }
        if !force && message.content == new_content {
            return Ok(message.clone());
        }

        if self.edits.get(&message_id).is_none_or(|e| e.is_empty()) {
            let original = self.original_version(message);
            changes.edit(&original);
            self.edits.insert(message_id, vec![original]);
        }

        let entries = self.edits.entry(message_id).or_default();
        let previous_chars = match entries.last_mut() {
            Some(previous) => {
                previous.is_current = false;
                changes.edit(previous);
                previous.content.chars().count() as i64
            }
            None => 0,
        };
        let entry = EditHistory {
            message_id,
            version_index: entries.len() as u32,
            char_difference: new_content.chars().count() as i64 - previous_chars,
            content: new_content.clone(),
            edit_time: Utc::now(),
            editor_id,
            edit_reason: reason,
            is_current: true,
        };
        changes.edit(&entry);
        debug!(
            message_id,
            version = entry.version_index,
            char_difference = entry.char_difference,
            "recorded edit"
        );
        entries.push(entry);

        let message = self.message_mut(message_id)?;
        message.token_count = estimate_tokens(&new_content);
        message.content = new_content;
        message.edited = true;
        let message = message.clone();
        changes.message(&message);

        self.clear_cursors_touching(&[message_id]);
        Ok(message)
    }

    /// Re-apply an old version as a new current version.
    pub(crate) fn restore_version(
        &mut self,
        message_id: MessageId,
        version: u32,
        editor_id: UserId,
        changes: &mut ChangeSet,
    ) -> EngineResult<Message> {
        let history = self.history_of(message_id)?;
        let content = history
            .get(version as usize)
            .map(|v| v.content.clone())
            .ok_or(EngineError::VersionNotFound {
                message_id,
                version,
            })?;
        self.record_edit(
            message_id,
            content,
            format!("restored version {}", version),
            editor_id,
            true,
            changes,
        )
    }

    pub fn diff_versions(
        &self,
        message_id: MessageId,
        from_version: u32,
        to_version: u32,
        granularity: DiffGranularity,
    ) -> EngineResult<VersionDiff> {
        let history = self.history_of(message_id)?;
        let lookup = |version: u32| {
            history
                .get(version as usize)
                .ok_or(EngineError::VersionNotFound {
                    message_id,
                    version,
                })
        };
        let from = lookup(from_version)?;
        let to = lookup(to_version)?;

        let ops = diff::compute(&from.content, &to.content, granularity);
        Ok(VersionDiff {
            message_id,
            from_version,
            to_version,
            granularity,
            stats: diff::stats(&ops),
            ops,
        })
    }
}
