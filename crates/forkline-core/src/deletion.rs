//! Soft deletion, restore and the irreversible cleanup pass.
//!
//! Messages move `active -> deleted -> purged`. Only cleanup purges, and it
//! must be called with [`CLEANUP_CONFIRMATION`].

use std::collections::HashSet;

use chrono::Utc;
use forkline_types::models::{
    CleanupResult, DeleteMessageResult, Message, MessageId, RetargetedBranch,
};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::state::SessionState;
use crate::store::ChangeSet;

/// Token a caller must pass to `cleanup`.
pub const CLEANUP_CONFIRMATION: &str = "CONFIRM";

pub fn check_confirmation(token: Option<&str>) -> EngineResult<()> {
    match token {
        Some(CLEANUP_CONFIRMATION) => Ok(()),
        _ => {
            warn!("cleanup refused without confirmation");
            Err(EngineError::ConfirmationRequired)
        }
    }
}

impl SessionState {
    /// Soft-delete a message, or the whole subtree under it with `cascade`.
    /// Branch heads inside the deleted subtree fall back to the nearest
    /// surviving ancestor.
    pub(crate) fn delete_message(
        &mut self,
        message_id: MessageId,
        cascade: bool,
        changes: &mut ChangeSet,
    ) -> EngineResult<DeleteMessageResult> {
        let message = self.live_message(message_id)?;
        if !cascade && message.children_count > 0 {
            return Err(EngineError::HasChildren(message_id));
        }
        let parent_id = message.parent_id;

        let affected = self.live_subtree(message_id);
        let affected_set: HashSet<MessageId> = affected.iter().copied().collect();

        for id in &affected {
            let node = self.message_mut(*id)?;
            node.deleted = true;
            node.children_count = 0;
            changes.message(node);
        }
        if let Some(parent_id) = parent_id {
            let parent = self.message_mut(parent_id)?;
            parent.children_count = parent.children_count.saturating_sub(1);
            changes.message(parent);
        }

        // The parent of the subtree root survives: live nodes only ever sit
        // under live parents.
        let mut retargeted = Vec::new();
        let now = Utc::now();
        for branch in self.branches.values_mut() {
            let in_subtree = branch
                .head_message_id
                .is_some_and(|head| affected_set.contains(&head));
            if !branch.is_live() || !in_subtree {
                continue;
            }
            branch.head_message_id = parent_id;
            if branch
                .fork_message_id
                .is_some_and(|fork| affected_set.contains(&fork))
                && parent_id.is_some()
            {
                branch.fork_message_id = parent_id;
            }
            branch.update_time = now;
            changes.branch(branch);
            retargeted.push(RetargetedBranch {
                branch_id: branch.id,
                new_head_id: parent_id,
            });
        }
        for entry in &retargeted {
            self.cursors.remove(&entry.branch_id);
        }
        self.clear_cursors_touching(&affected);

        let active_id = self.session.active_branch_id;
        let new_head_id = retargeted
            .iter()
            .find(|r| r.branch_id == active_id)
            .and_then(|r| r.new_head_id);

        info!(
            session_id = self.session.id,
            message_id,
            cascade,
            deleted = affected.len(),
            retargeted = retargeted.len(),
            "deleted messages"
        );
        Ok(DeleteMessageResult {
            deleted_message_id: message_id,
            deleted_count: affected.len(),
            new_head_id,
            message: format!("deleted {} message(s)", affected.len()),
            affected_message_ids: affected,
            retargeted_branches: retargeted,
        })
    }

    /// Undo the soft delete of a single message. Its subtree stays deleted.
    pub(crate) fn restore_message(
        &mut self,
        message_id: MessageId,
        changes: &mut ChangeSet,
    ) -> EngineResult<Message> {
        let message = self.message(message_id)?;
        if !message.deleted {
            return Err(EngineError::NotDeleted(message_id));
        }
        let parent_id = message.parent_id;
        if let Some(parent_id) = parent_id {
            if self.live_message(parent_id).is_err() {
                return Err(EngineError::ParentMissing(message_id));
            }
        }

        if let Some(parent_id) = parent_id {
            let parent = self.message_mut(parent_id)?;
            parent.children_count += 1;
            changes.message(parent);
        }
        let message = self.message_mut(message_id)?;
        message.deleted = false;
        changes.message(message);
        Ok(message.clone())
    }

    /// Hard-purge every soft-deleted message with its edit history.
    pub(crate) fn cleanup(&mut self, changes: &mut ChangeSet) -> CleanupResult {
        let mut purged: Vec<MessageId> = self
            .messages
            .values()
            .filter(|m| m.deleted)
            .map(|m| m.id)
            .collect();
        purged.sort_unstable();
        let purged_set: HashSet<MessageId> = purged.iter().copied().collect();

        for id in &purged {
            if let Some(message) = self.messages.remove(id) {
                if let Some(parent) = message.parent_id {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.retain(|c| c != id);
                    }
                }
            }
            self.children.remove(id);
            self.edits.remove(id);
            changes.purge(*id);
        }
        self.roots.retain(|r| !purged_set.contains(r));
        self.clear_cursors_touching(&purged);

        info!(
            session_id = self.session.id,
            purged = purged.len(),
            "purged deleted messages"
        );
        CleanupResult {
            session_id: self.session.id,
            purged_count: purged.len(),
            purged_message_ids: purged,
        }
    }
}
