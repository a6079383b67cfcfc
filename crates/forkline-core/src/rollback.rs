//! Rollback and forward navigation on the active branch.
//!
//! A rollback only moves the branch head back along its own segment; nothing
//! is deleted. The steps it skipped are kept as a forward cursor so that
//! `forward` can replay them until new content is appended to the branch.

use forkline_types::models::{BranchId, Message, MessageId, RollbackPoint, RollbackResult};
use tracing::{debug, info};

use crate::branches::BranchSpec;
use crate::error::{EngineError, EngineResult};
use crate::state::SessionState;
use crate::store::ChangeSet;

/// Rollback parameters beyond the target.
#[derive(Debug, Clone, Default)]
pub struct RollbackSpec {
    pub reason: Option<String>,
    pub save_checkpoint: bool,
    pub checkpoint_name: Option<String>,
}

impl SessionState {
    /// The active branch's segment, head first, capped at `limit`.
    pub fn rollback_points(&self, limit: usize) -> EngineResult<Vec<RollbackPoint>> {
        let branch = self.active_branch()?;
        let segment = self.segment(branch);
        Ok(segment
            .iter()
            .rev()
            .take(limit)
            .enumerate()
            .filter_map(|(depth, id)| {
                let message = self.messages.get(id)?;
                Some(RollbackPoint {
                    message_id: message.id,
                    role: message.role,
                    content_preview: message.preview(),
                    create_time: message.create_time,
                    depth: depth as u32,
                    is_current_head: depth == 0,
                })
            })
            .collect())
    }

    /// Move the active head back to `target`, an ancestor-or-self of the head
    /// within the branch segment. `checkpoint_id` is used only when a
    /// checkpoint branch is requested.
    pub(crate) fn rollback(
        &mut self,
        target: MessageId,
        spec: RollbackSpec,
        checkpoint_id: BranchId,
        changes: &mut ChangeSet,
    ) -> EngineResult<RollbackResult> {
        let branch = self.active_branch()?.clone();
        let segment = self.segment(&branch);
        let (Some(old_head), Some(target_pos)) = (
            branch.head_message_id,
            segment.iter().position(|id| *id == target),
        ) else {
            return Err(EngineError::TargetNotOnActivePath(target));
        };

        let skipped = (segment.len() - 1 - target_pos) as u32;
        let mut result = RollbackResult {
            session_id: self.session.id,
            branch_id: branch.id,
            old_head_id: old_head,
            new_head_id: target,
            skipped_message_count: skipped,
            checkpoint_branch_id: None,
            message: String::new(),
        };
        if target == old_head {
            result.message = "already at the requested message".into();
            return Ok(result);
        }

        if spec.save_checkpoint {
            let name = match spec.checkpoint_name.as_deref() {
                Some(name) if !name.trim().is_empty() => self.unique_name(name.trim()),
                _ => self.unique_name(&format!("checkpoint-{}", old_head)),
            };
            let mut checkpoint = self.create_branch(
                checkpoint_id,
                BranchSpec {
                    fork_message_id: Some(target),
                    parent_branch_id: Some(branch.id),
                    name: Some(name),
                    description: spec.reason.clone(),
                    switch_to_new_branch: false,
                },
                changes,
            )?;
            checkpoint.head_message_id = Some(old_head);
            changes.branch(&checkpoint);
            result.checkpoint_branch_id = Some(checkpoint.id);
            self.branches.insert(checkpoint.id, checkpoint);
        }

        // Steps from the new head (exclusive) to the old head, pushed so the
        // first step forward is on top. An older cursor stays underneath.
        let cursor = self.cursors.entry(branch.id).or_default();
        cursor.extend(segment[target_pos + 1..].iter().rev());

        self.set_head(branch.id, Some(target), changes)?;
        result.message = format!("rolled back {} message(s)", skipped);
        info!(
            session_id = self.session.id,
            branch_id = branch.id,
            old_head,
            new_head = target,
            reason = spec.reason.as_deref().unwrap_or(""),
            "rolled back branch"
        );
        Ok(result)
    }

    /// Step the active head one message forward along the rolled-back path.
    /// Returns `None` when there is no forward cursor.
    pub(crate) fn forward(&mut self, changes: &mut ChangeSet) -> EngineResult<Option<Message>> {
        let branch = self.active_branch()?.clone();
        let Some(next) = self.cursors.get(&branch.id).and_then(|c| c.last().copied()) else {
            return Ok(None);
        };

        let valid = self
            .live_message(next)
            .is_ok_and(|m| m.parent_id.is_some() && m.parent_id == branch.head_message_id);
        if !valid {
            debug!(branch_id = branch.id, next, "discarding stale forward cursor");
            self.cursors.remove(&branch.id);
            return Ok(None);
        }

        if let Some(cursor) = self.cursors.get_mut(&branch.id) {
            cursor.pop();
            if cursor.is_empty() {
                self.cursors.remove(&branch.id);
            }
        }
        self.set_head(branch.id, Some(next), changes)?;
        Ok(Some(self.live_message(next)?.clone()))
    }

    pub fn forward_steps(&self, branch_id: BranchId) -> usize {
        self.cursors.get(&branch_id).map_or(0, |c| c.len())
    }
}
