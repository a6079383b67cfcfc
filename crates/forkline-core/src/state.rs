use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use chrono::Utc;
use forkline_types::models::{
    Branch, BranchId, EditHistory, Message, MessageId, Session, SessionStatus,
};

use crate::error::{EngineError, EngineResult};
use crate::store::ChangeSet;

/// In-memory image of one session: the message forest, its branches and
/// edit ledgers. Guarded by the session lock in [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) session: Session,
    pub(crate) main_branch_id: BranchId,
    pub(crate) messages: HashMap<MessageId, Message>,
    /// Child ids in creation order, soft-deleted children included.
    pub(crate) children: HashMap<MessageId, Vec<MessageId>>,
    pub(crate) roots: Vec<MessageId>,
    pub(crate) branches: BTreeMap<BranchId, Branch>,
    pub(crate) edits: HashMap<MessageId, Vec<EditHistory>>,
    /// Forward cursors left behind by rollbacks, next step last.
    pub(crate) cursors: HashMap<BranchId, Vec<MessageId>>,
}

impl SessionState {
    pub(crate) fn new(session: Session, main: Branch) -> Self {
        let main_branch_id = main.id;
        let mut branches = BTreeMap::new();
        branches.insert(main.id, main);
        Self {
            session,
            main_branch_id,
            messages: HashMap::new(),
            children: HashMap::new(),
            roots: Vec::new(),
            branches,
            edits: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    /// Rebuild a session image from persisted records.
    pub(crate) fn from_records(
        session: Session,
        mut messages: Vec<Message>,
        branches: Vec<Branch>,
        mut edits: Vec<EditHistory>,
    ) -> EngineResult<Self> {
        let main_branch_id = branches
            .iter()
            .find(|b| b.is_main)
            .map(|b| b.id)
            .ok_or_else(|| anyhow!("session {} has no main branch", session.id))?;

        messages.sort_by_key(|m| (m.create_time, m.id));
        let mut state = Self {
            session,
            main_branch_id,
            messages: HashMap::with_capacity(messages.len()),
            children: HashMap::new(),
            roots: Vec::new(),
            branches: branches.into_iter().map(|b| (b.id, b)).collect(),
            edits: HashMap::new(),
            cursors: HashMap::new(),
        };

        for message in messages {
            match message.parent_id {
                Some(parent) => state.children.entry(parent).or_default().push(message.id),
                None => state.roots.push(message.id),
            }
            state.messages.insert(message.id, message);
        }

        edits.sort_by_key(|e| (e.message_id, e.version_index));
        for entry in edits {
            state.edits.entry(entry.message_id).or_default().push(entry);
        }

        Ok(state)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn ensure_writable(&self) -> EngineResult<()> {
        match self.session.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Archived => Err(EngineError::SessionArchived(self.session.id)),
        }
    }

    /// Bump the session's activity timestamp as part of a mutation.
    pub(crate) fn touch(&mut self, changes: &mut ChangeSet) {
        self.session.last_active_time = Utc::now();
        changes.session(&self.session);
    }

    pub fn main_branch(&self) -> EngineResult<&Branch> {
        self.branches
            .get(&self.main_branch_id)
            .ok_or(EngineError::BranchNotFound(self.main_branch_id))
    }

    /// A live branch of this session.
    pub fn branch(&self, id: BranchId) -> EngineResult<&Branch> {
        self.branches
            .get(&id)
            .filter(|b| b.is_live())
            .ok_or(EngineError::BranchNotFound(id))
    }

    pub(crate) fn branch_mut(&mut self, id: BranchId) -> EngineResult<&mut Branch> {
        self.branches
            .get_mut(&id)
            .filter(|b| b.is_live())
            .ok_or(EngineError::BranchNotFound(id))
    }

    pub fn active_branch(&self) -> EngineResult<&Branch> {
        self.branch(self.session.active_branch_id)
    }

    pub fn live_branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values().filter(|b| b.is_live())
    }

    /// Move a branch head and record the change. Any forward cursor on the
    /// branch is kept; callers that invalidate it clear it themselves.
    pub(crate) fn set_head(
        &mut self,
        branch_id: BranchId,
        head: Option<MessageId>,
        changes: &mut ChangeSet,
    ) -> EngineResult<()> {
        let branch = self.branch_mut(branch_id)?;
        branch.head_message_id = head;
        branch.update_time = Utc::now();
        changes.branch(branch);
        Ok(())
    }

    /// Drop every forward cursor that passes through one of `ids`.
    pub(crate) fn clear_cursors_touching(&mut self, ids: &[MessageId]) {
        self.cursors
            .retain(|_, cursor| !cursor.iter().any(|id| ids.contains(id)));
    }
}
