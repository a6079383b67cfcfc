use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use forkline_types::models::{
    Branch, BranchId, EditHistory, Message, MessageId, Session, SessionId, SessionStatus, UserId,
};

/// Highest ids ever persisted, purged ones included. Seeds the engine's
/// allocators so an id is never handed out twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    pub session: SessionId,
    pub message: MessageId,
    pub branch: BranchId,
}

/// Records touched by one engine operation. Upserts are keyed so a record
/// changed several times within an operation is written once, last value wins.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub sessions: BTreeMap<SessionId, Session>,
    pub messages: BTreeMap<MessageId, Message>,
    pub branches: BTreeMap<BranchId, Branch>,
    pub edits: BTreeMap<(MessageId, u32), EditHistory>,
    pub purged_messages: BTreeSet<MessageId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.messages.is_empty()
            && self.branches.is_empty()
            && self.edits.is_empty()
            && self.purged_messages.is_empty()
    }

    pub fn session(&mut self, session: &Session) {
        self.sessions.insert(session.id, session.clone());
    }

    pub fn message(&mut self, message: &Message) {
        self.messages.insert(message.id, message.clone());
    }

    pub fn branch(&mut self, branch: &Branch) {
        self.branches.insert(branch.id, branch.clone());
    }

    pub fn edit(&mut self, entry: &EditHistory) {
        self.edits
            .insert((entry.message_id, entry.version_index), entry.clone());
    }

    /// Hard-purge a message. Any pending upsert of it is dropped.
    pub fn purge(&mut self, message_id: MessageId) {
        self.messages.remove(&message_id);
        self.edits.retain(|(mid, _), _| *mid != message_id);
        self.purged_messages.insert(message_id);
    }
}

/// Persistence collaborator. The engine keeps each loaded session in memory
/// and writes every successful operation through `commit`.
pub trait Store: Send + Sync {
    fn watermarks(&self) -> Result<Watermarks>;

    fn load_session(&self, id: SessionId) -> Result<Option<Session>>;

    /// Non-archived sessions of a user, most recently active first.
    fn list_sessions(&self, user_id: UserId, limit: u32) -> Result<Vec<Session>>;

    /// All messages of a session, soft-deleted ones included.
    fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>>;

    fn load_branches(&self, session_id: SessionId) -> Result<Vec<Branch>>;

    fn load_edits(&self, session_id: SessionId) -> Result<Vec<EditHistory>>;

    fn session_of_message(&self, message_id: MessageId) -> Result<Option<SessionId>>;

    fn session_of_branch(&self, branch_id: BranchId) -> Result<Option<SessionId>>;

    /// Apply a change set atomically.
    fn commit(&self, changes: &ChangeSet) -> Result<()>;
}

/// Store backed by process memory. Used for tests and `:memory:` deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    sessions: HashMap<SessionId, Session>,
    messages: BTreeMap<MessageId, Message>,
    branches: BTreeMap<BranchId, Branch>,
    edits: BTreeMap<(MessageId, u32), EditHistory>,
    marks: Watermarks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MemoryTables) -> Result<T>,
    {
        let mut tables = self
            .inner
            .lock()
            .map_err(|e| anyhow!("Memory store lock poisoned: {}", e))?;
        f(&mut tables)
    }
}

impl Store for MemoryStore {
    fn watermarks(&self) -> Result<Watermarks> {
        self.with_tables(|t| Ok(t.marks))
    }

    fn load_session(&self, id: SessionId) -> Result<Option<Session>> {
        self.with_tables(|t| Ok(t.sessions.get(&id).cloned()))
    }

    fn list_sessions(&self, user_id: UserId, limit: u32) -> Result<Vec<Session>> {
        self.with_tables(|t| {
            let mut sessions: Vec<Session> = t
                .sessions
                .values()
                .filter(|s| s.user_id == user_id && s.status == SessionStatus::Active)
                .cloned()
                .collect();
            sessions.sort_by(|a, b| {
                b.last_active_time
                    .cmp(&a.last_active_time)
                    .then(b.id.cmp(&a.id))
            });
            sessions.truncate(limit as usize);
            Ok(sessions)
        })
    }

    fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>> {
        self.with_tables(|t| {
            Ok(t.messages
                .values()
                .filter(|m| m.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn load_branches(&self, session_id: SessionId) -> Result<Vec<Branch>> {
        self.with_tables(|t| {
            Ok(t.branches
                .values()
                .filter(|b| b.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn load_edits(&self, session_id: SessionId) -> Result<Vec<EditHistory>> {
        self.with_tables(|t| {
            Ok(t.edits
                .values()
                .filter(|e| {
                    t.messages
                        .get(&e.message_id)
                        .is_some_and(|m| m.session_id == session_id)
                })
                .cloned()
                .collect())
        })
    }

    fn session_of_message(&self, message_id: MessageId) -> Result<Option<SessionId>> {
        self.with_tables(|t| Ok(t.messages.get(&message_id).map(|m| m.session_id)))
    }

    fn session_of_branch(&self, branch_id: BranchId) -> Result<Option<SessionId>> {
        self.with_tables(|t| Ok(t.branches.get(&branch_id).map(|b| b.session_id)))
    }

    fn commit(&self, changes: &ChangeSet) -> Result<()> {
        self.with_tables(|t| {
            for session in changes.sessions.values() {
                t.sessions.insert(session.id, session.clone());
            }
            for message in changes.messages.values() {
                t.messages.insert(message.id, message.clone());
            }
            for branch in changes.branches.values() {
                t.branches.insert(branch.id, branch.clone());
            }
            for (key, entry) in &changes.edits {
                t.edits.insert(*key, entry.clone());
            }
            for id in &changes.purged_messages {
                t.messages.remove(id);
                t.edits.retain(|(mid, _), _| mid != id);
            }

            let marks = &mut t.marks;
            if let Some(id) = changes.sessions.keys().max() {
                marks.session = marks.session.max(*id);
            }
            if let Some(id) = changes.messages.keys().next_back() {
                marks.message = marks.message.max(*id);
            }
            if let Some(id) = changes.branches.keys().next_back() {
                marks.branch = marks.branch.max(*id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewMessage;
    use crate::testing::empty_state;
    use forkline_types::models::Role;

    #[test]
    fn watermarks_survive_a_purge_of_the_newest_message() {
        let store = MemoryStore::new();
        let mut state = empty_state();
        let mut changes = ChangeSet::default();
        changes.session(&state.session);
        state
            .append_on_branch(1, 9, NewMessage::new(None, Role::User, "gone soon"), &mut changes)
            .unwrap();
        store.commit(&changes).unwrap();
        assert_eq!(store.watermarks().unwrap().message, 9);

        let mut purge = ChangeSet::default();
        purge.purge(9);
        store.commit(&purge).unwrap();

        assert!(store.session_of_message(9).unwrap().is_none());
        let marks = store.watermarks().unwrap();
        assert_eq!(marks.message, 9);
        assert_eq!(marks.session, 1);
        assert_eq!(marks.branch, 1);
    }
}
