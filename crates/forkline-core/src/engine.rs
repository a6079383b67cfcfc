use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use forkline_types::diff::{DiffGranularity, VersionDiff};
use forkline_types::models::{
    ActiveBranchSummary, BatchDeleteEntry, BatchDeleteResult, BatchOutcome, Branch, BranchId,
    BranchStatus, BranchTree, BranchView, CleanupResult, DeleteMessageResult, EditHistory,
    ForwardResult, Message, MessageId, MessageType, Metadata, Role, RollbackPoint,
    RollbackResult, Session, SessionDetail, SessionId, SessionStatus, UserId,
};
use tracing::{debug, info, warn};

use crate::branches::BranchSpec;
use crate::deletion::check_confirmation;
use crate::error::{EngineError, EngineResult};
use crate::generator::{GenerationContext, Reply, ReplyGenerator};
use crate::graph::NewMessage;
use crate::ids::IdAllocator;
use crate::rollback::RollbackSpec;
use crate::state::SessionState;
use crate::store::{ChangeSet, Store};

const MAX_SESSION_PAGE: u32 = 200;
const DEFAULT_TITLE: &str = "New conversation";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-4".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub model_name: Option<String>,
    pub model_config: Option<Metadata>,
}

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub session_id: SessionId,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub parent_id: Option<MessageId>,
    pub branch_id: Option<BranchId>,
}

impl SendMessage {
    pub fn text(session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            session_id,
            content: content.into(),
            message_type: MessageType::Text,
            attachments: Vec::new(),
            parent_id: None,
            branch_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub message_id: MessageId,
    pub new_content: String,
    pub reason: Option<String>,
    pub editor_id: UserId,
}

/// A user turn waiting for its reply. Produced under the session lock,
/// completed after the generator has run without it.
#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub session_id: SessionId,
    pub prompt: Message,
    pub context: GenerationContext,
    /// Branch to advance, and the head it must still have for the reply to
    /// become its new head.
    advance: Option<(BranchId, Option<MessageId>)>,
}

impl PendingExchange {
    /// Ask the generator for the reply. Call this without holding any
    /// session lock.
    pub async fn generate(&self, generator: &dyn ReplyGenerator) -> EngineResult<Reply> {
        generator.generate(&self.context).await.map_err(|e| {
            warn!(
                session_id = self.session_id,
                prompt_id = self.prompt.id,
                error = %e,
                "reply generation failed"
            );
            EngineError::Generation(e.to_string())
        })
    }
}

/// One session's lock scope. `commit` serializes mutators; `state` holds the
/// last committed state and is only write-locked to publish a new one.
struct SessionSlot {
    state: RwLock<SessionState>,
    commit: Mutex<()>,
}

/// The conversation store: sessions, their message forests, branches, edit
/// ledgers and rollback cursors, written through to a [`Store`].
pub struct Engine {
    store: Arc<dyn Store>,
    config: EngineConfig,
    ids: IdAllocator,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    message_owner: RwLock<HashMap<MessageId, SessionId>>,
    branch_owner: RwLock<HashMap<BranchId, SessionId>>,
}

impl Engine {
    pub fn open(store: Arc<dyn Store>, config: EngineConfig) -> anyhow::Result<Self> {
        let marks = store.watermarks()?;
        info!(
            sessions = marks.session,
            messages = marks.message,
            branches = marks.branch,
            "engine opened"
        );
        Ok(Self {
            store,
            config,
            ids: IdAllocator::new(marks),
            sessions: RwLock::new(HashMap::new()),
            message_owner: RwLock::new(HashMap::new()),
            branch_owner: RwLock::new(HashMap::new()),
        })
    }

    // -- Lock plumbing --

    fn slot(&self, session_id: SessionId) -> EngineResult<Arc<SessionSlot>> {
        if let Some(slot) = self
            .sessions
            .read()
            .map_err(|_| EngineError::poisoned("session map"))?
            .get(&session_id)
        {
            return Ok(slot.clone());
        }

        // Load outside the map lock; if another request won the race its
        // copy is kept.
        let session = self
            .store
            .load_session(session_id)?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        let messages = self.store.load_messages(session_id)?;
        let branches = self.store.load_branches(session_id)?;
        let edits = self.store.load_edits(session_id)?;
        let state = SessionState::from_records(session, messages, branches, edits)?;
        debug!(session_id, messages = state.messages.len(), "loaded session");

        self.register_messages(session_id, state.messages.keys().copied())?;
        self.register_branches(session_id, state.branches.keys().copied())?;

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| EngineError::poisoned("session map"))?;
        let slot = sessions.entry(session_id).or_insert_with(|| {
            Arc::new(SessionSlot {
                state: RwLock::new(state),
                commit: Mutex::new(()),
            })
        });
        Ok(slot.clone())
    }

    fn read<F, T>(&self, session_id: SessionId, f: F) -> EngineResult<T>
    where
        F: FnOnce(&SessionState) -> EngineResult<T>,
    {
        let slot = self.slot(session_id)?;
        let state = slot
            .state
            .read()
            .map_err(|_| EngineError::poisoned("session"))?;
        f(&state)
    }

    /// Run a mutation and commit what it changed.
    fn mutate<F, T>(&self, session_id: SessionId, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut SessionState, &mut ChangeSet) -> EngineResult<T>,
    {
        self.mutate_inner(session_id, true, f)
    }

    /// Mutations run on a staged copy of the session under the commit lock,
    /// so each one starts from the last committed state. The copy replaces
    /// the shared state only after the store accepted its change set; until
    /// then readers keep seeing the committed state.
    fn mutate_inner<F, T>(&self, session_id: SessionId, writable: bool, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut SessionState, &mut ChangeSet) -> EngineResult<T>,
    {
        let slot = self.slot(session_id)?;
        let _commit_guard = slot
            .commit
            .lock()
            .map_err(|_| EngineError::poisoned("commit"))?;

        let mut staged = slot
            .state
            .read()
            .map_err(|_| EngineError::poisoned("session"))?
            .clone();
        if writable {
            staged.ensure_writable()?;
        }
        let mut changes = ChangeSet::default();
        let value = f(&mut staged, &mut changes)?;

        if !changes.is_empty() {
            staged.touch(&mut changes);
            if let Err(e) = self.store.commit(&changes) {
                warn!(session_id, error = %e, "commit failed, discarding staged changes");
                return Err(EngineError::Storage(e));
            }
        }

        // Cursor-only changes never reach the store but still apply.
        *slot
            .state
            .write()
            .map_err(|_| EngineError::poisoned("session"))? = staged;

        if !changes.is_empty() {
            self.register_messages(session_id, changes.messages.keys().copied())?;
            self.register_branches(session_id, changes.branches.keys().copied())?;
        }
        Ok(value)
    }

    fn register_messages(
        &self,
        session_id: SessionId,
        ids: impl Iterator<Item = MessageId>,
    ) -> EngineResult<()> {
        let mut owners = self
            .message_owner
            .write()
            .map_err(|_| EngineError::poisoned("message index"))?;
        for id in ids {
            owners.insert(id, session_id);
        }
        Ok(())
    }

    fn register_branches(
        &self,
        session_id: SessionId,
        ids: impl Iterator<Item = BranchId>,
    ) -> EngineResult<()> {
        let mut owners = self
            .branch_owner
            .write()
            .map_err(|_| EngineError::poisoned("branch index"))?;
        for id in ids {
            owners.insert(id, session_id);
        }
        Ok(())
    }

    fn session_of_message(&self, message_id: MessageId) -> EngineResult<SessionId> {
        let cached = self
            .message_owner
            .read()
            .map_err(|_| EngineError::poisoned("message index"))?
            .get(&message_id)
            .copied();
        match cached {
            Some(session_id) => Ok(session_id),
            None => self
                .store
                .session_of_message(message_id)?
                .ok_or(EngineError::MessageNotFound(message_id)),
        }
    }

    fn session_of_branch(&self, branch_id: BranchId) -> EngineResult<SessionId> {
        let cached = self
            .branch_owner
            .read()
            .map_err(|_| EngineError::poisoned("branch index"))?
            .get(&branch_id)
            .copied();
        match cached {
            Some(session_id) => Ok(session_id),
            None => self
                .store
                .session_of_branch(branch_id)?
                .ok_or(EngineError::BranchNotFound(branch_id)),
        }
    }

    /// Reject a branch id that belongs to another session.
    fn check_branch_in(&self, session_id: SessionId, branch_id: BranchId) -> EngineResult<()> {
        let owner = self.session_of_branch(branch_id)?;
        if owner != session_id {
            return Err(EngineError::CrossSessionBranch {
                branch_id,
                session_id,
            });
        }
        Ok(())
    }

    // -- Sessions --

    pub fn create_session(&self, new: NewSession) -> EngineResult<Session> {
        let title = match new.title.trim() {
            "" => DEFAULT_TITLE,
            title => title,
        };
        let now = Utc::now();
        let session_id = self.ids.session();
        let main_id = self.ids.branch();

        let session = Session {
            id: session_id,
            title: title.to_string(),
            description: new.description.unwrap_or_default(),
            user_id: new.user_id,
            active_branch_id: main_id,
            model_name: new
                .model_name
                .unwrap_or_else(|| self.config.default_model.clone()),
            model_config: new.model_config.unwrap_or_default(),
            status: SessionStatus::Active,
            create_time: now,
            last_active_time: now,
        };
        let main = Branch {
            id: main_id,
            session_id,
            name: "main".into(),
            description: String::new(),
            parent_branch_id: None,
            fork_message_id: None,
            head_message_id: None,
            is_main: true,
            status: BranchStatus::Active,
            create_time: now,
            update_time: now,
        };

        let mut changes = ChangeSet::default();
        changes.session(&session);
        changes.branch(&main);
        self.store.commit(&changes)?;

        self.register_branches(session_id, std::iter::once(main_id))?;
        self.sessions
            .write()
            .map_err(|_| EngineError::poisoned("session map"))?
            .insert(
                session_id,
                Arc::new(SessionSlot {
                    state: RwLock::new(SessionState::new(session.clone(), main)),
                    commit: Mutex::new(()),
                }),
            );

        info!(session_id, user_id = session.user_id, title = %session.title, "created session");
        Ok(session)
    }

    pub fn get_session(&self, session_id: SessionId) -> EngineResult<SessionDetail> {
        self.read(session_id, |state| {
            let active_branch = state.active_branch().ok().map(|b| ActiveBranchSummary {
                id: b.id,
                name: b.name.clone(),
                head_message_id: b.head_message_id,
                status: b.status,
            });
            Ok(SessionDetail {
                session: state.session().clone(),
                active_branch,
            })
        })
    }

    pub fn list_sessions(&self, user_id: UserId, limit: u32) -> EngineResult<Vec<Session>> {
        let limit = limit.clamp(1, MAX_SESSION_PAGE);
        Ok(self.store.list_sessions(user_id, limit)?)
    }

    pub fn archive_session(&self, session_id: SessionId) -> EngineResult<Session> {
        self.mutate_inner(session_id, false, |state, changes| {
            if state.session.status != SessionStatus::Archived {
                state.session.status = SessionStatus::Archived;
                changes.session(&state.session);
                info!(session_id, "archived session");
            }
            Ok(state.session.clone())
        })
    }

    // -- Messages --

    /// Append a message on a branch (the active one by default).
    pub fn append_message(
        &self,
        session_id: SessionId,
        branch_id: Option<BranchId>,
        new: NewMessage,
    ) -> EngineResult<Message> {
        if let Some(branch_id) = branch_id {
            self.check_branch_in(session_id, branch_id)?;
        }
        let id = self.ids.message();
        self.mutate(session_id, |state, changes| {
            let branch_id = branch_id.unwrap_or(state.session.active_branch_id);
            state.append_on_branch(branch_id, id, new, changes)
        })
    }

    /// Append the user turn of an exchange and capture the context the
    /// generator needs for the reply.
    pub fn begin_exchange(&self, request: SendMessage) -> EngineResult<PendingExchange> {
        if request.content.trim().is_empty() {
            return Err(EngineError::EmptyContent);
        }
        let session_id = request.session_id;
        if let Some(branch_id) = request.branch_id {
            self.check_branch_in(session_id, branch_id)?;
        }
        let id = self.ids.message();
        self.mutate(session_id, |state, changes| {
            let branch_id = request.branch_id.unwrap_or(state.session.active_branch_id);
            let new = NewMessage {
                parent_id: request.parent_id,
                role: Role::User,
                content: request.content,
                message_type: request.message_type,
                attachments: request.attachments,
                token_count: None,
                metadata: Metadata::new(),
            };
            let prompt = state.append_on_branch(branch_id, id, new, changes)?;
            Ok(PendingExchange {
                session_id,
                context: generation_context(state, prompt.id),
                advance: Some((branch_id, Some(prompt.id))),
                prompt,
            })
        })
    }

    /// Attach the generated reply under the pending user turn. The branch
    /// head only follows if nobody moved it in the meantime.
    pub fn complete_exchange(
        &self,
        pending: PendingExchange,
        reply: Reply,
    ) -> EngineResult<Message> {
        let id = self.ids.message();
        self.mutate(pending.session_id, |state, changes| {
            let new = NewMessage {
                token_count: reply.token_count,
                ..NewMessage::new(Some(pending.prompt.id), Role::Assistant, reply.content)
            };
            let message = state.append(id, new, changes)?;

            if let Some((branch_id, expected)) = pending.advance {
                let unmoved = state
                    .branch(branch_id)
                    .is_ok_and(|b| b.head_message_id == expected);
                if unmoved {
                    state.set_head(branch_id, Some(message.id), changes)?;
                    state.cursors.remove(&branch_id);
                } else {
                    debug!(branch_id, "branch moved during generation, head left in place");
                }
            }
            Ok(message)
        })
    }

    /// Append a user message and its generated reply. Returns the reply.
    pub async fn send_message(
        &self,
        request: SendMessage,
        generator: &dyn ReplyGenerator,
    ) -> EngineResult<Message> {
        let pending = self.begin_exchange(request)?;
        let reply = pending.generate(generator).await?;
        self.complete_exchange(pending, reply)
    }

    /// Messages root..head of a branch, the active one by default.
    pub fn history(
        &self,
        session_id: SessionId,
        branch_id: Option<BranchId>,
    ) -> EngineResult<Vec<Message>> {
        if let Some(branch_id) = branch_id {
            self.check_branch_in(session_id, branch_id)?;
        }
        self.read(session_id, |state| {
            let branch = match branch_id {
                Some(id) => state.branch(id)?,
                None => state.active_branch()?,
            };
            Ok(match branch.head_message_id {
                Some(head) => state.ancestor_path(head)?.into_iter().cloned().collect(),
                None => Vec::new(),
            })
        })
    }

    pub fn forest(&self, session_id: SessionId, include_deleted: bool) -> EngineResult<Vec<Message>> {
        self.read(session_id, |state| {
            Ok(state.forest(include_deleted).into_iter().cloned().collect())
        })
    }

    pub fn get_message(&self, message_id: MessageId) -> EngineResult<Message> {
        let session_id = self.session_of_message(message_id)?;
        self.read(session_id, |state| state.message(message_id).cloned())
    }

    pub fn children(&self, message_id: MessageId) -> EngineResult<Vec<Message>> {
        let session_id = self.session_of_message(message_id)?;
        self.read(session_id, |state| {
            Ok(state.children(message_id)?.into_iter().cloned().collect())
        })
    }

    pub fn ancestor_path(&self, message_id: MessageId) -> EngineResult<Vec<Message>> {
        let session_id = self.session_of_message(message_id)?;
        self.read(session_id, |state| {
            Ok(state.ancestor_path(message_id)?.into_iter().cloned().collect())
        })
    }

    // -- Branches --

    pub fn create_branch(&self, session_id: SessionId, spec: BranchSpec) -> EngineResult<Branch> {
        if let Some(parent) = spec.parent_branch_id {
            self.check_branch_in(session_id, parent)?;
        }
        let id = self.ids.branch();
        self.mutate(session_id, |state, changes| {
            state.create_branch(id, spec, changes)
        })
    }

    /// Branch from the active head and switch to it.
    pub fn fork_here(&self, session_id: SessionId, name: Option<String>) -> EngineResult<Branch> {
        self.create_branch(
            session_id,
            BranchSpec {
                name,
                switch_to_new_branch: true,
                ..Default::default()
            },
        )
    }

    pub fn switch_branch(&self, session_id: SessionId, branch_id: BranchId) -> EngineResult<Branch> {
        self.check_branch_in(session_id, branch_id)?;
        self.mutate(session_id, |state, changes| {
            state.switch_branch(branch_id, changes)
        })
    }

    pub fn list_branches(
        &self,
        session_id: SessionId,
        include_deleted: bool,
    ) -> EngineResult<Vec<BranchView>> {
        self.read(session_id, |state| Ok(state.list_branches(include_deleted)))
    }

    pub fn get_branch(&self, branch_id: BranchId) -> EngineResult<BranchView> {
        let session_id = self.session_of_branch(branch_id)?;
        self.read(session_id, |state| Ok(state.branch_view(state.branch(branch_id)?)))
    }

    pub fn rename_branch(
        &self,
        branch_id: BranchId,
        name: &str,
        description: Option<String>,
    ) -> EngineResult<Branch> {
        let session_id = self.session_of_branch(branch_id)?;
        self.mutate(session_id, |state, changes| {
            state.rename_branch(branch_id, name, description, changes)
        })
    }

    pub fn delete_branch(&self, branch_id: BranchId) -> EngineResult<()> {
        let session_id = self.session_of_branch(branch_id)?;
        self.mutate(session_id, |state, changes| {
            state.delete_branch(branch_id, changes)
        })
    }

    pub fn branch_tree(&self, session_id: SessionId) -> EngineResult<BranchTree> {
        self.read(session_id, |state| state.branch_tree())
    }

    // -- Edits --

    pub fn edit_message(&self, request: EditRequest) -> EngineResult<Message> {
        let session_id = self.session_of_message(request.message_id)?;
        self.mutate(session_id, |state, changes| {
            state.record_edit(
                request.message_id,
                request.new_content,
                request.reason.unwrap_or_default(),
                request.editor_id,
                false,
                changes,
            )
        })
    }

    /// Context for a fresh reply to an edited user message. The active head
    /// moves to the reply only if the message is on the active segment.
    /// Returns `None` for assistant messages.
    pub fn begin_regeneration(&self, message_id: MessageId) -> EngineResult<Option<PendingExchange>> {
        let session_id = self.session_of_message(message_id)?;
        self.read(session_id, |state| {
            state.ensure_writable()?;
            let prompt = state.live_message(message_id)?.clone();
            if prompt.role != Role::User {
                return Ok(None);
            }
            let active = state.active_branch()?;
            let advance = state
                .segment(active)
                .contains(&message_id)
                .then_some((active.id, active.head_message_id));
            Ok(Some(PendingExchange {
                session_id,
                context: generation_context(state, message_id),
                advance,
                prompt,
            }))
        })
    }

    /// Generate and attach a new reply to an edited user message.
    pub async fn regenerate(
        &self,
        message_id: MessageId,
        generator: &dyn ReplyGenerator,
    ) -> EngineResult<Option<Message>> {
        let Some(pending) = self.begin_regeneration(message_id)? else {
            return Ok(None);
        };
        let reply = pending.generate(generator).await?;
        self.complete_exchange(pending, reply).map(Some)
    }

    pub fn edit_history(&self, message_id: MessageId) -> EngineResult<Vec<EditHistory>> {
        let session_id = self.session_of_message(message_id)?;
        self.read(session_id, |state| state.history_of(message_id))
    }

    pub fn restore_version(
        &self,
        message_id: MessageId,
        version: u32,
        editor_id: UserId,
    ) -> EngineResult<Message> {
        let session_id = self.session_of_message(message_id)?;
        self.mutate(session_id, |state, changes| {
            state.restore_version(message_id, version, editor_id, changes)
        })
    }

    pub fn diff_versions(
        &self,
        message_id: MessageId,
        from_version: u32,
        to_version: u32,
        granularity: DiffGranularity,
    ) -> EngineResult<VersionDiff> {
        let session_id = self.session_of_message(message_id)?;
        self.read(session_id, |state| {
            state.diff_versions(message_id, from_version, to_version, granularity)
        })
    }

    // -- Deletion --

    pub fn delete_message(
        &self,
        message_id: MessageId,
        cascade: bool,
    ) -> EngineResult<DeleteMessageResult> {
        let session_id = self.session_of_message(message_id)?;
        self.mutate(session_id, |state, changes| {
            state.delete_message(message_id, cascade, changes)
        })
    }

    /// Delete each id in turn. Ids already removed by an earlier cascade in
    /// the same batch are skipped rather than failed.
    pub fn batch_delete(&self, message_ids: &[MessageId], cascade: bool) -> BatchDeleteResult {
        let mut removed: HashSet<MessageId> = HashSet::new();
        let mut entries = Vec::with_capacity(message_ids.len());

        for &message_id in message_ids {
            if removed.contains(&message_id) {
                entries.push(BatchDeleteEntry {
                    message_id,
                    outcome: BatchOutcome::Skipped,
                    error: None,
                    affected_message_ids: Vec::new(),
                });
                continue;
            }
            match self.delete_message(message_id, cascade) {
                Ok(result) => {
                    removed.extend(result.affected_message_ids.iter().copied());
                    entries.push(BatchDeleteEntry {
                        message_id,
                        outcome: BatchOutcome::Deleted,
                        error: None,
                        affected_message_ids: result.affected_message_ids,
                    });
                }
                Err(e) => entries.push(BatchDeleteEntry {
                    message_id,
                    outcome: BatchOutcome::Failed,
                    error: Some(e.kind().to_string()),
                    affected_message_ids: Vec::new(),
                }),
            }
        }

        let count = |outcome: BatchOutcome| entries.iter().filter(|e| e.outcome == outcome).count();
        BatchDeleteResult {
            deleted_count: count(BatchOutcome::Deleted),
            failed_count: count(BatchOutcome::Failed),
            entries,
        }
    }

    pub fn restore_message(&self, message_id: MessageId) -> EngineResult<Message> {
        let session_id = self.session_of_message(message_id)?;
        self.mutate(session_id, |state, changes| {
            state.restore_message(message_id, changes)
        })
    }

    /// Irreversibly purge soft-deleted messages. Refuses to run without the
    /// confirmation token.
    pub fn cleanup(&self, session_id: SessionId, confirmation: Option<&str>) -> EngineResult<CleanupResult> {
        check_confirmation(confirmation)?;
        let result = self.mutate(session_id, |state, changes| Ok(state.cleanup(changes)))?;
        if let Ok(mut owners) = self.message_owner.write() {
            for id in &result.purged_message_ids {
                owners.remove(id);
            }
        }
        Ok(result)
    }

    // -- Rollback --

    pub fn rollback(
        &self,
        session_id: SessionId,
        target: MessageId,
        spec: RollbackSpec,
    ) -> EngineResult<RollbackResult> {
        let checkpoint_id = spec.save_checkpoint.then(|| self.ids.branch());
        self.mutate(session_id, |state, changes| {
            state.rollback(target, spec, checkpoint_id.unwrap_or_default(), changes)
        })
    }

    pub fn rollback_points(&self, session_id: SessionId, limit: usize) -> EngineResult<Vec<RollbackPoint>> {
        self.read(session_id, |state| state.rollback_points(limit))
    }

    pub fn forward(&self, session_id: SessionId) -> EngineResult<ForwardResult> {
        self.mutate(session_id, |state, changes| {
            let message = state.forward(changes)?;
            let branch_id = state.session.active_branch_id;
            Ok(ForwardResult {
                session_id,
                branch_id,
                message,
                remaining_steps: state.forward_steps(branch_id),
            })
        })
    }

    /// Check a session's structural invariants; see
    /// [`SessionState::verify_invariants`].
    pub fn verify(&self, session_id: SessionId) -> EngineResult<Result<(), String>> {
        self.read(session_id, |state| Ok(state.verify_invariants()))
    }
}

fn generation_context(state: &SessionState, message_id: MessageId) -> GenerationContext {
    let turns = state
        .path_ids(message_id)
        .iter()
        .filter_map(|id| state.messages.get(id))
        .map(|m| (m.role, m.content.clone()))
        .collect();
    GenerationContext {
        session_id: state.session.id,
        model_name: state.session.model_name.clone(),
        model_config: state.session.model_config.clone(),
        turns,
    }
}
