//! Message forest operations.
//!
//! Every message has at most one parent and is only ever attached under a
//! message that already exists, so the parent relation stays acyclic. Child
//! lists and `children_count` are maintained on each append or delete rather
//! than rebuilt from a scan.

use chrono::Utc;
use forkline_types::models::{Branch, Message, MessageId, MessageType, Metadata, Role};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::state::SessionState;
use crate::store::ChangeSet;

/// Input for a new forest node.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub parent_id: Option<MessageId>,
    pub role: Role,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub token_count: Option<u32>,
    pub metadata: Metadata,
}

impl NewMessage {
    pub fn new(parent_id: Option<MessageId>, role: Role, content: impl Into<String>) -> Self {
        Self {
            parent_id,
            role,
            content: content.into(),
            message_type: MessageType::Text,
            attachments: Vec::new(),
            token_count: None,
            metadata: Metadata::new(),
        }
    }
}

/// Rough token estimate used when the generator does not report one.
pub fn estimate_tokens(content: &str) -> u32 {
    let chars = content.chars().count() as u32;
    chars.div_ceil(4)
}

impl SessionState {
    /// Any message of this session, soft-deleted or not.
    pub fn message(&self, id: MessageId) -> EngineResult<&Message> {
        self.messages
            .get(&id)
            .ok_or(EngineError::MessageNotFound(id))
    }

    /// A message of this session that is not soft-deleted.
    pub fn live_message(&self, id: MessageId) -> EngineResult<&Message> {
        self.messages
            .get(&id)
            .filter(|m| !m.deleted)
            .ok_or(EngineError::MessageNotFound(id))
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> EngineResult<&mut Message> {
        self.messages
            .get_mut(&id)
            .ok_or(EngineError::MessageNotFound(id))
    }

    /// Attach a new node under `new.parent_id`. The parent must be a live
    /// message of this session.
    pub(crate) fn append(
        &mut self,
        id: MessageId,
        new: NewMessage,
        changes: &mut ChangeSet,
    ) -> EngineResult<Message> {
        if new.content.trim().is_empty() {
            return Err(EngineError::EmptyContent);
        }
        if let Some(parent_id) = new.parent_id {
            if self.live_message(parent_id).is_err() {
                return Err(EngineError::InvalidParent(format!(
                    "message {} is not a live message of session {}",
                    parent_id, self.session.id
                )));
            }
        }

        let token_count = new
            .token_count
            .unwrap_or_else(|| estimate_tokens(&new.content));
        let message = Message {
            id,
            session_id: self.session.id,
            parent_id: new.parent_id,
            role: new.role,
            content: new.content,
            message_type: new.message_type,
            attachments: new.attachments,
            token_count,
            edited: false,
            create_time: Utc::now(),
            metadata: new.metadata,
            children_count: 0,
            deleted: false,
        };

        match message.parent_id {
            Some(parent_id) => {
                self.children.entry(parent_id).or_default().push(id);
                let parent = self.message_mut(parent_id)?;
                parent.children_count += 1;
                changes.message(parent);
            }
            None => self.roots.push(id),
        }

        debug!(
            session_id = self.session.id,
            message_id = id,
            parent_id = ?message.parent_id,
            role = message.role.as_str(),
            "appended message"
        );
        changes.message(&message);
        self.messages.insert(id, message.clone());
        Ok(message)
    }

    /// Live children of a message in creation order.
    pub fn children(&self, id: MessageId) -> EngineResult<Vec<&Message>> {
        self.message(id)?;
        Ok(self
            .children
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|c| self.messages.get(c))
                    .filter(|m| !m.deleted)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Ids from the forest root down to `id`, inclusive. Empty if `id` is
    /// unknown.
    pub fn path_ids(&self, id: MessageId) -> Vec<MessageId> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(message) = self.messages.get(&current) else {
                break;
            };
            path.push(current);
            // A corrupt store could hand us a cycle; never walk further than
            // the forest is large.
            if path.len() > self.messages.len() {
                break;
            }
            cursor = message.parent_id;
        }
        path.reverse();
        path
    }

    /// Messages from the forest root down to `id`, inclusive.
    pub fn ancestor_path(&self, id: MessageId) -> EngineResult<Vec<&Message>> {
        self.message(id)?;
        Ok(self
            .path_ids(id)
            .iter()
            .filter_map(|m| self.messages.get(m))
            .collect())
    }

    pub fn is_ancestor_or_self(&self, ancestor: MessageId, node: MessageId) -> bool {
        let mut cursor = Some(node);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.messages.len() {
                return false;
            }
            cursor = self.messages.get(&current).and_then(|m| m.parent_id);
        }
        false
    }

    /// Live nodes of the subtree rooted at `id`, preorder, `id` first.
    pub(crate) fn live_subtree(&self, id: MessageId) -> Vec<MessageId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.messages.get(&current) {
                Some(m) if !m.deleted => out.push(current),
                _ => continue,
            }
            if let Some(kids) = self.children.get(&current) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }

    /// The part of the forest a branch owns a view of: fork point down to
    /// head, inclusive. Main has no fork point and spans root to head.
    pub fn segment(&self, branch: &Branch) -> Vec<MessageId> {
        let Some(head) = branch.head_message_id else {
            return Vec::new();
        };
        let path = self.path_ids(head);
        match branch.fork_message_id {
            Some(fork) => match path.iter().position(|id| *id == fork) {
                Some(start) => path[start..].to_vec(),
                None => Vec::new(),
            },
            None => path,
        }
    }

    pub fn divergence_depth(&self, branch: &Branch) -> u32 {
        self.segment(branch).len().saturating_sub(1) as u32
    }

    /// Every message of the session in creation order.
    pub fn forest(&self, include_deleted: bool) -> Vec<&Message> {
        let mut all: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| include_deleted || !m.deleted)
            .collect();
        all.sort_by_key(|m| (m.create_time, m.id));
        all
    }

    /// Check the structural invariants of the session image. Returns a
    /// description of the first violation found.
    pub fn verify_invariants(&self) -> Result<(), String> {
        for message in self.messages.values() {
            if self.path_ids(message.id).len() > self.messages.len() {
                return Err(format!("cycle through message {}", message.id));
            }
            if let Some(parent) = message.parent_id {
                if !self.messages.contains_key(&parent) {
                    return Err(format!("message {} has a dangling parent", message.id));
                }
                if !message.deleted && self.messages[&parent].deleted {
                    return Err(format!("live message {} under deleted parent", message.id));
                }
            }
            let live_children = self
                .children
                .get(&message.id)
                .map(|kids| {
                    kids.iter()
                        .filter(|k| self.messages.get(k).is_some_and(|m| !m.deleted))
                        .count()
                })
                .unwrap_or(0);
            if !message.deleted && live_children as u32 != message.children_count {
                return Err(format!(
                    "message {} caches {} children but has {}",
                    message.id, message.children_count, live_children
                ));
            }
        }

        let mains = self.live_branches().filter(|b| b.is_main).count();
        if mains != 1 {
            return Err(format!("{} main branches", mains));
        }

        for branch in self.live_branches() {
            let Some(head) = branch.head_message_id else {
                continue;
            };
            if self.live_message(head).is_err() {
                return Err(format!("branch {} head {} is not live", branch.id, head));
            }
            if let Some(fork) = branch.fork_message_id {
                if !self.is_ancestor_or_self(fork, head) {
                    return Err(format!(
                        "branch {} head {} is not reachable from fork {}",
                        branch.id, head, fork
                    ));
                }
            }
        }
        Ok(())
    }
}
