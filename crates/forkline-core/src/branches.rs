//! Branches: named, git-like pointers into the message forest.

use std::collections::HashSet;

use chrono::Utc;
use forkline_types::models::{
    Branch, BranchId, BranchStatus, BranchTree, BranchTreeNode, BranchView, Message, MessageId,
};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::graph::NewMessage;
use crate::state::SessionState;
use crate::store::ChangeSet;

const MAX_NAME_CHARS: usize = 64;

/// Parameters for a new branch.
#[derive(Debug, Clone, Default)]
pub struct BranchSpec {
    /// Fork point; the active branch head when absent.
    pub fork_message_id: Option<MessageId>,
    pub parent_branch_id: Option<BranchId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub switch_to_new_branch: bool,
}

fn validate_name(name: &str) -> EngineResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidName("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(EngineError::InvalidName(format!(
            "name is longer than {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

impl SessionState {
    fn name_taken(&self, name: &str, except: Option<BranchId>) -> bool {
        self.live_branches()
            .any(|b| b.name == name && Some(b.id) != except)
    }

    fn generated_name(&self, prefix: &str, start: usize) -> String {
        let mut n = start;
        loop {
            let candidate = format!("{}-{}", prefix, n);
            if !self.name_taken(&candidate, None) {
                return candidate;
            }
            n += 1;
        }
    }

    /// `base` if free, else `base-2`, `base-3`, ...
    pub(crate) fn unique_name(&self, base: &str) -> String {
        if self.name_taken(base, None) {
            self.generated_name(base, 2)
        } else {
            base.to_string()
        }
    }

    /// Whether `message_id` lies on the root-to-head path of a branch.
    fn on_full_path(&self, branch: &Branch, message_id: MessageId) -> bool {
        branch
            .head_message_id
            .is_some_and(|head| self.is_ancestor_or_self(message_id, head))
    }

    pub(crate) fn create_branch(
        &mut self,
        id: BranchId,
        spec: BranchSpec,
        changes: &mut ChangeSet,
    ) -> EngineResult<Branch> {
        let active = self.active_branch()?.clone();

        let fork = match spec.fork_message_id {
            Some(fork) => fork,
            None => active.head_message_id.ok_or_else(|| {
                EngineError::InvalidFork("the active branch has no messages to fork from".into())
            })?,
        };
        if self.live_message(fork).is_err() {
            return Err(EngineError::InvalidFork(format!(
                "message {} is not a live message of session {}",
                fork, self.session.id
            )));
        }

        let name = match spec.name.as_deref() {
            Some(name) => {
                let name = validate_name(name)?;
                if self.name_taken(&name, None) {
                    return Err(EngineError::DuplicateName(name));
                }
                name
            }
            None => self.generated_name("branch", self.branches.len()),
        };

        let parent_branch_id = match spec.parent_branch_id {
            Some(parent) => self.branch(parent)?.id,
            None if self.on_full_path(&active, fork) => active.id,
            None => self.main_branch_id,
        };

        let now = Utc::now();
        let branch = Branch {
            id,
            session_id: self.session.id,
            name,
            description: spec.description.unwrap_or_default(),
            parent_branch_id: Some(parent_branch_id),
            fork_message_id: Some(fork),
            head_message_id: Some(fork),
            is_main: false,
            status: BranchStatus::Active,
            create_time: now,
            update_time: now,
        };
        changes.branch(&branch);
        self.branches.insert(id, branch.clone());

        if spec.switch_to_new_branch {
            self.session.active_branch_id = id;
            changes.session(&self.session);
        }

        info!(
            session_id = self.session.id,
            branch_id = id,
            name = %branch.name,
            fork_message_id = fork,
            "created branch"
        );
        Ok(branch)
    }

    /// Append on a branch. The parent defaults to the branch head and must
    /// lie on the branch segment; the new message becomes the head.
    pub(crate) fn append_on_branch(
        &mut self,
        branch_id: BranchId,
        id: MessageId,
        mut new: NewMessage,
        changes: &mut ChangeSet,
    ) -> EngineResult<Message> {
        let branch = self.branch(branch_id)?;
        match (new.parent_id, branch.head_message_id) {
            (Some(parent), _) => {
                if !self.segment(branch).contains(&parent) {
                    return Err(EngineError::InvalidParent(format!(
                        "message {} is not on branch '{}'",
                        parent, branch.name
                    )));
                }
            }
            (None, Some(head)) => new.parent_id = Some(head),
            (None, None) if branch.is_main => {}
            (None, None) => {
                return Err(EngineError::InvalidParent(format!(
                    "branch '{}' has no message to append under",
                    branch.name
                )));
            }
        }

        let message = self.append(id, new, changes)?;
        self.set_head(branch_id, Some(message.id), changes)?;
        self.cursors.remove(&branch_id);
        Ok(message)
    }

    pub(crate) fn switch_branch(
        &mut self,
        branch_id: BranchId,
        changes: &mut ChangeSet,
    ) -> EngineResult<Branch> {
        let branch = self.branch(branch_id)?.clone();
        self.session.active_branch_id = branch_id;
        changes.session(&self.session);
        info!(session_id = self.session.id, branch_id, "switched branch");
        Ok(branch)
    }

    pub(crate) fn rename_branch(
        &mut self,
        branch_id: BranchId,
        name: &str,
        description: Option<String>,
        changes: &mut ChangeSet,
    ) -> EngineResult<Branch> {
        self.branch(branch_id)?;
        let name = validate_name(name)?;
        if self.name_taken(&name, Some(branch_id)) {
            return Err(EngineError::DuplicateName(name));
        }

        let branch = self.branch_mut(branch_id)?;
        branch.name = name;
        if let Some(description) = description {
            branch.description = description;
        }
        branch.update_time = Utc::now();
        changes.branch(branch);
        Ok(branch.clone())
    }

    /// Mark a branch deleted. Messages are untouched; child branches move up
    /// to the deleted branch's parent.
    pub(crate) fn delete_branch(
        &mut self,
        branch_id: BranchId,
        changes: &mut ChangeSet,
    ) -> EngineResult<()> {
        let branch = self.branch(branch_id)?;
        if branch.is_main {
            return Err(EngineError::MainBranchProtected);
        }
        let new_parent = branch.parent_branch_id.unwrap_or(self.main_branch_id);
        let now = Utc::now();

        for child in self.branches.values_mut() {
            if child.is_live() && child.parent_branch_id == Some(branch_id) {
                child.parent_branch_id = Some(new_parent);
                child.update_time = now;
                changes.branch(child);
            }
        }

        let branch = self.branch_mut(branch_id)?;
        branch.status = BranchStatus::Deleted;
        branch.update_time = now;
        changes.branch(branch);
        self.cursors.remove(&branch_id);

        if self.session.active_branch_id == branch_id {
            self.session.active_branch_id = self.main_branch_id;
            changes.session(&self.session);
        }
        info!(session_id = self.session.id, branch_id, "deleted branch");
        Ok(())
    }

    pub fn branch_view(&self, branch: &Branch) -> BranchView {
        let preview_of =
            |id: Option<MessageId>| id.and_then(|id| self.messages.get(&id)).map(|m| m.preview());
        BranchView {
            fork_message_preview: preview_of(branch.fork_message_id),
            head_message_preview: preview_of(branch.head_message_id),
            message_count: branch
                .head_message_id
                .map(|head| self.path_ids(head).len() as u32)
                .unwrap_or(0),
            divergence_depth: self.divergence_depth(branch),
            branch: branch.clone(),
        }
    }

    pub fn list_branches(&self, include_deleted: bool) -> Vec<BranchView> {
        let mut branches: Vec<&Branch> = self
            .branches
            .values()
            .filter(|b| include_deleted || b.is_live())
            .collect();
        branches.sort_by_key(|b| (b.create_time, b.id));
        branches.into_iter().map(|b| self.branch_view(b)).collect()
    }

    /// Live branches arranged under main by `parent_branch_id`.
    pub fn branch_tree(&self) -> EngineResult<BranchTree> {
        let main = self.main_branch()?;

        let mut active_path = HashSet::new();
        let mut cursor = self.branch(self.session.active_branch_id).ok();
        while let Some(branch) = cursor {
            if !active_path.insert(branch.id) {
                break;
            }
            cursor = branch.parent_branch_id.and_then(|p| self.branch(p).ok());
        }

        let mut live: Vec<&Branch> = self.live_branches().collect();
        live.sort_by_key(|b| (b.create_time, b.id));

        // Branches whose parent is gone hang off main so none are lost.
        let parent_of = |b: &Branch| -> Option<BranchId> {
            if b.is_main {
                return None;
            }
            match b.parent_branch_id {
                Some(p) if self.branch(p).is_ok() && p != b.id => Some(p),
                _ => Some(main.id),
            }
        };

        let mut visited = HashSet::new();
        let root = self.tree_node(main, 0, &live, &parent_of, &active_path, &mut visited);
        Ok(BranchTree {
            session_id: self.session.id,
            active_branch_id: self.session.active_branch_id,
            total_branches: live.len(),
            root,
        })
    }

    fn tree_node(
        &self,
        branch: &Branch,
        depth: u32,
        live: &[&Branch],
        parent_of: &dyn Fn(&Branch) -> Option<BranchId>,
        active_path: &HashSet<BranchId>,
        visited: &mut HashSet<BranchId>,
    ) -> BranchTreeNode {
        visited.insert(branch.id);
        let children = live
            .iter()
            .filter(|b| parent_of(b) == Some(branch.id) && !visited.contains(&b.id))
            .copied()
            .collect::<Vec<_>>()
            .into_iter()
            .map(|child| self.tree_node(child, depth + 1, live, parent_of, active_path, visited))
            .collect();

        BranchTreeNode {
            id: branch.id,
            name: branch.name.clone(),
            description: branch.description.clone(),
            is_main: branch.is_main,
            status: branch.status,
            fork_message_id: branch.fork_message_id,
            head_message_id: branch.head_message_id,
            create_time: branch.create_time,
            children,
            depth,
            is_on_active_path: active_path.contains(&branch.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::empty_state;
    use forkline_types::models::Role;

    /// m1 (user) -> m2 (assistant) on main.
    fn two_turns() -> SessionState {
        let mut state = empty_state();
        let mut changes = ChangeSet::default();
        state
            .append(1, NewMessage::new(None, Role::User, "hi"), &mut changes)
            .unwrap();
        state
            .append(2, NewMessage::new(Some(1), Role::Assistant, "hello"), &mut changes)
            .unwrap();
        let main = state.main_branch_id;
        state.set_head(main, Some(2), &mut changes).unwrap();
        state
    }

    fn spec(fork: Option<MessageId>, name: Option<&str>, switch: bool) -> BranchSpec {
        BranchSpec {
            fork_message_id: fork,
            name: name.map(String::from),
            switch_to_new_branch: switch,
            ..Default::default()
        }
    }

    #[test]
    fn create_defaults_to_active_head_and_generated_name() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        let branch = state.create_branch(50, spec(None, None, false), &mut changes).unwrap();

        assert_eq!(branch.fork_message_id, Some(2));
        assert_eq!(branch.head_message_id, Some(2));
        assert_eq!(branch.name, "branch-1");
        assert_eq!(branch.parent_branch_id, Some(state.main_branch_id));
        assert_eq!(state.session.active_branch_id, state.main_branch_id);
    }

    #[test]
    fn create_rejects_duplicates_and_foreign_forks() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        state
            .create_branch(50, spec(Some(1), Some("alt"), true), &mut changes)
            .unwrap();
        assert_eq!(state.session.active_branch_id, 50);

        let err = state
            .create_branch(51, spec(Some(1), Some("alt"), false), &mut changes)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(_)));

        let err = state
            .create_branch(51, spec(Some(404), None, false), &mut changes)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidFork(_)));
        assert!(!state.branches.contains_key(&51));
    }

    #[test]
    fn main_cannot_be_deleted() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        let main = state.main_branch_id;
        let err = state.delete_branch(main, &mut changes).unwrap_err();
        assert!(matches!(err, EngineError::MainBranchProtected));
    }

    #[test]
    fn deleting_active_branch_reactivates_main_and_reparents_children() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        state
            .create_branch(50, spec(Some(1), Some("alt"), true), &mut changes)
            .unwrap();
        state
            .create_branch(51, spec(Some(1), Some("alt-2"), true), &mut changes)
            .unwrap();
        assert_eq!(state.branches[&51].parent_branch_id, Some(50));

        state.switch_branch(50, &mut changes).unwrap();
        state.delete_branch(50, &mut changes).unwrap();

        assert_eq!(state.session.active_branch_id, state.main_branch_id);
        assert_eq!(state.branches[&51].parent_branch_id, Some(state.main_branch_id));
        assert!(matches!(
            state.switch_branch(50, &mut changes),
            Err(EngineError::BranchNotFound(50))
        ));
        // The forest is untouched.
        assert_eq!(state.forest(false).len(), 2);
    }

    #[test]
    fn rename_validates_names() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        state
            .create_branch(50, spec(Some(1), Some("alt"), false), &mut changes)
            .unwrap();
        let main = state.main_branch_id;

        assert!(matches!(
            state.rename_branch(50, "main", None, &mut changes),
            Err(EngineError::DuplicateName(_))
        ));
        assert!(matches!(
            state.rename_branch(50, "   ", None, &mut changes),
            Err(EngineError::InvalidName(_))
        ));
        let renamed = state
            .rename_branch(50, "retry", Some("second try".into()), &mut changes)
            .unwrap();
        assert_eq!(renamed.name, "retry");
        assert_eq!(renamed.description, "second try");
        // Renaming to its own name is fine.
        state.rename_branch(main, "main", None, &mut changes).unwrap();
    }

    #[test]
    fn tree_marks_active_path() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        state
            .create_branch(50, spec(Some(1), Some("alt"), true), &mut changes)
            .unwrap();
        state
            .create_branch(51, spec(Some(1), Some("deeper"), true), &mut changes)
            .unwrap();
        state
            .create_branch(52, spec(Some(2), Some("side"), false), &mut changes)
            .unwrap();

        let tree = state.branch_tree().unwrap();
        assert_eq!(tree.total_branches, 4);
        assert_eq!(tree.active_branch_id, 51);
        assert!(tree.root.is_main);
        assert!(tree.root.is_on_active_path);

        let names: Vec<&str> = tree.root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alt", "side"]);
        let alt = &tree.root.children[0];
        assert!(alt.is_on_active_path);
        assert_eq!(alt.depth, 1);
        assert_eq!(alt.children[0].name, "deeper");
        assert_eq!(alt.children[0].depth, 2);
        assert!(!tree.root.children[1].is_on_active_path);
    }

    #[test]
    fn append_on_branch_follows_the_segment() {
        let mut state = two_turns();
        let mut changes = ChangeSet::default();
        state
            .create_branch(50, spec(Some(1), Some("alt"), true), &mut changes)
            .unwrap();

        // Message 2 lives on main, above nothing on "alt".
        let err = state
            .append_on_branch(50, 3, NewMessage::new(Some(2), Role::User, "x"), &mut changes)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParent(_)));

        let m3 = state
            .append_on_branch(50, 3, NewMessage::new(None, Role::User, "again"), &mut changes)
            .unwrap();
        assert_eq!(m3.parent_id, Some(1));
        assert_eq!(state.branch(50).unwrap().head_message_id, Some(3));
        assert_eq!(state.divergence_depth(state.branch(50).unwrap()), 1);
        assert_eq!(state.main_branch().unwrap().head_message_id, Some(2));
        state.verify_invariants().unwrap();
    }
}
