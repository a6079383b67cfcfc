use chrono::Utc;
use forkline_types::models::{Branch, BranchStatus, Metadata, Session, SessionStatus};

use crate::state::SessionState;

/// Session 1 owned by user 7 with an empty main branch.
pub(crate) fn empty_state() -> SessionState {
    let now = Utc::now();
    let session = Session {
        id: 1,
        title: "test".into(),
        description: String::new(),
        user_id: 7,
        active_branch_id: 1,
        model_name: "echo".into(),
        model_config: Metadata::new(),
        status: SessionStatus::Active,
        create_time: now,
        last_active_time: now,
    };
    let main = Branch {
        id: 1,
        session_id: 1,
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
    SessionState::new(session, main)
}
