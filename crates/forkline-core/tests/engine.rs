use std::sync::Arc;

use forkline_core::{
    BranchSpec, EchoGenerator, EditRequest, Engine, EngineConfig, EngineError, MemoryStore,
    NewMessage, NewSession, ReplyGenerator, RollbackSpec, SendMessage, Store, CLEANUP_CONFIRMATION,
};
use forkline_types::diff::DiffGranularity;
use forkline_types::models::{BatchOutcome, MessageId, Role, Session, SessionStatus};

fn engine() -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
    (engine, store)
}

fn session(engine: &Engine) -> Session {
    engine
        .create_session(NewSession {
            user_id: 1,
            title: "scenario".into(),
            description: None,
            model_name: None,
            model_config: None,
        })
        .unwrap()
}

fn append(engine: &Engine, session_id: i64, parent: Option<MessageId>, role: Role, text: &str) -> MessageId {
    engine
        .append_message(session_id, None, NewMessage::new(parent, role, text))
        .unwrap()
        .id
}

/// m1 (user) -> m2 (assistant) on main.
fn two_turns(engine: &Engine) -> (Session, MessageId, MessageId) {
    let s = session(engine);
    let m1 = append(engine, s.id, None, Role::User, "hello");
    let m2 = append(engine, s.id, Some(m1), Role::Assistant, "hi there");
    (s, m1, m2)
}

#[test]
fn new_session_has_an_active_main_branch() {
    let (engine, _) = engine();
    let s = session(&engine);
    assert_eq!(s.model_name, "gpt-4");

    let detail = engine.get_session(s.id).unwrap();
    let active = detail.active_branch.unwrap();
    assert_eq!(active.name, "main");
    assert_eq!(active.head_message_id, None);

    let branches = engine.list_branches(s.id, false).unwrap();
    assert_eq!(branches.len(), 1);
    assert!(branches[0].branch.is_main);
}

#[test]
fn fork_scenario_builds_the_expected_tree() {
    let (engine, _) = engine();
    let (s, m1, m2) = two_turns(&engine);

    let alt = engine
        .create_branch(
            s.id,
            BranchSpec {
                fork_message_id: Some(m1),
                name: Some("alt".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(alt.head_message_id, Some(m1));

    let m3 = engine
        .append_message(s.id, Some(alt.id), NewMessage::new(Some(m1), Role::User, "another take"))
        .unwrap();

    let tree = engine.branch_tree(s.id).unwrap();
    assert_eq!(tree.total_branches, 2);
    assert_eq!(tree.root.name, "main");
    assert_eq!(tree.root.head_message_id, Some(m2));
    assert_eq!(tree.root.children.len(), 1);
    let child = &tree.root.children[0];
    assert_eq!(child.name, "alt");
    assert_eq!(child.head_message_id, Some(m3.id));
    assert_eq!(child.fork_message_id, Some(m1));
    assert_eq!(child.depth, 1);

    let view = engine.get_branch(alt.id).unwrap();
    assert_eq!(view.divergence_depth, 1);

    let children: Vec<MessageId> = engine.children(m1).unwrap().iter().map(|m| m.id).collect();
    assert_eq!(children, vec![m2, m3.id]);
    engine.verify(s.id).unwrap().unwrap();
}

#[test]
fn rollback_scenario_reports_one_skipped_message() {
    let (engine, _) = engine();
    let (s, m1, m2) = two_turns(&engine);

    let result = engine
        .rollback(
            s.id,
            m1,
            RollbackSpec {
                reason: Some("retry".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(result.old_head_id, m2);
    assert_eq!(result.new_head_id, m1);
    assert_eq!(result.skipped_message_count, 1);

    // Nothing was deleted.
    assert_eq!(engine.forest(s.id, false).unwrap().len(), 2);
    assert_eq!(engine.history(s.id, None).unwrap().len(), 1);
}

#[test]
fn forward_undoes_rollback_until_something_is_appended() {
    let (engine, _) = engine();
    let (s, m1, m2) = two_turns(&engine);

    engine.rollback(s.id, m1, RollbackSpec::default()).unwrap();
    let step = engine.forward(s.id).unwrap();
    assert_eq!(step.message.map(|m| m.id), Some(m2));
    assert_eq!(step.remaining_steps, 0);
    assert_eq!(engine.history(s.id, None).unwrap().last().unwrap().id, m2);

    engine.rollback(s.id, m1, RollbackSpec::default()).unwrap();
    append(&engine, s.id, None, Role::Assistant, "a different reply");
    assert!(engine.forward(s.id).unwrap().message.is_none());
    engine.verify(s.id).unwrap().unwrap();
}

#[test]
fn rollback_target_must_be_on_the_active_path() {
    let (engine, _) = engine();
    let (s, m1, _) = two_turns(&engine);
    let side = engine
        .create_branch(
            s.id,
            BranchSpec {
                fork_message_id: Some(m1),
                ..Default::default()
            },
        )
        .unwrap();
    let stray = engine
        .append_message(s.id, Some(side.id), NewMessage::new(None, Role::User, "side"))
        .unwrap();

    let err = engine.rollback(s.id, stray.id, RollbackSpec::default()).unwrap_err();
    assert!(matches!(err, EngineError::TargetNotOnActivePath(_)));
}

#[test]
fn checkpoint_branch_keeps_rolled_back_messages_reachable() {
    let (engine, _) = engine();
    let (s, m1, m2) = two_turns(&engine);
    let result = engine
        .rollback(
            s.id,
            m1,
            RollbackSpec {
                save_checkpoint: true,
                ..Default::default()
            },
        )
        .unwrap();

    let checkpoint = engine.get_branch(result.checkpoint_branch_id.unwrap()).unwrap();
    assert_eq!(checkpoint.branch.name, format!("checkpoint-{}", m2));
    assert_eq!(checkpoint.branch.head_message_id, Some(m2));
    let path: Vec<MessageId> = engine
        .history(s.id, Some(checkpoint.branch.id))
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(path, vec![m1, m2]);
}

#[test]
fn edits_keep_contiguous_versions_and_restore_appends() {
    let (engine, _) = engine();
    let (_, m1, _) = two_turns(&engine);

    for text in ["hello world", "hello brave world"] {
        engine
            .edit_message(EditRequest {
                message_id: m1,
                new_content: text.into(),
                reason: None,
                editor_id: 1,
            })
            .unwrap();
    }
    let history = engine.edit_history(m1).unwrap();
    let indices: Vec<u32> = history.iter().map(|h| h.version_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(history.iter().filter(|h| h.is_current).count(), 1);
    assert!(engine.get_message(m1).unwrap().edited);

    let restored = engine.restore_version(m1, 0, 1).unwrap();
    assert_eq!(restored.content, "hello");
    let history = engine.edit_history(m1).unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].content, history[0].content);
    assert!(history[3].is_current);

    let err = engine.restore_version(m1, 9, 1).unwrap_err();
    assert!(matches!(err, EngineError::VersionNotFound { version: 9, .. }));
}

#[test]
fn diff_between_versions_replays_exactly() {
    let (engine, _) = engine();
    let (_, m1, _) = two_turns(&engine);
    engine
        .edit_message(EditRequest {
            message_id: m1,
            new_content: "hello\nsecond line".into(),
            reason: Some("expand".into()),
            editor_id: 1,
        })
        .unwrap();

    for granularity in [DiffGranularity::Line, DiffGranularity::Char] {
        let diff = engine.diff_versions(m1, 0, 1, granularity).unwrap();
        let replayed = forkline_core::diff::apply("hello", &diff.ops).unwrap();
        assert_eq!(replayed, "hello\nsecond line");
        let back = forkline_core::diff::apply(&replayed, &forkline_core::diff::invert(&diff.ops)).unwrap();
        assert_eq!(back, "hello");
    }
}

#[test]
fn cascade_delete_retargets_heads_and_cleanup_purges() {
    let (engine, store) = engine();
    let (s, m1, m2) = two_turns(&engine);
    let m3 = append(&engine, s.id, Some(m2), Role::User, "more");

    let err = engine.delete_message(m2, false).unwrap_err();
    assert!(matches!(err, EngineError::HasChildren(_)));

    let result = engine.delete_message(m2, true).unwrap();
    assert_eq!(result.affected_message_ids, vec![m2, m3]);
    assert_eq!(result.new_head_id, Some(m1));
    assert_eq!(engine.history(s.id, None).unwrap().len(), 1);
    assert_eq!(engine.get_message(m1).unwrap().children_count, 0);

    assert!(matches!(
        engine.cleanup(s.id, Some("yes")),
        Err(EngineError::ConfirmationRequired)
    ));
    let purged = engine.cleanup(s.id, Some(CLEANUP_CONFIRMATION)).unwrap();
    assert_eq!(purged.purged_message_ids, vec![m2, m3]);
    assert_eq!(store.load_messages(s.id).unwrap().len(), 1);
    assert!(matches!(
        engine.restore_message(m2),
        Err(EngineError::MessageNotFound(_))
    ));
    engine.verify(s.id).unwrap().unwrap();
}

#[test]
fn batch_delete_skips_ids_removed_by_an_earlier_cascade() {
    let (engine, _) = engine();
    let (s, m1, m2) = two_turns(&engine);
    let result = engine.batch_delete(&[m1, m2, 9999], true);
    let outcomes: Vec<BatchOutcome> = result.entries.iter().map(|e| e.outcome).collect();
    assert_eq!(
        outcomes,
        vec![BatchOutcome::Deleted, BatchOutcome::Skipped, BatchOutcome::Failed]
    );
    assert_eq!(result.entries[2].error.as_deref(), Some("MESSAGE_NOT_FOUND"));
    assert!(engine.history(s.id, None).unwrap().is_empty());
}

#[test]
fn main_branch_cannot_be_deleted_and_branches_stay_in_their_session() {
    let (engine, _) = engine();
    let (s, _, _) = two_turns(&engine);
    let other = session(&engine);
    let main = engine.get_session(s.id).unwrap().active_branch.unwrap().id;

    assert!(matches!(
        engine.delete_branch(main),
        Err(EngineError::MainBranchProtected)
    ));
    let foreign = engine.get_session(other.id).unwrap().active_branch.unwrap().id;
    assert!(matches!(
        engine.switch_branch(s.id, foreign),
        Err(EngineError::CrossSessionBranch { .. })
    ));
}

#[test]
fn archived_sessions_refuse_mutations() {
    let (engine, _) = engine();
    let (s, m1, _) = two_turns(&engine);
    let archived = engine.archive_session(s.id).unwrap();
    assert_eq!(archived.status, SessionStatus::Archived);

    assert!(matches!(
        engine.rollback(s.id, m1, RollbackSpec::default()),
        Err(EngineError::SessionArchived(_))
    ));
    assert_eq!(engine.history(s.id, None).unwrap().len(), 2);
    assert!(engine.list_sessions(1, 10).unwrap().is_empty());
}

#[test]
fn sessions_reload_from_the_store() {
    let store = Arc::new(MemoryStore::new());
    let (s, m2) = {
        let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
        let (s, _, m2) = two_turns(&engine);
        (s, m2)
    };

    let engine = Engine::open(store, EngineConfig::default()).unwrap();
    let history = engine.history(s.id, None).unwrap();
    assert_eq!(history.last().map(|m| m.id), Some(m2));
    // Allocation continues past the persisted ids.
    let next = append(&engine, s.id, None, Role::User, "again");
    assert!(next > m2);
}

#[tokio::test]
async fn send_message_appends_prompt_and_reply() {
    let (engine, _) = engine();
    let s = session(&engine);

    let reply = engine
        .send_message(SendMessage::text(s.id, "ping"), &EchoGenerator)
        .await
        .unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "echo: ping");

    let history = engine.history(s.id, None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "ping");
    assert_eq!(history[1].parent_id, Some(history[0].id));

    assert!(matches!(
        engine.send_message(SendMessage::text(s.id, "   "), &EchoGenerator).await,
        Err(EngineError::EmptyContent)
    ));
}

#[tokio::test]
async fn reply_does_not_move_a_head_that_moved_meanwhile() {
    let (engine, _) = engine();
    let s = session(&engine);

    let pending = engine.begin_exchange(SendMessage::text(s.id, "first")).unwrap();
    let racer = append(&engine, s.id, None, Role::User, "raced ahead");
    let reply = EchoGenerator.generate(&pending.context).await.unwrap();
    let reply = engine.complete_exchange(pending, reply).unwrap();

    assert_eq!(engine.history(s.id, None).unwrap().last().unwrap().id, racer);
    assert!(engine.get_message(reply.id).is_ok());
    engine.verify(s.id).unwrap().unwrap();
}

#[tokio::test]
async fn regenerating_an_edited_prompt_adds_a_sibling_reply() {
    let (engine, _) = engine();
    let s = session(&engine);
    let first = engine
        .send_message(SendMessage::text(s.id, "ping"), &EchoGenerator)
        .await
        .unwrap();
    let prompt = first.parent_id.unwrap();

    engine
        .edit_message(EditRequest {
            message_id: prompt,
            new_content: "pong".into(),
            reason: None,
            editor_id: 1,
        })
        .unwrap();
    let second = engine.regenerate(prompt, &EchoGenerator).await.unwrap().unwrap();
    assert_eq!(second.content, "echo: pong");

    let siblings: Vec<MessageId> = engine.children(prompt).unwrap().iter().map(|m| m.id).collect();
    assert_eq!(siblings, vec![first.id, second.id]);
    assert_eq!(engine.history(s.id, None).unwrap().last().unwrap().id, second.id);

    // Assistant messages are not regenerated.
    assert!(engine.regenerate(second.id, &EchoGenerator).await.unwrap().is_none());
}
