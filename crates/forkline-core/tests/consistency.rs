use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use forkline_core::{
    BranchSpec, ChangeSet, CLEANUP_CONFIRMATION, EditRequest, Engine, EngineConfig, EngineError,
    MemoryStore, NewMessage, NewSession, RollbackSpec, Store, Watermarks,
};
use forkline_types::models::{
    Branch, BranchId, EditHistory, Message, MessageId, Role, Session, SessionId, UserId,
};

/// Memory store whose next commit can be held open and then failed.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Option<Receiver<()>>>,
}

impl GatedStore {
    /// Arm the gate. Returns (entered, release): the store signals `entered`
    /// once the next commit is blocked and fails it when `release` fires.
    fn arm(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.entered.lock().unwrap() = Some(entered_tx);
        *self.release.lock().unwrap() = Some(release_rx);
        self.armed.store(true, Ordering::SeqCst);
        (entered_rx, release_tx)
    }
}

impl Store for GatedStore {
    fn watermarks(&self) -> Result<Watermarks> {
        self.inner.watermarks()
    }

    fn load_session(&self, id: SessionId) -> Result<Option<Session>> {
        self.inner.load_session(id)
    }

    fn list_sessions(&self, user_id: UserId, limit: u32) -> Result<Vec<Session>> {
        self.inner.list_sessions(user_id, limit)
    }

    fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>> {
        self.inner.load_messages(session_id)
    }

    fn load_branches(&self, session_id: SessionId) -> Result<Vec<Branch>> {
        self.inner.load_branches(session_id)
    }

    fn load_edits(&self, session_id: SessionId) -> Result<Vec<EditHistory>> {
        self.inner.load_edits(session_id)
    }

    fn session_of_message(&self, message_id: MessageId) -> Result<Option<SessionId>> {
        self.inner.session_of_message(message_id)
    }

    fn session_of_branch(&self, branch_id: BranchId) -> Result<Option<SessionId>> {
        self.inner.session_of_branch(branch_id)
    }

    fn commit(&self, changes: &ChangeSet) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let entered = self.entered.lock().unwrap().take();
            let release = self.release.lock().unwrap().take();
            if let (Some(entered), Some(release)) = (entered, release) {
                entered.send(()).ok();
                release.recv().ok();
            }
            return Err(anyhow!("disk full"));
        }
        self.inner.commit(changes)
    }
}

fn new_session(engine: &Engine) -> Session {
    engine
        .create_session(NewSession {
            user_id: 1,
            title: "consistency".into(),
            description: None,
            model_name: None,
            model_config: None,
        })
        .unwrap()
}

fn head_path(engine: &Engine, session_id: SessionId) -> Vec<MessageId> {
    engine
        .history(session_id, None)
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect()
}

fn assert_consistent(store: Arc<dyn Store>, engine: &Engine, session_id: SessionId) {
    engine.verify(session_id).unwrap().unwrap();
    let reloaded = Engine::open(store, EngineConfig::default()).unwrap();
    reloaded.verify(session_id).unwrap().unwrap();
    assert_eq!(
        head_path(&reloaded, session_id),
        head_path(engine, session_id)
    );
}

#[test]
fn failed_commit_is_invisible_and_never_persisted() {
    let store = Arc::new(GatedStore::default());
    let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
    let s = new_session(&engine);
    let root = engine
        .append_message(s.id, None, NewMessage::new(None, Role::User, "root"))
        .unwrap()
        .id;

    let (entered, release) = store.arm();
    thread::scope(|scope| {
        let doomed = scope.spawn(|| {
            engine.append_message(s.id, None, NewMessage::new(Some(root), Role::User, "doomed"))
        });
        entered.recv().unwrap();

        // The pending append is not visible while its commit is in flight.
        assert_eq!(head_path(&engine, s.id), vec![root]);
        assert_eq!(engine.get_message(root).unwrap().children_count, 0);

        let follower = scope.spawn(|| {
            engine.append_message(s.id, None, NewMessage::new(None, Role::Assistant, "after"))
        });
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();

        let doomed = doomed.join().unwrap();
        assert!(matches!(doomed, Err(EngineError::Storage(_))));
        let follower = follower.join().unwrap().unwrap();
        assert_eq!(follower.parent_id, Some(root));
    });

    let path = head_path(&engine, s.id);
    assert_eq!(path.len(), 2);
    assert_eq!(path[0], root);
    assert!(
        store
            .load_messages(s.id)
            .unwrap()
            .iter()
            .all(|m| m.content != "doomed")
    );
    assert_consistent(store, &engine, s.id);
}

#[test]
fn purged_ids_are_not_reissued_after_reopen() {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
    let s = new_session(&engine);
    let m1 = engine
        .append_message(s.id, None, NewMessage::new(None, Role::User, "keep"))
        .unwrap()
        .id;
    let m2 = engine
        .append_message(s.id, None, NewMessage::new(Some(m1), Role::Assistant, "drop"))
        .unwrap()
        .id;
    engine.delete_message(m2, false).unwrap();
    engine.cleanup(s.id, Some(CLEANUP_CONFIRMATION)).unwrap();
    drop(engine);

    let engine = Engine::open(store, EngineConfig::default()).unwrap();
    let next = engine
        .append_message(s.id, None, NewMessage::new(Some(m1), Role::Assistant, "new"))
        .unwrap()
        .id;
    assert!(next > m2);
}

#[test]
fn concurrent_mutations_keep_the_forest_sound() {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
    let s = new_session(&engine);
    engine
        .append_message(s.id, None, NewMessage::new(None, Role::User, "root"))
        .unwrap();

    let session_id = s.id;
    thread::scope(|scope| {
        for worker in 0..4 {
            let engine = &engine;
            scope.spawn(move || {
                for step in 0..40 {
                    // Outcomes depend on interleaving; only soundness is checked.
                    match (worker + step) % 4 {
                        0 => {
                            let text = format!("w{}-{}", worker, step);
                            engine
                                .append_message(session_id, None, NewMessage::new(None, Role::User, &text))
                                .ok();
                        }
                        1 => {
                            let path = head_path(engine, session_id);
                            if path.len() > 2 {
                                let target = path[path.len() / 2];
                                engine.rollback(session_id, target, RollbackSpec::default()).ok();
                            }
                        }
                        2 => {
                            engine.forward(session_id).ok();
                        }
                        _ => {
                            let path = head_path(engine, session_id);
                            if path.len() > 3 {
                                engine.delete_message(path[path.len() - 2], true).ok();
                            }
                        }
                    }
                }
            });
        }
    });

    assert_consistent(store, &engine, s.id);
}

#[test]
fn seeded_operation_sequences_hold_the_invariants() {
    for seed in [1u64, 7, 42] {
        let mut rng = StdRng::seed_from_u64(seed);
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::open(store.clone(), EngineConfig::default()).unwrap();
        let s = new_session(&engine);
        engine
            .append_message(s.id, None, NewMessage::new(None, Role::User, "root"))
            .unwrap();

        for step in 0..250 {
            let path = head_path(&engine, s.id);
            let forest = engine.forest(s.id, true).unwrap();
            let pick_path = |rng: &mut StdRng| {
                (!path.is_empty()).then(|| path[rng.random_range(0..path.len())])
            };

            match rng.random_range(0..9) {
                0 | 1 => {
                    let parent = pick_path(&mut rng);
                    let role = if step % 2 == 0 { Role::User } else { Role::Assistant };
                    engine
                        .append_message(s.id, None, NewMessage::new(parent, role, "turn"))
                        .ok();
                }
                2 => {
                    if let Some(target) = pick_path(&mut rng) {
                        let spec = RollbackSpec {
                            save_checkpoint: rng.random_bool(0.5),
                            ..Default::default()
                        };
                        engine.rollback(s.id, target, spec).ok();
                    }
                }
                3 => {
                    engine.forward(s.id).ok();
                }
                4 => {
                    let fork = pick_path(&mut rng);
                    engine
                        .create_branch(
                            s.id,
                            BranchSpec {
                                fork_message_id: fork,
                                switch_to_new_branch: rng.random_bool(0.5),
                                ..Default::default()
                            },
                        )
                        .ok();
                }
                5 => {
                    let branches = engine.list_branches(s.id, false).unwrap();
                    let branch = &branches[rng.random_range(0..branches.len())].branch;
                    if rng.random_bool(0.8) {
                        engine.switch_branch(s.id, branch.id).ok();
                    } else {
                        engine.delete_branch(branch.id).ok();
                    }
                }
                6 => {
                    if !forest.is_empty() {
                        let message = &forest[rng.random_range(0..forest.len())];
                        if message.deleted {
                            engine.restore_message(message.id).ok();
                        } else {
                            engine.delete_message(message.id, rng.random_bool(0.7)).ok();
                        }
                    }
                }
                7 => {
                    if let Some(id) = pick_path(&mut rng) {
                        engine
                            .edit_message(EditRequest {
                                message_id: id,
                                new_content: format!("edit {}", step),
                                reason: None,
                                editor_id: 1,
                            })
                            .ok();
                    }
                }
                _ => {
                    if rng.random_bool(0.2) {
                        engine.cleanup(s.id, Some(CLEANUP_CONFIRMATION)).ok();
                    }
                }
            }

            if let Err(broken) = engine.verify(s.id).unwrap() {
                panic!("seed {} step {}: {}", seed, step, broken);
            }
        }

        assert_consistent(store, &engine, s.id);
    }
}
