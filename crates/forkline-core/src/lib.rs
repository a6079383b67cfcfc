//! Branching, versioned conversation engine.
//!
//! A session holds a forest of messages. Branches are named heads into that
//! forest, messages keep an edit ledger of prior versions, and a branch head
//! can be rolled back and replayed forward without losing anything. All
//! operations go through [`Engine`], which serialises mutations per session
//! and writes them through to a [`Store`].

mod branches;
mod deletion;
pub mod diff;
mod engine;
mod error;
mod generator;
mod graph;
mod ids;
mod ledger;
mod rollback;
mod state;
mod store;

#[cfg(test)]
mod testing;

pub use branches::BranchSpec;
pub use deletion::CLEANUP_CONFIRMATION;
pub use engine::{EditRequest, Engine, EngineConfig, NewSession, PendingExchange, SendMessage};
pub use error::{EngineError, EngineResult};
pub use generator::{EchoGenerator, GenerationContext, Reply, ReplyGenerator};
pub use graph::{estimate_tokens, NewMessage};
pub use rollback::RollbackSpec;
pub use state::SessionState;
pub use store::{ChangeSet, MemoryStore, Store, Watermarks};
