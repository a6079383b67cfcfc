use std::sync::atomic::{AtomicI64, Ordering};

use forkline_types::models::{BranchId, MessageId, SessionId};

use crate::store::Watermarks;

/// Monotonic id source per record kind, so id order matches creation order.
#[derive(Debug)]
pub struct IdAllocator {
    session: AtomicI64,
    message: AtomicI64,
    branch: AtomicI64,
}

impl IdAllocator {
    pub fn new(marks: Watermarks) -> Self {
        Self {
            session: AtomicI64::new(marks.session),
            message: AtomicI64::new(marks.message),
            branch: AtomicI64::new(marks.branch),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn message(&self) -> MessageId {
        self.message.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn branch(&self) -> BranchId {
        self.branch.fetch_add(1, Ordering::Relaxed) + 1
    }
}
