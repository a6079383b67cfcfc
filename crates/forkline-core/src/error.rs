use forkline_types::models::{BranchId, MessageId, SessionId};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Every way an engine operation can be refused.
///
/// Validation variants are raised before any state is touched, so a failed
/// call leaves the session exactly as it was.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session {0} is archived")]
    SessionArchived(SessionId),

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("branch {0} not found")]
    BranchNotFound(BranchId),

    #[error("branch {branch_id} does not belong to session {session_id}")]
    CrossSessionBranch {
        branch_id: BranchId,
        session_id: SessionId,
    },

    #[error("a branch named '{0}' already exists in this session")]
    DuplicateName(String),

    #[error("invalid branch name: {0}")]
    InvalidName(String),

    #[error("the main branch cannot be deleted")]
    MainBranchProtected,

    #[error("message {0} is not on the active branch path")]
    TargetNotOnActivePath(MessageId),

    #[error("message {message_id} has no version {version}")]
    VersionNotFound { message_id: MessageId, version: u32 },

    #[error("message {0} has children; delete with cascade")]
    HasChildren(MessageId),

    #[error("message {0} is not deleted")]
    NotDeleted(MessageId),

    #[error("parent of message {0} is missing or deleted")]
    ParentMissing(MessageId),

    #[error("invalid fork point: {0}")]
    InvalidFork(String),

    #[error("message content must not be empty")]
    EmptyContent,

    #[error("change set does not apply to the given text at offset {0}")]
    DiffMismatch(usize),

    #[error("cleanup requires an explicit confirmation token")]
    ConfirmationRequired,

    #[error("reply generation failed: {0}")]
    Generation(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable identifier surfaced to callers alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionArchived(_) => "SESSION_ARCHIVED",
            Self::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            Self::InvalidParent(_) => "INVALID_PARENT",
            Self::BranchNotFound(_) => "BRANCH_NOT_FOUND",
            Self::CrossSessionBranch { .. } => "CROSS_SESSION_BRANCH",
            Self::DuplicateName(_) => "DUPLICATE_NAME",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::MainBranchProtected => "MAIN_BRANCH_PROTECTED",
            Self::TargetNotOnActivePath(_) => "TARGET_NOT_ON_ACTIVE_PATH",
            Self::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            Self::HasChildren(_) => "HAS_CHILDREN",
            Self::NotDeleted(_) => "NOT_DELETED",
            Self::ParentMissing(_) => "PARENT_MISSING",
            Self::InvalidFork(_) => "INVALID_FORK",
            Self::EmptyContent => "EMPTY_CONTENT",
            Self::DiffMismatch(_) => "DIFF_MISMATCH",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Storage(_) => "STORAGE",
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Storage(anyhow::anyhow!("{} lock poisoned", what))
    }
}
