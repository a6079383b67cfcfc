use serde::{Deserialize, Serialize};

use crate::models::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffGranularity {
    #[default]
    Line,
    Char,
}

/// A single edit operation. Replaying the ops in order against the source
/// text reproduces the target text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum DiffOp {
    Equal(String),
    Insert(String),
    Delete(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub inserted_chars: usize,
    pub deleted_chars: usize,
    pub unchanged_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub message_id: MessageId,
    pub from_version: u32,
    pub to_version: u32,
    pub granularity: DiffGranularity,
    pub ops: Vec<DiffOp>,
    pub stats: DiffStats,
}
