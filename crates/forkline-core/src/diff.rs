//! Version diffs. Changes are computed with an LCS diff and coalesced into
//! runs, so the op list is deterministic for a given pair of texts.

use forkline_types::diff::{DiffGranularity, DiffOp, DiffStats};
use similar::{Algorithm, ChangeTag, TextDiff};

use crate::error::{EngineError, EngineResult};

/// Change set turning `from` into `to`.
pub fn compute(from: &str, to: &str, granularity: DiffGranularity) -> Vec<DiffOp> {
    let mut config = TextDiff::configure();
    config.algorithm(Algorithm::Lcs);
    let diff = match granularity {
        DiffGranularity::Line => config.diff_lines(from, to),
        DiffGranularity::Char => config.diff_chars(from, to),
    };

    let mut ops: Vec<DiffOp> = Vec::new();
    for change in diff.iter_all_changes() {
        let text = change.value();
        match (ops.last_mut(), change.tag()) {
            (Some(DiffOp::Equal(run)), ChangeTag::Equal)
            | (Some(DiffOp::Insert(run)), ChangeTag::Insert)
            | (Some(DiffOp::Delete(run)), ChangeTag::Delete) => run.push_str(text),
            (_, ChangeTag::Equal) => ops.push(DiffOp::Equal(text.to_string())),
            (_, ChangeTag::Insert) => ops.push(DiffOp::Insert(text.to_string())),
            (_, ChangeTag::Delete) => ops.push(DiffOp::Delete(text.to_string())),
        }
    }
    ops
}

/// Replay a change set against `base`. Fails if `base` is not the text the
/// change set was computed from.
pub fn apply(base: &str, ops: &[DiffOp]) -> EngineResult<String> {
    let mut out = String::with_capacity(base.len());
    let mut offset = 0;
    for op in ops {
        match op {
            DiffOp::Equal(text) | DiffOp::Delete(text) => {
                if !base[offset..].starts_with(text.as_str()) {
                    return Err(EngineError::DiffMismatch(offset));
                }
                if let DiffOp::Equal(_) = op {
                    out.push_str(text);
                }
                offset += text.len();
            }
            DiffOp::Insert(text) => out.push_str(text),
        }
    }
    if offset != base.len() {
        return Err(EngineError::DiffMismatch(offset));
    }
    Ok(out)
}

/// The change set going the other way: inserts become deletes and vice versa.
pub fn invert(ops: &[DiffOp]) -> Vec<DiffOp> {
    ops.iter()
        .map(|op| match op {
            DiffOp::Equal(text) => DiffOp::Equal(text.clone()),
            DiffOp::Insert(text) => DiffOp::Delete(text.clone()),
            DiffOp::Delete(text) => DiffOp::Insert(text.clone()),
        })
        .collect()
}

pub fn stats(ops: &[DiffOp]) -> DiffStats {
    let mut stats = DiffStats::default();
    for op in ops {
        match op {
            DiffOp::Equal(text) => stats.unchanged_chars += text.chars().count(),
            DiffOp::Insert(text) => stats.inserted_chars += text.chars().count(),
            DiffOp::Delete(text) => stats.deleted_chars += text.chars().count(),
        }
    }
    stats
}
