//! Three-way merge over block-tree documents.
//!
//! Walks corresponding top-level blocks of base, mine and theirs by
//! position. A block changed on one side takes that side; identical changes
//! collapse to one; divergent changes become an annotated conflict section
//! retaining both versions. A size guard short-circuits pathological inputs
//! to "not mergeable" so callers fall back to a choose-side resolution.

use crate::error::{SyncError, SyncResult};
use quill_types::{Block, BlockContent, Document};

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: Document,
    /// Number of sections where mine and theirs diverged irreconcilably.
    pub conflict_sections: u32,
}

impl MergeOutcome {
    /// True when the merge is clean and safe to commit without inspection.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflict_sections == 0
    }
}

/// Merges divergent edits given their common ancestor.
///
/// Returns [`SyncError::MergeNotPossible`] when the combined document size
/// exceeds `max_size`.
pub fn merge(
    base: &Document,
    mine: &Document,
    theirs: &Document,
    max_size: usize,
) -> SyncResult<MergeOutcome> {
    let total = base.size() + mine.size() + theirs.size();
    if total > max_size {
        return Err(SyncError::MergeNotPossible(format!(
            "combined document size {total} exceeds limit {max_size}"
        )));
    }

    let len = base
        .blocks
        .len()
        .max(mine.blocks.len())
        .max(theirs.blocks.len());

    let mut blocks = Vec::with_capacity(len);
    let mut conflict_sections = 0u32;

    for i in 0..len {
        let b = base.blocks.get(i);
        let m = mine.blocks.get(i);
        let t = theirs.blocks.get(i);

        match (b, m, t) {
            (Some(b), Some(m), Some(t)) => {
                if m == t {
                    // Unchanged in both, or changed identically.
                    blocks.push(m.clone());
                } else if m == b {
                    blocks.push(t.clone());
                } else if t == b {
                    blocks.push(m.clone());
                } else {
                    conflict_sections += 1;
                    blocks.push(conflict_block(conflict_sections, Some(m), Some(t)));
                }
            }
            // Insertions past the end of base.
            (None, Some(m), Some(t)) => {
                if m == t {
                    blocks.push(m.clone());
                } else {
                    conflict_sections += 1;
                    blocks.push(conflict_block(conflict_sections, Some(m), Some(t)));
                }
            }
            (None, Some(m), None) => blocks.push(m.clone()),
            (None, None, Some(t)) => blocks.push(t.clone()),
            // Deletions: accepted when the other side left the block alone,
            // a conflict when the other side changed it.
            (Some(b), None, Some(t)) => {
                if t != b {
                    conflict_sections += 1;
                    blocks.push(conflict_block(conflict_sections, None, Some(t)));
                }
            }
            (Some(b), Some(m), None) => {
                if m != b {
                    conflict_sections += 1;
                    blocks.push(conflict_block(conflict_sections, Some(m), None));
                }
            }
            (Some(_), None, None) | (None, None, None) => {}
        }
    }

    Ok(MergeOutcome {
        document: Document::new(blocks),
        conflict_sections,
    })
}

/// A conflict section retains both sides, annotated, for inspection.
fn conflict_block(ordinal: u32, mine: Option<&Block>, theirs: Option<&Block>) -> Block {
    let mut children = Vec::with_capacity(2);
    children.push(annotated("mine", mine));
    children.push(annotated("theirs", theirs));
    Block {
        id: format!("conflict:{ordinal}"),
        content: BlockContent::Children(children),
    }
}

fn annotated(side: &str, block: Option<&Block>) -> Block {
    match block {
        Some(block) => Block {
            id: format!("{side}:{}", block.id),
            content: block.content.clone(),
        },
        // The side deleted the block; keep an explicit empty marker.
        None => Block::text(format!("{side}:deleted"), ""),
    }
}
