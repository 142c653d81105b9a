//! The block-tree document model.
//!
//! Documents are ordered lists of blocks; a block holds either literal text
//! or an ordered list of child blocks. This is the shape the three-way merge
//! engine walks, and the shape version contents are expected to take when a
//! structural diff summary is wanted. Content that does not parse as a
//! document is still handled everywhere, just without block-level detail.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// The content of a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockContent {
    /// Literal text content.
    Text(String),
    /// Ordered child blocks.
    Children(Vec<Block>),
}

/// One node of the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub content: BlockContent,
}

impl Block {
    /// Creates a text block.
    #[must_use]
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: BlockContent::Text(text.into()),
        }
    }

    /// Creates a container block with children.
    #[must_use]
    pub fn children(id: impl Into<String>, children: Vec<Block>) -> Self {
        Self {
            id: id.into(),
            content: BlockContent::Children(children),
        }
    }

    /// Approximate byte weight of this block, including descendants.
    #[must_use]
    pub fn size(&self) -> usize {
        self.id.len()
            + match &self.content {
                BlockContent::Text(t) => t.len(),
                BlockContent::Children(cs) => cs.iter().map(Block::size).sum(),
            }
    }
}

/// An ordered block-tree document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    /// Creates a document from top-level blocks.
    #[must_use]
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Total approximate byte weight, used by the merge size guard.
    #[must_use]
    pub fn size(&self) -> usize {
        self.blocks.iter().map(Block::size).sum()
    }

    /// Hash of the canonical JSON serialization.
    #[must_use]
    pub fn content_hash(&self) -> String {
        content_hash(&serde_json::json!(self))
    }

    /// Attempts to interpret arbitrary JSON content as a document.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Serializes the document back to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}

/// SHA-256 hex digest of a JSON value's canonical serialization.
///
/// Equality checks across the engine compare these hashes, never deep
/// structural comparisons.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let canonical = value.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Lightweight block-level summary of how two contents diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub blocks_added: usize,
    pub blocks_removed: usize,
    pub blocks_changed: usize,
}

impl DiffSummary {
    /// Compares two documents positionally at the top level.
    #[must_use]
    pub fn between(a: &Document, b: &Document) -> Self {
        let mut summary = Self::default();
        let common = a.blocks.len().min(b.blocks.len());
        for i in 0..common {
            if a.blocks[i] != b.blocks[i] {
                summary.blocks_changed += 1;
            }
        }
        summary.blocks_added = b.blocks.len().saturating_sub(a.blocks.len());
        summary.blocks_removed = a.blocks.len().saturating_sub(b.blocks.len());
        summary
    }

    /// Compares arbitrary JSON contents, degrading gracefully when either
    /// side is not document-shaped.
    #[must_use]
    pub fn between_values(a: &Value, b: &Value) -> Self {
        match (Document::from_value(a), Document::from_value(b)) {
            (Some(da), Some(db)) => Self::between(&da, &db),
            _ => {
                if content_hash(a) == content_hash(b) {
                    Self::default()
                } else {
                    Self {
                        blocks_changed: 1,
                        ..Self::default()
                    }
                }
            }
        }
    }

    /// Returns true if no divergence was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks_added == 0 && self.blocks_removed == 0 && self.blocks_changed == 0
    }
}
