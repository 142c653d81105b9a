use pretty_assertions::assert_eq;
use quill_sync::{merge, SyncError};
use quill_types::{Block, BlockContent, Document};

fn doc(texts: &[&str]) -> Document {
    Document::new(
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Block::text(format!("b{i}"), *t))
            .collect(),
    )
}

const MAX: usize = 256 * 1024;

#[test]
fn non_overlapping_edits_merge_cleanly() {
    let base = doc(&["A", "B", "C"]);
    let mine = doc(&["A", "X", "C"]);
    let theirs = doc(&["A", "B", "Y"]);

    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.document, doc(&["A", "X", "Y"]));
}

#[test]
fn identical_edits_collapse() {
    let base = doc(&["A"]);
    let both = doc(&["Z"]);
    let outcome = merge(&base, &both, &both, MAX).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.document, both);
}

#[test]
fn unchanged_sides_return_base() {
    let base = doc(&["A", "B"]);
    let outcome = merge(&base, &base, &base, MAX).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.document, base);
}

#[test]
fn divergent_edits_become_a_conflict_section() {
    let base = doc(&["A"]);
    let mine = doc(&["M"]);
    let theirs = doc(&["T"]);

    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert_eq!(outcome.conflict_sections, 1);
    assert!(!outcome.is_clean());

    let block = &outcome.document.blocks[0];
    assert_eq!(block.id, "conflict:1");
    let BlockContent::Children(children) = &block.content else {
        panic!("conflict section should hold both sides");
    };
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].id, "mine:b0");
    assert_eq!(children[0].content, BlockContent::Text("M".into()));
    assert_eq!(children[1].id, "theirs:b0");
    assert_eq!(children[1].content, BlockContent::Text("T".into()));
}

#[test]
fn one_sided_insertions_are_kept() {
    let base = doc(&["A"]);
    let mine = doc(&["A", "B"]);
    let theirs = doc(&["A"]);
    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.document, doc(&["A", "B"]));
}

#[test]
fn matching_insertions_collapse_and_divergent_ones_conflict() {
    let base = doc(&["A"]);
    let mine = doc(&["A", "B"]);
    let theirs = doc(&["A", "B"]);
    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.document, doc(&["A", "B"]));

    let mine = doc(&["A", "B"]);
    let theirs = doc(&["A", "C"]);
    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert_eq!(outcome.conflict_sections, 1);
}

#[test]
fn deletion_of_an_untouched_block_is_accepted() {
    let base = doc(&["A", "B"]);
    let mine = doc(&["A"]);
    let theirs = doc(&["A", "B"]);
    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.document, doc(&["A"]));
}

#[test]
fn deletion_of_an_edited_block_conflicts_with_a_marker() {
    let base = doc(&["A", "B"]);
    let mine = doc(&["A"]);
    let theirs = doc(&["A", "B2"]);

    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert_eq!(outcome.conflict_sections, 1);

    let block = &outcome.document.blocks[1];
    let BlockContent::Children(children) = &block.content else {
        panic!("conflict section should hold both sides");
    };
    assert_eq!(children[0].id, "mine:deleted");
    assert_eq!(children[0].content, BlockContent::Text(String::new()));
    assert_eq!(children[1].id, "theirs:b1");
}

#[test]
fn multiple_conflicts_are_numbered_in_order() {
    let base = doc(&["A", "B"]);
    let mine = doc(&["M1", "M2"]);
    let theirs = doc(&["T1", "T2"]);

    let outcome = merge(&base, &mine, &theirs, MAX).unwrap();
    assert_eq!(outcome.conflict_sections, 2);
    assert_eq!(outcome.document.blocks[0].id, "conflict:1");
    assert_eq!(outcome.document.blocks[1].id, "conflict:2");
}

#[test]
fn oversized_inputs_are_rejected() {
    let big = "x".repeat(100);
    let base = doc(&[big.as_str()]);
    let result = merge(&base, &base, &base, 50);
    assert!(matches!(result, Err(SyncError::MergeNotPossible(_))));
}

#[test]
fn empty_documents_merge_to_empty() {
    let empty = Document::default();
    let outcome = merge(&empty, &empty, &empty, MAX).unwrap();
    assert!(outcome.is_clean());
    assert!(outcome.document.blocks.is_empty());
}
