//! Merge engines for the knowledge graph.
//!
//! - [`preview_merge`] compares two branches' heads and classifies each
//!   logical record as added, unchanged, fast-forward or conflicting. It
//!   never writes.
//! - [`merge_objects`] folds a duplicate object into another inside a single
//!   write transaction.

pub mod classifier;
pub mod dedup;

pub use classifier::{
    preview_merge, BranchMergeSummary, MergeCounts, MergeEntry, MergePreviewRequest, MergeStatus,
};
pub use dedup::{merge_objects, MergeConfig, MergeResult, PropertyStrategy, PROVENANCE_KEY};
