//! Versioning core of the knowledge graph.
//!
//! Every mutation appends an immutable version row; nothing is overwritten.
//! The functions here run inside a store transaction supplied by the caller,
//! so several of them can be composed into one atomic unit:
//!
//! ```ignore
//! store.write(|tx| {
//!     let doc = objects::create_object(tx, &ctx, NewObject::new("Doc"))?;
//!     objects::patch_object(tx, &ctx, doc.canonical_id(), patch, doc.version())
//! })?;
//! ```
//!
//! # Modules
//!
//! - [`objects`] / [`relationships`] -- chain mutators and readers
//! - [`branches`] -- branch lifecycle and forking
//! - [`chain`] -- tenant-checked chain access shared by both record kinds
//! - [`content`] -- content hashes over normalized semantic fields

pub mod branches;
pub mod chain;
pub mod content;
pub mod error;
pub mod names;
pub mod objects;
pub mod relationships;

#[cfg(test)]
mod testing;

pub use branches::{
    create_branch, delete_branch, ensure_branch, get_branch, list_branches, rename_branch,
    NewBranch,
};
pub use chain::{ChainRecord, ChainTarget, History, HistoryPage};
pub use content::{object_hash, relationship_hash};
pub use error::{GraphError, GraphResult, RecordKind};
pub use objects::{
    create_object, delete_object, get_object, object_edges, object_head, object_history,
    patch_object, restore_object, NewObject, ObjectEdges, ObjectPatch,
};
pub use relationships::{
    create_relationship, delete_relationship, get_relationship, patch_relationship,
    redirect_relationship, relationship_head, relationship_history, restore_relationship,
    CreateOutcome, NewRelationship, Redirect, RelationshipPatch,
};
