//! Read-side engines over head-resolved views of the graph.
//!
//! Both engines read only the latest live version of each chain (tombstones
//! are opt-in for search) inside a single store snapshot.
//!
//! - [`traverse`] -- bounded BFS with deterministic, cursor-paged output
//! - [`search_objects`] / [`search_relationships`] -- filtered head listings

pub mod cursor;
pub mod limits;
pub mod search;
pub mod traverse;

pub use cursor::{Cursor, PageDirection};
pub use limits::QueryLimits;
pub use search::{search_objects, search_relationships, ObjectQuery, RelationshipQuery, SearchPage};
pub use traverse::{
    traverse, TraversalEdge, TraversalNode, TraverseDirection, TraverseRequest, TraverseResult,
};
