//! High-level SDK for the versioned knowledge graph.
//!
//! [`KnowledgeGraph`] bundles a store with its configured limits and exposes
//! every graph operation as a single transactional call. The HTTP server and
//! the CLI are both thin layers over it.

pub mod config;
pub mod error;
pub mod graph;

pub use config::{KvgConfig, LimitsConfig, StoreConfig};
pub use error::{SdkError, SdkResult};
pub use graph::KnowledgeGraph;

// Re-export the request and record types callers need.
pub use kvg_graph::{
    CreateOutcome, GraphError, GraphResult, History, HistoryPage, NewBranch, NewObject,
    NewRelationship, ObjectEdges, ObjectPatch, RelationshipPatch,
};
pub use kvg_merge::{
    BranchMergeSummary, MergeConfig, MergeEntry, MergePreviewRequest, MergeResult, MergeStatus,
    PropertyStrategy,
};
pub use kvg_query::{
    ObjectQuery, PageDirection, RelationshipQuery, SearchPage, TraverseDirection, TraverseRequest,
    TraverseResult,
};
pub use kvg_types::{
    Branch, BranchId, CanonicalId, GraphObject, GraphRelationship, OrganizationId, ProjectId,
    Properties, TenantContext, VersionId,
};
