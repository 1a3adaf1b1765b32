//! Transactional version-row storage for the knowledge graph.
//!
//! The store holds append-only object and relationship version rows plus
//! branch rows. It knows nothing about patch semantics or hashing; it resolves
//! chains and heads, applies tenant predicates, and enforces the chain
//! compare-and-swap at insert time.
//!
//! # Storage Backends
//!
//! All backends implement the [`GraphStore`] trait:
//!
//! - [`InMemoryGraphStore`] -- lock-protected maps for tests and embedding
//! - [`SqliteGraphStore`] -- SQLite file or in-memory database
//! - [`GraphBackend`] -- either of the above, selected at runtime
//!
//! # Design Rules
//!
//! 1. Version rows are immutable once written; nothing is physically deleted.
//! 2. Every scoped read filters on organization, project and branch.
//! 3. A write transaction either commits all of its rows or none.
//! 4. A row may only start a chain or directly follow the chain's latest version.
//! 5. All backend errors are propagated, never silently ignored.

pub mod backend;
pub mod error;
pub mod filter;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use backend::GraphBackend;
pub use error::{StoreError, StoreResult};
pub use filter::{EndpointMatch, HeadOrder, HeadPage, ObjectFilter, RelationshipFilter};
pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;
pub use traits::{GraphReader, GraphStore, GraphTx};
