//! HTTP server for the versioned knowledge graph.
//!
//! Serves the graph API under `/api/v1`. Every data route is scoped by the
//! `X-Org-ID`, `X-Project-ID` and optional `X-Branch-ID` headers.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod tenant;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::AppState;
pub use router::{build_router, build_router_with_cors};
pub use server::KvgServer;
pub use tenant::{Tenant, BRANCH_HEADER, ORG_HEADER, PROJECT_HEADER};
