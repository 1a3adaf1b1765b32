//! TOML configuration: storage backend and request limits.

use std::path::{Path, PathBuf};

use kvg_query::QueryLimits;
use kvg_store::{GraphBackend, InMemoryGraphStore, SqliteGraphStore};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SdkResult;

/// Which backend holds the version rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local; contents are lost on exit.
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

impl StoreConfig {
    pub fn open(&self) -> SdkResult<GraphBackend> {
        let backend = match self {
            Self::Memory => GraphBackend::from(InMemoryGraphStore::new()),
            Self::Sqlite { path } => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                GraphBackend::from(SqliteGraphStore::open(path)?)
            }
        };
        info!(backend = backend_label(self), "graph store opened");
        Ok(backend)
    }
}

fn backend_label(config: &StoreConfig) -> &'static str {
    match config {
        StoreConfig::Memory => "memory",
        StoreConfig::Sqlite { .. } => "sqlite",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound on records a merge preview enumerates per kind.
    pub merge_hard_limit: usize,
    pub history_default_limit: usize,
    pub traversal_default_limit: usize,
    pub traversal_max_limit: usize,
    pub traversal_default_depth: u32,
    pub traversal_max_depth: u32,
    pub traversal_node_cap: usize,
    pub search_default_limit: usize,
    pub search_max_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let query = QueryLimits::default();
        Self {
            merge_hard_limit: 500,
            history_default_limit: 50,
            traversal_default_limit: query.traversal_default_limit,
            traversal_max_limit: query.traversal_max_limit,
            traversal_default_depth: query.traversal_default_depth,
            traversal_max_depth: query.traversal_max_depth,
            traversal_node_cap: query.traversal_node_cap,
            search_default_limit: query.search_default_limit,
            search_max_limit: query.search_max_limit,
        }
    }
}

impl LimitsConfig {
    /// The subset consumed by traversal and search.
    pub fn query(&self) -> QueryLimits {
        QueryLimits {
            traversal_default_limit: self.traversal_default_limit,
            traversal_max_limit: self.traversal_max_limit,
            traversal_default_depth: self.traversal_default_depth,
            traversal_max_depth: self.traversal_max_depth,
            traversal_node_cap: self.traversal_node_cap,
            search_default_limit: self.search_default_limit,
            search_max_limit: self.search_max_limit,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvgConfig {
    pub store: StoreConfig,
    pub limits: LimitsConfig,
}

impl KvgConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
