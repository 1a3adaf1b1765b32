use serde::{Deserialize, Serialize};

/// Bounds applied to traversal and search requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub traversal_default_limit: usize,
    pub traversal_max_limit: usize,
    pub traversal_default_depth: u32,
    pub traversal_max_depth: u32,
    /// Discovery stops once this many nodes are found.
    pub traversal_node_cap: usize,
    pub search_default_limit: usize,
    pub search_max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            traversal_default_limit: 50,
            traversal_max_limit: 1000,
            traversal_default_depth: 2,
            traversal_max_depth: 8,
            traversal_node_cap: 10_000,
            search_default_limit: 50,
            search_max_limit: 500,
        }
    }
}

impl QueryLimits {
    pub fn traversal_limit(&self, requested: Option<usize>) -> usize {
        clamp(requested, self.traversal_default_limit, self.traversal_max_limit)
    }

    pub fn traversal_depth(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.traversal_default_depth)
            .min(self.traversal_max_depth)
    }

    pub fn search_limit(&self, requested: Option<usize>) -> usize {
        clamp(requested, self.search_default_limit, self.search_max_limit)
    }
}

fn clamp(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max.max(1))
}
