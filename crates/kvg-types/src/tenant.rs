use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{BranchId, OrganizationId, ProjectId};

/// Explicit tenant scope passed into every store call.
///
/// Rows are always filtered on all three components. A `branch_id` of `None`
/// addresses the project's main line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<BranchId>,
}

impl TenantContext {
    /// Build a main-line context. Nil ids are rejected: an unset context must
    /// never silently match rows.
    pub fn new(organization_id: OrganizationId, project_id: ProjectId) -> Result<Self, TypeError> {
        if organization_id.is_nil() {
            return Err(TypeError::InvalidTenant("organization id is nil".into()));
        }
        if project_id.is_nil() {
            return Err(TypeError::InvalidTenant("project id is nil".into()));
        }
        Ok(Self {
            organization_id,
            project_id,
            branch_id: None,
        })
    }

    /// The same tenant, scoped to another branch (`None` = main line).
    pub fn on_branch(self, branch_id: Option<BranchId>) -> Self {
        Self { branch_id, ..self }
    }

    /// The same tenant on the main line.
    pub fn main_line(self) -> Self {
        self.on_branch(None)
    }

    /// Returns `true` if `other` belongs to the same organization and project,
    /// regardless of branch.
    pub fn same_project(&self, other: &Self) -> bool {
        self.organization_id == other.organization_id && self.project_id == other.project_id
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch_id {
            Some(branch) => write!(
                f,
                "org:{}/project:{}/branch:{}",
                self.organization_id.short_id(),
                self.project_id.short_id(),
                branch.short_id()
            ),
            None => write!(
                f,
                "org:{}/project:{}/main",
                self.organization_id.short_id(),
                self.project_id.short_id()
            ),
        }
    }
}
