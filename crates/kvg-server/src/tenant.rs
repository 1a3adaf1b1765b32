//! Tenant context carried in request headers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use kvg_sdk::{BranchId, OrganizationId, ProjectId, TenantContext};
use uuid::Uuid;

use crate::error::ServerError;

pub const ORG_HEADER: &str = "x-org-id";
pub const PROJECT_HEADER: &str = "x-project-id";
pub const BRANCH_HEADER: &str = "x-branch-id";

/// Extracts the caller's [`TenantContext`]. Organization and project are
/// required; a missing branch header addresses the main line.
#[derive(Clone, Copy, Debug)]
pub struct Tenant(pub TenantContext);

fn header_uuid(headers: &HeaderMap, name: &'static str) -> Result<Option<Uuid>, ServerError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value.to_str().map_err(|e| ServerError::InvalidHeader {
        name,
        reason: e.to_string(),
    })?;
    Uuid::parse_str(text.trim())
        .map(Some)
        .map_err(|e| ServerError::InvalidHeader {
            name,
            reason: e.to_string(),
        })
}

impl Tenant {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServerError> {
        let org = header_uuid(headers, ORG_HEADER)?.ok_or(ServerError::MissingTenant(ORG_HEADER))?;
        let project = header_uuid(headers, PROJECT_HEADER)?
            .ok_or(ServerError::MissingTenant(PROJECT_HEADER))?;
        let branch = header_uuid(headers, BRANCH_HEADER)?.map(BranchId::from_uuid);
        let ctx = TenantContext::new(OrganizationId::from_uuid(org), ProjectId::from_uuid(project))
            .map_err(|e| ServerError::InvalidHeader {
                name: if org.is_nil() { ORG_HEADER } else { PROJECT_HEADER },
                reason: e.to_string(),
            })?;
        Ok(Self(ctx.on_branch(branch)))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn org_and_project_are_required() {
        let err = Tenant::from_headers(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ServerError::MissingTenant(ORG_HEADER)));

        let only_org = headers(&[(ORG_HEADER, Uuid::now_v7().to_string())]);
        let err = Tenant::from_headers(&only_org).unwrap_err();
        assert!(matches!(err, ServerError::MissingTenant(PROJECT_HEADER)));
    }

    #[test]
    fn branch_is_optional() {
        let org = Uuid::now_v7();
        let project = Uuid::now_v7();
        let main = Tenant::from_headers(&headers(&[
            (ORG_HEADER, org.to_string()),
            (PROJECT_HEADER, project.to_string()),
        ]))
        .unwrap();
        assert_eq!(main.0.branch_id, None);
        assert_eq!(main.0.organization_id.as_uuid(), &org);

        let branch = Uuid::now_v7();
        let on_branch = Tenant::from_headers(&headers(&[
            (ORG_HEADER, org.to_string()),
            (PROJECT_HEADER, project.to_string()),
            (BRANCH_HEADER, branch.to_string()),
        ]))
        .unwrap();
        assert_eq!(on_branch.0.branch_id, Some(BranchId::from_uuid(branch)));
    }

    #[test]
    fn malformed_and_nil_ids_are_rejected() {
        let bad = headers(&[
            (ORG_HEADER, "not-a-uuid".to_string()),
            (PROJECT_HEADER, Uuid::now_v7().to_string()),
        ]);
        assert!(matches!(
            Tenant::from_headers(&bad).unwrap_err(),
            ServerError::InvalidHeader { .. }
        ));

        let nil = headers(&[
            (ORG_HEADER, Uuid::nil().to_string()),
            (PROJECT_HEADER, Uuid::now_v7().to_string()),
        ]);
        assert!(matches!(
            Tenant::from_headers(&nil).unwrap_err(),
            ServerError::InvalidHeader { .. }
        ));
    }
}
