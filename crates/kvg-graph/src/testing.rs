//! Shared fixtures for unit tests.

use kvg_store::{GraphStore, InMemoryGraphStore};
use kvg_types::{GraphObject, OrganizationId, ProjectId, TenantContext};

use crate::objects::{create_object, NewObject};

pub(crate) fn main_line() -> TenantContext {
    TenantContext::new(OrganizationId::new(), ProjectId::new()).unwrap()
}

pub(crate) fn other_tenant() -> TenantContext {
    main_line()
}

pub(crate) fn create(
    store: &InMemoryGraphStore,
    ctx: &TenantContext,
    input: NewObject,
) -> GraphObject {
    store.write(|tx| create_object(tx, ctx, input)).unwrap()
}
