//! Bounded breadth-first traversal over relationship heads.
//!
//! Expansion is level-synchronous: each level issues one head query for every
//! edge adjacent to the frontier, so a level costs one round trip regardless
//! of its width. Candidate edges are visited in `(created_at, canonical_id)`
//! order, which makes the node discovery order deterministic; pages are
//! slices of that order.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use kvg_graph::{chain, GraphError, GraphResult};
use kvg_store::{EndpointMatch, GraphReader, HeadPage, RelationshipFilter};
use kvg_types::{
    CanonicalId, GraphObject, GraphRelationship, TenantContext, VersionId, Versioned,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cursor::{Cursor, PageDirection};
use crate::limits::QueryLimits;

/// Which edges to follow from a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraverseDirection {
    /// Follow edges from source to target.
    Out,
    /// Follow edges from target to source.
    In,
    #[default]
    Both,
}

/// A traversal request. Roots may be any version id or canonical id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraverseRequest {
    pub roots: Vec<Uuid>,
    pub direction: TraverseDirection,
    pub max_depth: Option<u32>,
    /// Relationship types to follow; `None` follows every type.
    pub allowed_types: Option<Vec<String>>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub page_direction: PageDirection,
}

impl TraverseRequest {
    pub fn from_roots<I: IntoIterator<Item = Uuid>>(roots: I) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraversalNode {
    pub id: VersionId,
    pub canonical_id: CanonicalId,
    #[serde(rename = "type")]
    pub object_type: String,
    pub key: Option<String>,
    pub labels: Vec<String>,
    pub depth: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraversalEdge {
    pub id: VersionId,
    pub canonical_id: CanonicalId,
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub src: CanonicalId,
    pub dst: CanonicalId,
}

/// One page of a traversal.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraverseResult {
    pub roots: Vec<CanonicalId>,
    pub nodes: Vec<TraversalNode>,
    pub edges: Vec<TraversalEdge>,
    /// More nodes or edges exist than this page returns.
    pub truncated: bool,
    /// Expansion stopped at the depth bound with nodes still on the frontier.
    pub max_depth_reached: bool,
    pub total_nodes: usize,
    /// Number of nodes discovered, across all pages.
    pub result_count: usize,
    pub query_time_ms: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub next_cursor: Option<String>,
    pub previous_cursor: Option<String>,
    /// 1-based position of the first node of the page, 0 when empty.
    pub approx_position_start: usize,
    pub approx_position_end: usize,
    pub page_direction: PageDirection,
}

/// Everything reachable within the bounds, in discovery order.
struct Discovery {
    roots: Vec<CanonicalId>,
    nodes: Vec<TraversalNode>,
    position: HashMap<CanonicalId, usize>,
    /// Edges with the position of their later-discovered endpoint.
    edges: Vec<(TraversalEdge, usize)>,
    cap_hit: bool,
    max_depth_reached: bool,
}

impl Discovery {
    fn new() -> Self {
        Self {
            roots: Vec::new(),
            nodes: Vec::new(),
            position: HashMap::new(),
            edges: Vec::new(),
            cap_hit: false,
            max_depth_reached: false,
        }
    }

    fn add_node(&mut self, head: &GraphObject, depth: u32) {
        self.position.insert(head.canonical_id(), self.nodes.len());
        self.nodes.push(TraversalNode {
            id: head.id(),
            canonical_id: head.canonical_id(),
            object_type: head.object_type.clone(),
            key: head.key.clone(),
            labels: head.labels.clone(),
            depth,
        });
    }

    fn add_edge(&mut self, rel: &GraphRelationship) -> bool {
        match (self.position.get(&rel.src_id), self.position.get(&rel.dst_id)) {
            (Some(&src), Some(&dst)) => {
                self.edges.push((
                    TraversalEdge {
                        id: rel.id(),
                        canonical_id: rel.canonical_id(),
                        relationship_type: rel.relationship_type.clone(),
                        src: rel.src_id,
                        dst: rel.dst_id,
                    },
                    src.max(dst),
                ));
                true
            }
            _ => false,
        }
    }
}

/// Live object heads, remembering dead ends.
struct LiveHeads<'r, R: ?Sized> {
    reader: &'r R,
    ctx: &'r TenantContext,
    dead: HashSet<CanonicalId>,
}

impl<R: GraphReader + ?Sized> LiveHeads<'_, R> {
    fn get(&mut self, id: CanonicalId) -> GraphResult<Option<GraphObject>> {
        if self.dead.contains(&id) {
            return Ok(None);
        }
        match self.reader.latest_object(self.ctx, id)? {
            Some(head) if !head.is_deleted() => Ok(Some(head)),
            _ => {
                self.dead.insert(id);
                Ok(None)
            }
        }
    }
}

fn far_ends(
    rel: &GraphRelationship,
    direction: TraverseDirection,
    frontier: &HashSet<CanonicalId>,
) -> Vec<CanonicalId> {
    let from_src = frontier.contains(&rel.src_id);
    let from_dst = frontier.contains(&rel.dst_id);
    let mut out = Vec::with_capacity(2);
    if from_src && direction != TraverseDirection::In {
        out.push(rel.dst_id);
    }
    if from_dst && direction != TraverseDirection::Out {
        out.push(rel.src_id);
    }
    out
}

fn discover<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    request: &TraverseRequest,
    max_depth: u32,
    node_cap: usize,
) -> GraphResult<Discovery> {
    let mut found = Discovery::new();
    let mut live = LiveHeads {
        reader,
        ctx,
        dead: HashSet::new(),
    };

    for raw in &request.roots {
        let target = match chain::target::<GraphObject, R>(reader, ctx, *raw) {
            Ok(target) => target,
            Err(GraphError::NotFound { .. }) => continue,
            Err(err) => return Err(err),
        };
        if found.position.contains_key(&target.canonical_id) {
            continue;
        }
        let Some(head) = live.get(target.canonical_id)? else {
            continue;
        };
        if found.nodes.len() >= node_cap {
            found.cap_hit = true;
            break;
        }
        found.add_node(&head, 0);
        found.roots.push(head.canonical_id());
    }

    let types = request.allowed_types.clone().unwrap_or_default();
    let mut seen_edges: HashSet<CanonicalId> = HashSet::new();
    let mut frontier = found.roots.clone();
    let mut depth = 0;

    while !frontier.is_empty() && !found.cap_hit {
        if depth >= max_depth {
            found.max_depth_reached = true;
            break;
        }
        depth += 1;

        let endpoints = match request.direction {
            TraverseDirection::Out => EndpointMatch::Source(frontier.clone()),
            TraverseDirection::In => EndpointMatch::Target(frontier.clone()),
            TraverseDirection::Both => EndpointMatch::Either(frontier.clone()),
        };
        let filter = RelationshipFilter {
            types: types.clone(),
            endpoints: Some(endpoints),
            ..RelationshipFilter::live()
        };
        let candidates = reader.relationship_heads(ctx, &filter, HeadPage::all())?;
        let on_frontier: HashSet<CanonicalId> = frontier.iter().copied().collect();
        let mut next = Vec::new();

        'edges: for rel in &candidates {
            if seen_edges.contains(&rel.canonical_id()) {
                continue;
            }
            for far in far_ends(rel, request.direction, &on_frontier) {
                if found.position.contains_key(&far) {
                    continue;
                }
                let Some(head) = live.get(far)? else {
                    continue;
                };
                if found.nodes.len() >= node_cap {
                    found.cap_hit = true;
                    break 'edges;
                }
                found.add_node(&head, depth);
                next.push(far);
            }
            if found.add_edge(rel) {
                seen_edges.insert(rel.canonical_id());
            }
        }
        frontier = next;
    }
    Ok(found)
}

/// Walk the graph from `request.roots` and return one page of the result.
pub fn traverse<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    request: &TraverseRequest,
    limits: &QueryLimits,
) -> GraphResult<TraverseResult> {
    let started = Instant::now();
    let limit = limits.traversal_limit(request.limit);
    let max_depth = limits.traversal_depth(request.max_depth);
    let offset = request.cursor.as_deref().map(Cursor::offset).transpose()?;

    let found = discover(reader, ctx, request, max_depth, limits.traversal_node_cap)?;
    let total = found.nodes.len();

    let (start, end) = match request.page_direction {
        PageDirection::Forward => {
            let start = offset.unwrap_or(0).min(total);
            (start, (start + limit).min(total))
        }
        PageDirection::Backward => {
            let end = offset.unwrap_or(total).min(total);
            (end.saturating_sub(limit), end)
        }
    };

    let mut edges: Vec<TraversalEdge> = found
        .edges
        .iter()
        .filter(|(edge, discovered)| {
            end > 0
                && *discovered < end
                && [edge.src, edge.dst]
                    .iter()
                    .any(|id| found.position.get(id).is_some_and(|&p| p >= start && p < end))
        })
        .map(|(edge, _)| edge.clone())
        .collect();
    let edges_cut = edges.len() > limit;
    edges.truncate(limit);

    let has_next_page = end < total;
    let has_previous_page = start > 0;
    let nodes = found.nodes[start..end].to_vec();
    let result = TraverseResult {
        roots: found.roots,
        truncated: has_next_page || edges_cut || found.cap_hit,
        max_depth_reached: found.max_depth_reached,
        total_nodes: total,
        result_count: total,
        query_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        has_next_page,
        has_previous_page,
        next_cursor: has_next_page.then(|| Cursor::Offset(end).encode()),
        previous_cursor: has_previous_page.then(|| Cursor::Offset(start).encode()),
        approx_position_start: if nodes.is_empty() { 0 } else { start + 1 },
        approx_position_end: end,
        page_direction: request.page_direction,
        nodes,
        edges,
    };
    debug!(
        roots = result.roots.len(),
        discovered = total,
        returned = result.nodes.len(),
        truncated = result.truncated,
        "traversal finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvg_graph::{create_object, create_relationship, delete_object, NewObject, NewRelationship};
    use kvg_store::{GraphStore, InMemoryGraphStore};
    use kvg_types::{OrganizationId, ProjectId};

    struct Fixture {
        store: InMemoryGraphStore,
        ctx: TenantContext,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: InMemoryGraphStore::new(),
                ctx: TenantContext::new(OrganizationId::new(), ProjectId::new()).unwrap(),
            }
        }

        fn node(&self, ty: &str) -> GraphObject {
            self.store
                .write(|tx| create_object(tx, &self.ctx, NewObject::new(ty)))
                .unwrap()
        }

        fn edge(&self, ty: &str, src: &GraphObject, dst: &GraphObject) -> GraphRelationship {
            self.store
                .write(|tx| {
                    create_relationship(
                        tx,
                        &self.ctx,
                        NewRelationship::between(ty, src.canonical_id(), dst.canonical_id()),
                    )
                })
                .unwrap()
                .relationship
        }

        fn run(&self, request: &TraverseRequest, limits: &QueryLimits) -> TraverseResult {
            self.store
                .read(|r| traverse(r, &self.ctx, request, limits))
                .unwrap()
        }
    }

    fn root(obj: &GraphObject) -> TraverseRequest {
        TraverseRequest::from_roots([*obj.canonical_id().as_uuid()])
    }

    fn depths(result: &TraverseResult) -> Vec<(CanonicalId, u32)> {
        result.nodes.iter().map(|n| (n.canonical_id, n.depth)).collect()
    }

    #[test]
    fn chain_is_walked_breadth_first() {
        let f = Fixture::new();
        let a = f.node("A");
        let b = f.node("B");
        let c = f.node("C");
        f.edge("R", &a, &b);
        f.edge("R", &b, &c);

        let result = f.run(
            &TraverseRequest {
                max_depth: Some(5),
                ..root(&a)
            },
            &QueryLimits::default(),
        );
        assert_eq!(
            depths(&result),
            vec![(a.canonical_id(), 0), (b.canonical_id(), 1), (c.canonical_id(), 2)]
        );
        assert_eq!(result.edges.len(), 2);
        assert!(!result.truncated);
        assert!(!result.max_depth_reached);
        assert_eq!(result.result_count, 3);
    }

    #[test]
    fn depth_bound_stops_expansion() {
        let f = Fixture::new();
        let a = f.node("A");
        let b = f.node("B");
        let c = f.node("C");
        f.edge("R", &a, &b);
        f.edge("R", &b, &c);

        let result = f.run(
            &TraverseRequest {
                max_depth: Some(1),
                ..root(&a)
            },
            &QueryLimits::default(),
        );
        assert_eq!(result.nodes.len(), 2);
        assert!(result.max_depth_reached);
    }

    #[test]
    fn direction_and_type_filters() {
        let f = Fixture::new();
        let a = f.node("A");
        let b = f.node("B");
        let c = f.node("C");
        f.edge("OWNS", &a, &b);
        f.edge("CITES", &c, &a);

        let out = f.run(
            &TraverseRequest {
                direction: TraverseDirection::Out,
                ..root(&a)
            },
            &QueryLimits::default(),
        );
        assert_eq!(depths(&out), vec![(a.canonical_id(), 0), (b.canonical_id(), 1)]);

        let incoming = f.run(
            &TraverseRequest {
                direction: TraverseDirection::In,
                ..root(&a)
            },
            &QueryLimits::default(),
        );
        assert_eq!(depths(&incoming), vec![(a.canonical_id(), 0), (c.canonical_id(), 1)]);

        let typed = f.run(
            &TraverseRequest {
                allowed_types: Some(vec!["CITES".into()]),
                ..root(&a)
            },
            &QueryLimits::default(),
        );
        assert_eq!(typed.nodes.len(), 2);
        assert_eq!(typed.edges[0].relationship_type, "CITES");
    }

    #[test]
    fn deleted_roots_and_neighbours_are_skipped() {
        let f = Fixture::new();
        let a = f.node("A");
        let b = f.node("B");
        let gone = f.node("Gone");
        f.edge("R", &a, &b);
        f.edge("R", &a, &gone);
        f.store
            .write(|tx| delete_object(tx, &f.ctx, gone.canonical_id(), 1))
            .unwrap();

        let result = f.run(
            &TraverseRequest::from_roots([
                *a.canonical_id().as_uuid(),
                *gone.canonical_id().as_uuid(),
                Uuid::now_v7(),
            ]),
            &QueryLimits::default(),
        );
        assert_eq!(result.roots, vec![a.canonical_id()]);
        assert_eq!(depths(&result), vec![(a.canonical_id(), 0), (b.canonical_id(), 1)]);
        assert_eq!(result.edges.len(), 1);
    }

    #[test]
    fn star_larger_than_limit_is_truncated() {
        let f = Fixture::new();
        let hub = f.node("Hub");
        for _ in 0..5 {
            let leaf = f.node("Leaf");
            f.edge("R", &hub, &leaf);
        }
        let result = f.run(
            &TraverseRequest {
                limit: Some(3),
                ..root(&hub)
            },
            &QueryLimits::default(),
        );
        assert!(result.truncated);
        assert!(result.has_next_page);
        assert_eq!(result.nodes.len(), 3);
        assert!(result.edges.len() <= 3);
        assert_eq!(result.result_count, 6);
        assert_eq!(result.approx_position_start, 1);
        assert_eq!(result.approx_position_end, 3);
    }

    #[test]
    fn pages_walk_the_discovery_order() {
        let f = Fixture::new();
        let hub = f.node("Hub");
        let leaves: Vec<_> = (0..4).map(|_| f.node("Leaf")).collect();
        for leaf in &leaves {
            f.edge("R", &hub, leaf);
        }
        let limits = QueryLimits::default();
        let first = f.run(
            &TraverseRequest {
                limit: Some(2),
                ..root(&hub)
            },
            &limits,
        );
        assert!(!first.has_previous_page);

        let second = f.run(
            &TraverseRequest {
                limit: Some(2),
                cursor: first.next_cursor.clone(),
                ..root(&hub)
            },
            &limits,
        );
        assert_eq!(
            second.nodes.iter().map(|n| n.canonical_id).collect::<Vec<_>>(),
            vec![leaves[1].canonical_id(), leaves[2].canonical_id()]
        );
        assert!(second.has_previous_page);
        assert_eq!(second.approx_position_start, 3);
        // Edges of the page connect its nodes to the hub.
        assert_eq!(second.edges.len(), 2);

        let back = f.run(
            &TraverseRequest {
                limit: Some(2),
                cursor: second.previous_cursor.clone(),
                page_direction: PageDirection::Backward,
                ..root(&hub)
            },
            &limits,
        );
        assert_eq!(
            back.nodes.iter().map(|n| n.canonical_id).collect::<Vec<_>>(),
            first.nodes.iter().map(|n| n.canonical_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn node_cap_marks_truncation() {
        let f = Fixture::new();
        let hub = f.node("Hub");
        for _ in 0..4 {
            let leaf = f.node("Leaf");
            f.edge("R", &hub, &leaf);
        }
        let limits = QueryLimits {
            traversal_node_cap: 3,
            ..QueryLimits::default()
        };
        let result = f.run(&root(&hub), &limits);
        assert_eq!(result.result_count, 3);
        assert!(result.truncated);
        assert!(!result.has_next_page);
    }

    #[test]
    fn search_cursor_is_rejected() {
        let f = Fixture::new();
        let a = f.node("A");
        let err = f
            .store
            .read(|r| {
                traverse(
                    r,
                    &f.ctx,
                    &TraverseRequest {
                        cursor: Some(Cursor::CreatedAt(chrono::Utc::now()).encode()),
                        ..root(&a)
                    },
                    &QueryLimits::default(),
                )
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)));
    }
}
