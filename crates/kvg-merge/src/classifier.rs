//! Branch merge dry run.
//!
//! Compares the live heads of a source line against a target branch and
//! classifies every logical record. Nothing is written.
//!
//! Classification is head-to-head, not three-way: the change paths compared
//! are the ones recorded on each side's head version, counted only when that
//! head is an edit made after the lines diverged. Forked copies count as
//! untouched, and when one line is the other's parent its heads at or below
//! the fork point are shared history. Records that exist on
//! only one side by canonical id are re-paired by natural key `(type, key)`
//! when the other side holds an unpaired object with the same key.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use kvg_graph::{get_branch, ChainRecord, GraphError, GraphResult};
use kvg_store::{GraphReader, HeadPage, ObjectFilter, RelationshipFilter};
use kvg_types::{
    BranchId, CanonicalId, ChangeKind, GraphObject, TenantContext, VersionId, Versioned,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Classification of one logical record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Only on the source.
    Added,
    /// Only on the target, or identical content on both.
    Unchanged,
    /// Divergent content, disjoint change paths.
    FastForward,
    /// Divergent content, overlapping change paths.
    Conflict,
}

/// Input for [`preview_merge`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePreviewRequest {
    /// Source line; `None` is the main line.
    #[serde(default)]
    pub source_branch_id: Option<BranchId>,
    /// Capped by the configured hard limit.
    #[serde(default)]
    pub limit: Option<usize>,
    /// When `false`, exceeding the limit fails with `LimitExceeded`.
    #[serde(default = "default_allow_truncation")]
    pub allow_truncation: bool,
}

fn default_allow_truncation() -> bool {
    true
}

impl Default for MergePreviewRequest {
    fn default() -> Self {
        Self {
            source_branch_id: None,
            limit: None,
            allow_truncation: true,
        }
    }
}

/// Per-record detail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeEntry {
    pub canonical_id: CanonicalId,
    pub status: MergeStatus,
    pub source_head_id: Option<VersionId>,
    pub target_head_id: Option<VersionId>,
    pub source_paths: Vec<String>,
    pub target_paths: Vec<String>,
    /// Overlapping paths; only set for conflicts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

/// Counts per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub total: usize,
    pub unchanged: usize,
    pub added: usize,
    pub fast_forward: usize,
    pub conflict: usize,
}

impl MergeCounts {
    fn tally(entries: &[MergeEntry]) -> Self {
        let mut counts = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            match entry.status {
                MergeStatus::Added => counts.added += 1,
                MergeStatus::Unchanged => counts.unchanged += 1,
                MergeStatus::FastForward => counts.fast_forward += 1,
                MergeStatus::Conflict => counts.conflict += 1,
            }
        }
        counts
    }
}

/// Result of [`preview_merge`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BranchMergeSummary {
    pub target_branch_id: BranchId,
    pub source_branch_id: Option<BranchId>,
    pub total_objects: usize,
    pub unchanged_count: usize,
    pub added_count: usize,
    pub fast_forward_count: usize,
    pub conflict_count: usize,
    pub relationship_total: usize,
    pub relationship_unchanged_count: usize,
    pub relationship_added_count: usize,
    pub relationship_fast_forward_count: usize,
    pub relationship_conflict_count: usize,
    /// Some heads on either side were not enumerated.
    pub truncated: bool,
    pub hard_limit: usize,
    pub objects: Vec<MergeEntry>,
    pub relationships: Vec<MergeEntry>,
}

/// How the two lines being compared are related.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lineage {
    /// Neither line was forked from the other.
    Siblings,
    /// The target branch descends from the source line.
    SourceIsParent,
    /// The source branch descends from the target.
    TargetIsParent,
}

/// Scopes of both sides plus their lineage.
struct Sides {
    source: TenantContext,
    target: TenantContext,
    lineage: Lineage,
}

/// Whether `line` was forked, directly or through intermediate branches, from
/// `ancestor`. `None` is the main line.
fn descends_from(
    parents: &HashMap<BranchId, Option<BranchId>>,
    line: Option<BranchId>,
    ancestor: Option<BranchId>,
) -> bool {
    let mut current = line;
    let mut seen = BTreeSet::new();
    while let Some(id) = current {
        if !seen.insert(id) {
            return false;
        }
        let Some(parent) = parents.get(&id).copied() else {
            return false;
        };
        if parent == ancestor {
            return true;
        }
        current = parent;
    }
    false
}

/// Version at which the chain of `head` was forked onto its branch, if it was.
fn fork_base<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    head: &C,
) -> GraphResult<Option<u32>> {
    let chain = C::load_chain(reader, ctx, head.canonical_id(), None, None)?;
    Ok(chain
        .last()
        .filter(|root| root.meta().change_summary.kind == ChangeKind::Forked)
        .map(Versioned::version))
}

/// Paths `head` changed since the two lines diverged.
///
/// A forked copy changed nothing. On the parent line, versions at or below
/// the child's fork point are shared history, not divergent edits.
fn divergent_paths<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    head: Option<&C>,
    child: Option<(&C, &TenantContext)>,
) -> GraphResult<BTreeSet<String>> {
    let Some(head) = head else {
        return Ok(BTreeSet::new());
    };
    let summary = &head.meta().change_summary;
    if summary.kind == ChangeKind::Forked {
        return Ok(BTreeSet::new());
    }
    if let Some((child, child_ctx)) = child {
        if let Some(base) = fork_base(reader, child_ctx, child)? {
            if head.version() <= base {
                return Ok(BTreeSet::new());
            }
        }
    }
    Ok(summary.paths.clone())
}

/// Classify a pair of heads given each side's divergent paths.
fn classify<T: Versioned>(
    source: Option<&T>,
    target: Option<&T>,
    source_paths: &BTreeSet<String>,
    target_paths: &BTreeSet<String>,
) -> (MergeStatus, Vec<String>) {
    match (source, target) {
        (Some(_), None) => (MergeStatus::Added, Vec::new()),
        (None, _) => (MergeStatus::Unchanged, Vec::new()),
        (Some(s), Some(t)) if s.content_hash() == t.content_hash() => {
            (MergeStatus::Unchanged, Vec::new())
        }
        (Some(_), Some(_)) => {
            let overlap: Vec<String> = source_paths.intersection(target_paths).cloned().collect();
            if overlap.is_empty() {
                (MergeStatus::FastForward, overlap)
            } else {
                (MergeStatus::Conflict, overlap)
            }
        }
    }
}

fn entry<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    sides: &Sides,
    canonical_id: CanonicalId,
    source: Option<&C>,
    target: Option<&C>,
) -> GraphResult<MergeEntry> {
    let (source_paths, target_paths) = match sides.lineage {
        Lineage::SourceIsParent => (
            divergent_paths(reader, source, target.map(|t| (t, &sides.target)))?,
            divergent_paths(reader, target, None)?,
        ),
        Lineage::TargetIsParent => (
            divergent_paths(reader, source, None)?,
            divergent_paths(reader, target, source.map(|s| (s, &sides.source)))?,
        ),
        Lineage::Siblings => (
            divergent_paths(reader, source, None)?,
            divergent_paths(reader, target, None)?,
        ),
    };
    let (status, conflicts) = classify(source, target, &source_paths, &target_paths);
    Ok(MergeEntry {
        canonical_id,
        status,
        source_head_id: source.map(Versioned::id),
        target_head_id: target.map(Versioned::id),
        source_paths: source_paths.into_iter().collect(),
        target_paths: target_paths.into_iter().collect(),
        conflicts,
    })
}

fn entries<C: ChainRecord, R: GraphReader + ?Sized>(
    reader: &R,
    sides: &Sides,
    pairs: &Pairs<C>,
) -> GraphResult<Vec<MergeEntry>> {
    pairs
        .iter()
        .map(|(id, (s, t))| entry(reader, sides, *id, s.as_ref(), t.as_ref()))
        .collect()
}

type Pairs<T> = BTreeMap<CanonicalId, (Option<T>, Option<T>)>;

/// Pair two head sets by canonical id, in canonical id order.
fn pair_by_canonical<T: Versioned>(source: Vec<T>, target: Vec<T>) -> Pairs<T> {
    let mut pairs: Pairs<T> = BTreeMap::new();
    for head in source {
        let id = head.canonical_id();
        pairs.entry(id).or_default().0 = Some(head);
    }
    for head in target {
        let id = head.canonical_id();
        pairs.entry(id).or_default().1 = Some(head);
    }
    pairs
}

/// Join source-only and target-only objects that share `(type, key)`.
fn repair_by_key(pairs: &mut Pairs<GraphObject>) {
    let mut target_only: HashMap<(String, String), CanonicalId> = HashMap::new();
    for (id, (source, target)) in pairs.iter() {
        if let (None, Some(t)) = (source, target) {
            if let Some(key) = &t.key {
                target_only.insert((t.object_type.clone(), key.clone()), *id);
            }
        }
    }
    if target_only.is_empty() {
        return;
    }

    let source_only: Vec<(CanonicalId, (String, String))> = pairs
        .iter()
        .filter_map(|(id, (source, target))| match (source, target) {
            (Some(s), None) => s.key.clone().map(|k| (*id, (s.object_type.clone(), k))),
            _ => None,
        })
        .collect();

    for (source_id, natural_key) in source_only {
        let Some(target_id) = target_only.remove(&natural_key) else {
            continue;
        };
        let target = pairs.remove(&target_id).and_then(|(_, t)| t);
        if let Some(slot) = pairs.get_mut(&source_id) {
            slot.1 = target;
        }
    }
}

/// Enumerate up to `limit` heads; `true` if more exist.
fn enumerate<T>(mut heads: Vec<T>, limit: usize) -> (Vec<T>, bool) {
    let more = heads.len() > limit;
    heads.truncate(limit);
    (heads, more)
}

/// Compare the source line against `target_branch_id`.
pub fn preview_merge<R: GraphReader + ?Sized>(
    reader: &R,
    ctx: &TenantContext,
    target_branch_id: BranchId,
    request: &MergePreviewRequest,
    hard_limit: usize,
) -> GraphResult<BranchMergeSummary> {
    get_branch(reader, ctx, target_branch_id)?;
    if let Some(source) = request.source_branch_id {
        get_branch(reader, ctx, source)?;
    }
    let parents: HashMap<BranchId, Option<BranchId>> = reader
        .branches(ctx)?
        .into_iter()
        .map(|b| (b.id, b.parent_branch_id))
        .collect();
    let lineage = if descends_from(&parents, Some(target_branch_id), request.source_branch_id) {
        Lineage::SourceIsParent
    } else if descends_from(&parents, request.source_branch_id, Some(target_branch_id)) {
        Lineage::TargetIsParent
    } else {
        Lineage::Siblings
    };
    let limit = request.limit.unwrap_or(hard_limit).clamp(1, hard_limit.max(1));
    let probe = HeadPage::first(limit + 1);
    let sides = Sides {
        source: ctx.on_branch(request.source_branch_id),
        target: ctx.on_branch(Some(target_branch_id)),
        lineage,
    };
    let (source_ctx, target_ctx) = (&sides.source, &sides.target);

    let (source_objects, more_s) =
        enumerate(reader.object_heads(source_ctx, &ObjectFilter::live(), probe)?, limit);
    let (target_objects, more_t) =
        enumerate(reader.object_heads(target_ctx, &ObjectFilter::live(), probe)?, limit);
    let all_rels = RelationshipFilter::live();
    let (source_rels, more_sr) =
        enumerate(reader.relationship_heads(source_ctx, &all_rels, probe)?, limit);
    let (target_rels, more_tr) =
        enumerate(reader.relationship_heads(target_ctx, &all_rels, probe)?, limit);

    let truncated = more_s || more_t || more_sr || more_tr;
    if truncated && !request.allow_truncation {
        return Err(GraphError::LimitExceeded {
            what: "merge preview heads".into(),
            limit,
        });
    }

    let mut object_pairs = pair_by_canonical(source_objects, target_objects);
    repair_by_key(&mut object_pairs);
    let objects = entries(reader, &sides, &object_pairs)?;
    let relationships = entries(reader, &sides, &pair_by_canonical(source_rels, target_rels))?;

    let o = MergeCounts::tally(&objects);
    let r = MergeCounts::tally(&relationships);
    debug!(
        target = %target_branch_id,
        objects = o.total,
        conflicts = o.conflict,
        relationships = r.total,
        truncated,
        "merge preview computed"
    );
    Ok(BranchMergeSummary {
        target_branch_id,
        source_branch_id: request.source_branch_id,
        total_objects: o.total,
        unchanged_count: o.unchanged,
        added_count: o.added,
        fast_forward_count: o.fast_forward,
        conflict_count: o.conflict,
        relationship_total: r.total,
        relationship_unchanged_count: r.unchanged,
        relationship_added_count: r.added,
        relationship_fast_forward_count: r.fast_forward,
        relationship_conflict_count: r.conflict,
        truncated,
        hard_limit,
        objects,
        relationships,
    })
}
