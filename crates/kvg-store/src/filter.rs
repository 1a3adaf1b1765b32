//! Head-listing filters shared by every backend.
//!
//! Filters are evaluated against the *latest* version of each chain in the
//! requested scope. Tombstoned heads are excluded unless `include_deleted`.

use chrono::{DateTime, Utc};
use kvg_types::{CanonicalId, GraphObject, GraphRelationship, Versioned};

/// Filter over object heads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    /// Match any of these types; empty means every type.
    pub types: Vec<String>,
    pub key: Option<String>,
    /// Heads must carry every one of these labels.
    pub labels: Vec<String>,
    pub include_deleted: bool,
    /// Exclusive lower bound on the head's `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the head's `created_at`.
    pub created_before: Option<DateTime<Utc>>,
}

impl ObjectFilter {
    /// Live heads of every type.
    pub fn live() -> Self {
        Self::default()
    }

    /// Live heads with the given natural key.
    pub fn by_key(object_type: &str, key: &str) -> Self {
        Self {
            types: vec![object_type.to_string()],
            key: Some(key.to_string()),
            ..Self::default()
        }
    }

    /// Evaluate against a head.
    pub fn matches(&self, head: &GraphObject) -> bool {
        (self.include_deleted || !head.is_deleted())
            && (self.types.is_empty() || self.types.contains(&head.object_type))
            && self
                .key
                .as_ref()
                .map_or(true, |k| head.key.as_deref() == Some(k.as_str()))
            && self.labels.iter().all(|l| head.labels.contains(l))
            && within(head.created_at(), self.created_after, self.created_before)
    }
}

/// Which endpoint of a relationship must fall in a set of objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointMatch {
    /// `src_id` is in the set (outgoing edges of the set).
    Source(Vec<CanonicalId>),
    /// `dst_id` is in the set (incoming edges of the set).
    Target(Vec<CanonicalId>),
    /// Either endpoint is in the set.
    Either(Vec<CanonicalId>),
}

impl EndpointMatch {
    pub fn ids(&self) -> &[CanonicalId] {
        match self {
            Self::Source(ids) | Self::Target(ids) | Self::Either(ids) => ids,
        }
    }

    fn matches(&self, rel: &GraphRelationship) -> bool {
        match self {
            Self::Source(ids) => ids.contains(&rel.src_id),
            Self::Target(ids) => ids.contains(&rel.dst_id),
            Self::Either(ids) => ids.contains(&rel.src_id) || ids.contains(&rel.dst_id),
        }
    }
}

/// Filter over relationship heads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationshipFilter {
    /// Match any of these types; empty means every type.
    pub types: Vec<String>,
    pub src_id: Option<CanonicalId>,
    pub dst_id: Option<CanonicalId>,
    pub endpoints: Option<EndpointMatch>,
    pub include_deleted: bool,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl RelationshipFilter {
    /// Live heads of every type.
    pub fn live() -> Self {
        Self::default()
    }

    /// Live heads with the identity `(type, src, dst)`.
    pub fn by_identity(rel_type: &str, src_id: CanonicalId, dst_id: CanonicalId) -> Self {
        Self {
            types: vec![rel_type.to_string()],
            src_id: Some(src_id),
            dst_id: Some(dst_id),
            ..Self::default()
        }
    }

    /// Live heads touching `object` at either end.
    pub fn touching(object: CanonicalId) -> Self {
        Self {
            endpoints: Some(EndpointMatch::Either(vec![object])),
            ..Self::default()
        }
    }

    /// Evaluate against a head.
    pub fn matches(&self, head: &GraphRelationship) -> bool {
        (self.include_deleted || !head.is_deleted())
            && (self.types.is_empty() || self.types.contains(&head.relationship_type))
            && self.src_id.map_or(true, |id| head.src_id == id)
            && self.dst_id.map_or(true, |id| head.dst_id == id)
            && self.endpoints.as_ref().map_or(true, |e| e.matches(head))
            && within(head.created_at(), self.created_after, self.created_before)
    }
}

/// Ordering of a head listing. Ties on `created_at` break on `canonical_id`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeadOrder {
    #[default]
    Ascending,
    Descending,
}

/// Order and size of a head listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadPage {
    pub order: HeadOrder,
    /// `None` returns every match.
    pub limit: Option<usize>,
}

impl HeadPage {
    /// Every match, oldest first.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first(limit: usize) -> Self {
        Self {
            order: HeadOrder::Ascending,
            limit: Some(limit),
        }
    }

    pub fn last(limit: usize) -> Self {
        Self {
            order: HeadOrder::Descending,
            limit: Some(limit),
        }
    }
}

fn within(
    ts: DateTime<Utc>,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) -> bool {
    after.map_or(true, |a| ts > a) && before.map_or(true, |b| ts < b)
}

/// Sort heads by `(created_at, canonical_id)` in `order` and apply `limit`.
pub fn order_heads<T: Versioned>(mut heads: Vec<T>, page: HeadPage) -> Vec<T> {
    heads.sort_by(|a, b| {
        (a.created_at(), a.canonical_id()).cmp(&(b.created_at(), b.canonical_id()))
    });
    if page.order == HeadOrder::Descending {
        heads.reverse();
    }
    if let Some(limit) = page.limit {
        heads.truncate(limit);
    }
    heads
}
