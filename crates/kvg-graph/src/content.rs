//! Content hashing of the semantic fields of a version.
//!
//! Only fields that carry meaning are hashed; ids, timestamps, version numbers
//! and tenant columns never are. Two records with equal hashes are treated as
//! equivalent by the merge classifier.

use chrono::{DateTime, Utc};
use kvg_crypto::ContentHasher;
use kvg_diff::normalize_properties;
use kvg_types::{CanonicalId, ContentHash, Properties};
use serde::Serialize;

use crate::error::GraphResult;

#[derive(Serialize)]
struct ObjectContent<'a> {
    #[serde(rename = "type")]
    object_type: &'a str,
    key: Option<&'a str>,
    status: Option<&'a str>,
    properties: Properties,
    labels: &'a [String],
}

#[derive(Serialize)]
struct RelationshipContent<'a> {
    #[serde(rename = "type")]
    relationship_type: &'a str,
    src_id: CanonicalId,
    dst_id: CanonicalId,
    properties: Properties,
    weight: f64,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
}

/// Hash of an object's semantic content. Properties are normalized first.
pub fn object_hash(
    object_type: &str,
    key: Option<&str>,
    status: Option<&str>,
    properties: &Properties,
    labels: &[String],
) -> GraphResult<ContentHash> {
    let content = ObjectContent {
        object_type,
        key,
        status,
        properties: normalize_properties(properties),
        labels,
    };
    Ok(ContentHasher::OBJECT.hash_json(&content)?)
}

/// Hash of a relationship's semantic content. Properties are normalized first.
pub fn relationship_hash(
    relationship_type: &str,
    src_id: CanonicalId,
    dst_id: CanonicalId,
    properties: &Properties,
    weight: f64,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
) -> GraphResult<ContentHash> {
    let content = RelationshipContent {
        relationship_type,
        src_id,
        dst_id,
        properties: normalize_properties(properties),
        weight,
        valid_from,
        valid_to,
    };
    Ok(ContentHasher::RELATIONSHIP.hash_json(&content)?)
}
