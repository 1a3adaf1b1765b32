//! Diff engine for version property bags.
//!
//! Provides:
//! - **Normalization**: drop `null`-valued keys so absent and null compare equal
//! - **Merge-patch**: apply a partial property update over a head's map
//! - **Path diff**: the minimal set of JSON-pointer paths whose values differ

pub mod normalize;
pub mod property_diff;

pub use normalize::{merge_patch, normalize_labels, normalize_properties, normalize_value};
pub use property_diff::{diff_properties, escape_segment, PropertyChange, PropertyDiff};
