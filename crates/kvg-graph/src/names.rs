//! Branch name rules.
//!
//! A branch name is a `/`-separated path of non-empty components, at most
//! [`MAX_BRANCH_NAME_LEN`] bytes after trimming. Control characters and the
//! characters in [`FORBIDDEN_CHARS`] are rejected anywhere; components must
//! not start with `.`. The main line is implicit, so `main` is reserved.

use crate::error::{GraphError, GraphResult};

pub const MAX_BRANCH_NAME_LEN: usize = 128;

/// Names that address the implicit main line.
pub const RESERVED_BRANCH_NAMES: &[&str] = &["main", "HEAD"];

const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\', '"', '<', '>', '|'];

/// Validate a branch name and return it trimmed.
///
/// ```
/// use kvg_graph::names::validate_branch_name;
///
/// assert_eq!(validate_branch_name(" feature/auth ").unwrap(), "feature/auth");
/// assert!(validate_branch_name("main").is_err());
/// assert!(validate_branch_name("a..b").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> GraphResult<String> {
    let name = name.trim();
    let reject = |reason: String| GraphError::invalid(format!("branch name {name:?}: {reason}"));

    if name.is_empty() {
        return Err(reject("must not be empty".into()));
    }
    if name.len() > MAX_BRANCH_NAME_LEN {
        return Err(reject(format!(
            "longer than {MAX_BRANCH_NAME_LEN} bytes"
        )));
    }
    if RESERVED_BRANCH_NAMES.contains(&name) {
        return Err(reject("reserved for the main line".into()));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(reject(format!("contains forbidden character {ch:?}")));
    }
    if name.contains("..") {
        return Err(reject("must not contain '..'".into()));
    }
    if name.ends_with(".lock") || name.ends_with('.') {
        return Err(reject("must not end with '.' or '.lock'".into()));
    }
    for component in name.split('/') {
        if component.is_empty() {
            return Err(reject("path components must not be empty".into()));
        }
        if component.starts_with('.') {
            return Err(reject(format!(
                "component {component:?} must not start with '.'"
            )));
        }
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_nested_names() {
        for name in ["develop", "v1.0", "feature/auth", "user/alice/fix-123", "review 2024"] {
            assert_eq!(validate_branch_name(name).unwrap(), name);
        }
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(validate_branch_name("  draft\t").unwrap(), "draft");
    }

    #[test]
    fn rejects_empty_and_blank() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("   ").is_err());
    }

    #[test]
    fn rejects_reserved_names() {
        assert!(validate_branch_name("main").is_err());
        assert!(validate_branch_name("HEAD").is_err());
        assert!(validate_branch_name("main/next").is_ok());
    }

    #[test]
    fn rejects_forbidden_and_control_characters() {
        for name in ["a~b", "a^b", "a:b", "a?b", "a*b", "a[b", "a\\b", "a|b", "a\nb"] {
            assert!(validate_branch_name(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn rejects_bad_paths() {
        for name in ["a..b", "/lead", "trail/", "a//b", "x/.hidden", ".hidden", "x.lock", "x."] {
            assert!(validate_branch_name(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "b".repeat(MAX_BRANCH_NAME_LEN + 1);
        assert!(validate_branch_name(&name).is_err());
        assert!(validate_branch_name(&name[1..]).is_ok());
    }

    #[test]
    fn errors_are_invalid_input() {
        let err = validate_branch_name("a..b").unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }
}
