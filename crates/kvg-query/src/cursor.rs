//! Opaque pagination cursors.
//!
//! A cursor is the hex encoding of a short tagged token. Callers must treat
//! it as opaque; anything that does not decode to the expected kind is
//! rejected as invalid input.

use chrono::{DateTime, Utc};
use kvg_graph::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};

/// Which way a page is read relative to its cursor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageDirection {
    #[default]
    Forward,
    Backward,
}

/// A decoded cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cursor {
    /// Search position: the `created_at` of the last item returned.
    CreatedAt(DateTime<Utc>),
    /// Traversal position: an index into the node discovery order.
    Offset(usize),
}

impl Cursor {
    pub fn encode(&self) -> String {
        let token = match self {
            Self::CreatedAt(ts) => format!("c:{}", ts.timestamp_micros()),
            Self::Offset(offset) => format!("o:{offset}"),
        };
        hex::encode(token)
    }

    pub fn decode(raw: &str) -> GraphResult<Self> {
        let invalid = || GraphError::invalid(format!("invalid cursor {raw:?}"));
        let bytes = hex::decode(raw.trim()).map_err(|_| invalid())?;
        let token = String::from_utf8(bytes).map_err(|_| invalid())?;
        match token.split_once(':') {
            Some(("c", micros)) => {
                let micros: i64 = micros.parse().map_err(|_| invalid())?;
                DateTime::from_timestamp_micros(micros)
                    .map(Self::CreatedAt)
                    .ok_or_else(invalid)
            }
            Some(("o", offset)) => offset.parse().map(Self::Offset).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }

    /// Decode a search cursor.
    pub fn created_at(raw: &str) -> GraphResult<DateTime<Utc>> {
        match Self::decode(raw)? {
            Self::CreatedAt(ts) => Ok(ts),
            Self::Offset(_) => Err(GraphError::invalid("cursor does not belong to a search")),
        }
    }

    /// Decode a traversal cursor.
    pub fn offset(raw: &str) -> GraphResult<usize> {
        match Self::decode(raw)? {
            Self::Offset(offset) => Ok(offset),
            Self::CreatedAt(_) => Err(GraphError::invalid("cursor does not belong to a traversal")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvg_types::truncate_to_micros;

    #[test]
    fn created_at_cursor_survives_encoding() {
        let ts = truncate_to_micros(Utc::now());
        let raw = Cursor::CreatedAt(ts).encode();
        assert_eq!(Cursor::created_at(&raw).unwrap(), ts);
    }

    #[test]
    fn offset_cursor_survives_encoding() {
        let raw = Cursor::Offset(42).encode();
        assert_eq!(Cursor::offset(&raw).unwrap(), 42);
    }

    #[test]
    fn garbage_is_invalid_input() {
        let bad_number = hex::encode("c:abc");
        let bad_kind = hex::encode("x:1");
        for raw in ["", "zz", "not-a-cursor", bad_number.as_str(), bad_kind.as_str()] {
            let err = Cursor::decode(raw).unwrap_err();
            assert_eq!(err.code(), "invalid_input", "{raw:?}");
        }
    }

    #[test]
    fn kinds_do_not_mix() {
        let raw = Cursor::Offset(1).encode();
        assert!(Cursor::created_at(&raw).is_err());
        let raw = Cursor::CreatedAt(Utc::now()).encode();
        assert!(Cursor::offset(&raw).is_err());
    }
}
