//! Content hashing for the versioned knowledge graph.
//!
//! Provides domain-separated BLAKE3 hashing over canonical JSON. Each record
//! kind hashes under its own domain tag so an object and a relationship with
//! byte-identical semantic content never share a fingerprint.

pub mod hasher;

pub use hasher::{canonical_json, ContentHasher, HasherError};
