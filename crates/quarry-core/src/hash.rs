//! # Schema Hasher
//!
//! Content-addressed identity for schema files. Two files are the same
//! schema iff their SHA-256 digests are equal — byte-for-byte identity,
//! not semantic equivalence. The evaluation server refuses mismatched
//! schemas regardless of semantic compatibility, so nothing weaker works.
//! Comparing content hashes rather than embedded version numbers also
//! survives renamed-but-identical schema variants.

use std::fmt;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// A SHA-256 digest of a schema file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaHash([u8; 32]);

impl SchemaHash {
    /// Hash the full content of the file at `path`.
    pub fn of_file(path: &Path) -> Result<Self, CoreError> {
        let bytes = fs::read(path).map_err(|e| CoreError::io(path, e))?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Hash an in-memory byte string.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SchemaHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaHash({self})")
    }
}
