//! Schema hashing
//!
//! The hash of a catalog is the lowercase hex SHA-256 of its canonical JSON.
//! Plans carry the hash of the schema they were generated against and of the
//! schema they produce; the executor compares both against live databases.

use sha2::{Digest, Sha256};

use crate::catalog::Catalog;
use crate::error::{LockplaneError, Result};

/// Calculate the schema hash of a catalog.
pub fn hash_catalog(catalog: &Catalog) -> String {
    hash_bytes(catalog.canonical_json().as_bytes())
}

/// Calculate the lowercase hex SHA-256 of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = hasher.finalize();
    format!("{:x}", hash)
}

/// Validate a plan's source hash against the hash of the live schema.
///
/// Returns `SourceHashMismatch` when they differ.
pub fn verify_source_hash(expected: &str, actual: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(LockplaneError::SourceHashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, SqlType, Table};

    #[test]
    fn empty_catalog_hash_is_stable() {
        assert_eq!(
            hash_catalog(&Catalog::empty()),
            hash_bytes(br#"{"tables":[]}"#)
        );
        assert_eq!(hash_catalog(&Catalog::empty()).len(), 64);
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_survives_serialization_round_trip() {
        let catalog = Catalog::new(vec![Table::new("users")
            .column(Column::new("id", SqlType::Serial).primary_key())
            .column(Column::new("name", SqlType::Varchar(Some(80))).default_sql("'anon'"))])
        .unwrap();
        let reparsed = Catalog::from_json(&catalog.to_json()).unwrap();
        assert_eq!(hash_catalog(&catalog), hash_catalog(&reparsed));
    }

    #[test]
    fn any_change_moves_the_hash() {
        let base = Table::new("users").column(Column::new("id", SqlType::Integer));
        let a = Catalog::new(vec![base.clone()]).unwrap();
        let b = Catalog::new(vec![base.column(Column::new("email", SqlType::Text))]).unwrap();
        assert_ne!(hash_catalog(&a), hash_catalog(&b));
    }

    #[test]
    fn verify_reports_both_hashes() {
        assert!(verify_source_hash("abc", "abc").is_ok());
        match verify_source_hash("abc", "def") {
            Err(LockplaneError::SourceHashMismatch { expected, actual }) => {
                assert_eq!(expected, "abc");
                assert_eq!(actual, "def");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
