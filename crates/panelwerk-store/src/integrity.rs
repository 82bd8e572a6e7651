// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blob integrity — SHA-256 digests recorded at `put` and checked at `get`.

use panelwerk_core::error::{PanelwerkError, Result};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `Err(IntegrityMismatch)` unless `data` hashes to `expected_hex`.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hash_bytes(data);
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(PanelwerkError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn uppercase_digest_matches() {
        let digest = hash_bytes(b"page").to_ascii_uppercase();
        assert!(verify_hash(b"page", &digest).is_ok());
    }

    #[test]
    fn mismatch_reports_both_digests() {
        match verify_hash(b"a", "0000") {
            Err(PanelwerkError::IntegrityMismatch { expected, actual }) => {
                assert_eq!(expected, "0000");
                assert_eq!(actual, hash_bytes(b"a"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
