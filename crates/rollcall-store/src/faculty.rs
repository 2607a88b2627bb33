//! Faculty credentials. Only used to gate reports; not part of matching.

use crate::{Store, StoreError};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the password.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

impl Store {
    /// True when `faculty_id` exists and `password` hashes to the stored value.
    pub fn verify_faculty(&self, faculty_id: &str, password: &str) -> Result<bool, StoreError> {
        if faculty_id.is_empty() || password.is_empty() {
            return Ok(false);
        }
        let hash = hash_password(password);
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM faculty WHERE faculty_id = ?1 AND password_hash = ?2",
                    params![faculty_id, hash],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}
