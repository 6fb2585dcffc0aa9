//! JSON codecs for persisted throttle and runtime-guard state.
//!
//! Output is canonical: object keys sorted, non-ASCII escaped, no whitespace.
//! Decoding is lenient per field: a malformed field falls back to its default
//! and is reported in [`Decoded::issues`]. Only a document that is not a JSON
//! object, or carries an unknown version, fails as a whole.

mod canonical;
pub mod guard;
pub mod throttle;

use std::path::PathBuf;

use thiserror::Error;

pub use canonical::to_canonical_json;
pub use guard::{decode_guard_snapshot, encode_guard_snapshot};
pub use throttle::{decode_throttle_snapshot, encode_throttle_snapshot};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot root must be a JSON object")]
    NotAnObject,
    #[error("unsupported throttle snapshot version {0}")]
    UnsupportedVersion(u64),
    #[error("snapshot io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A field that could not be decoded and was left at its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub reason: String,
}

impl FieldIssue {
    pub(crate) fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub issues: Vec<FieldIssue>,
}

impl<T> Decoded<T> {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}
