//! Represents a storage bucket: the namespace holding uploaded payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A storage bucket.
///
/// The library keeps every book payload in a single private bucket. The
/// bucket carries the per-object size ceiling enforced while streaming.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Bucket identifier (same as its name).
    pub id: String,

    /// Bucket name used in object paths on disk.
    pub name: String,

    /// Whether objects can be read without an owner check. Always false here.
    pub public: bool,

    /// Largest single object accepted, in bytes. `None` means unlimited.
    pub file_size_limit: Option<i64>,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
