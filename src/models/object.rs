//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Index entry for a single stored payload.
///
/// The payload itself lives on disk under `{storage_dir}/{bucket}/{name}`;
/// this struct only carries its metadata.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Parent bucket id.
    pub bucket_id: String,

    /// Object path within the bucket, e.g. `{user_id}/{millis}.pdf`.
    pub name: String,

    /// Identity that uploaded the object.
    pub owner_id: Uuid,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, hex encoded.
    pub etag: Option<String>,

    /// Upload time.
    pub created_at: DateTime<Utc>,
}
