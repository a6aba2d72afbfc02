//! src/services/storage_service.rs
//!
//! StorageService: a private object store backed by SQLite for the object
//! index and local disk for payloads laid out as `base_path/{bucket}/{name}`.
//! Every operation runs through the object ownership rule in `policy`: a
//! caller may only touch names whose first segment is their own id.

use crate::{auth::Caller, models::bucket::Bucket, models::object::StoredObject, policy};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, key: String },
    #[error("object exceeds the maximum allowed size of {limit} bytes")]
    ObjectTooLarge { limit: i64 },
    #[error("object `{0}` is outside the caller's namespace")]
    AccessDenied(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("upload body could not be read: {0}")]
    IncomingBody(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the object operations the library needs:
/// - Upload an object (streams bytes to disk and indexes it in SQLite)
/// - Open an object for reading
/// - Remove objects (index row first, then the payload)
#[derive(Clone)]
pub struct StorageService {
    /// SQLite pool holding the `buckets` and `objects` tables.
    pub db: SqlitePool,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;

const OBJECT_COLUMNS: &str =
    "id, bucket_id, name, owner_id, content_type, size_bytes, etag, created_at";

impl StorageService {
    pub fn new(db: SqlitePool, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") || key.contains("//")
        {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Payload location for `bucket/key`. Parent directories may not exist yet.
    pub fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_root(bucket_name);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    /// Create the bucket row and directory if they do not exist yet.
    ///
    /// An existing bucket keeps its stored settings.
    pub async fn ensure_bucket(
        &self,
        name: &str,
        public: bool,
        file_size_limit: Option<i64>,
    ) -> StorageResult<Bucket> {
        fs::create_dir_all(self.bucket_root(name)).await?;
        sqlx::query(
            "INSERT INTO buckets (id, name, public, file_size_limit, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(name)
        .bind(name)
        .bind(public)
        .bind(file_size_limit)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        self.fetch_bucket(name).await
    }

    pub async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, public, file_size_limit, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))
    }

    /// Look up an index row the caller is allowed to see.
    ///
    /// Objects outside the caller's namespace are reported as missing.
    async fn fetch_visible_object(
        &self,
        caller: &Caller,
        bucket: &Bucket,
        key: &str,
    ) -> StorageResult<StoredObject> {
        let not_found = || StorageError::ObjectNotFound {
            bucket: bucket.name.clone(),
            key: key.to_string(),
        };
        if !policy::can_access_object(caller, key) {
            return Err(not_found());
        }
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket_id = ? AND name = ?"
        ))
        .bind(&bucket.id)
        .bind(key)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(not_found)
    }

    /// Stream-upload an object to disk and index it.
    ///
    /// - Refuses names outside the caller's namespace.
    /// - Writes to a temporary file while computing size and MD5 etag.
    /// - Aborts once the bucket's size ceiling is passed.
    /// - Never overwrites: an existing name fails with `ObjectAlreadyExists`.
    /// - Removes the payload again if the index insert fails.
    pub async fn upload_object_stream<S>(
        &self,
        caller: &Caller,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;
        if !policy::can_access_object(caller, key) {
            return Err(StorageError::AccessDenied(key.to_string()));
        }
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let already_exists = || StorageError::ObjectAlreadyExists {
            bucket: bucket_rec.name.clone(),
            key: key.to_string(),
        };

        let file_path = self.object_path(&bucket_rec.name, key);
        if fs::try_exists(&file_path).await? {
            return Err(already_exists());
        }
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = write_payload(&tmp_path, stream, bucket_rec.file_size_limit).await;
        let (size_bytes, etag) = match written {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        // Hard-link then unlink so a concurrent writer of the same name loses
        // instead of silently replacing the payload.
        if let Err(err) = fs::hard_link(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            if err.kind() == ErrorKind::AlreadyExists {
                return Err(already_exists());
            }
            return Err(StorageError::Io(err));
        }
        let _ = fs::remove_file(&tmp_path).await;

        let insert_result = sqlx::query_as::<_, StoredObject>(&format!(
            "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {OBJECT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&bucket_rec.id)
        .bind(key)
        .bind(caller.user_id)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await;

        match insert_result {
            Ok(obj) => {
                debug!("stored {}/{} ({} bytes)", bucket_rec.name, key, size_bytes);
                Ok(obj)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                if is_unique_violation(&err) {
                    Err(already_exists())
                } else {
                    Err(StorageError::Sqlx(err))
                }
            }
        }
    }

    /// Open an object for reading.
    ///
    /// Returns ObjectNotFound if the index row exists but the payload is gone.
    pub async fn get_object_reader(
        &self,
        caller: &Caller,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_visible_object(caller, &bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Remove objects by name.
    ///
    /// Names the caller cannot see or that do not exist are skipped; the
    /// returned list holds only what was actually removed. Each index row is
    /// deleted before its payload.
    pub async fn remove_objects(
        &self,
        caller: &Caller,
        bucket: &str,
        keys: &[&str],
    ) -> StorageResult<Vec<StoredObject>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let bucket_root = self.bucket_root(&bucket_rec.name);
        let mut removed = Vec::with_capacity(keys.len());

        for key in keys {
            self.ensure_key_safe(key)?;
            let object = match self.fetch_visible_object(caller, &bucket_rec, key).await {
                Ok(object) => object,
                Err(StorageError::ObjectNotFound { .. }) => continue,
                Err(err) => return Err(err),
            };

            sqlx::query("DELETE FROM objects WHERE id = ?")
                .bind(object.id)
                .execute(&self.db)
                .await?;

            let file_path = self.object_path(&bucket_rec.name, key);
            match fs::remove_file(&file_path).await {
                Ok(_) => debug!("removed physical file {}", file_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("file {} already missing", file_path.display());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }

            if let Some(parent) = file_path.parent() {
                prune_empty_dirs(parent, &bucket_root).await;
            }
            removed.push(object);
        }

        Ok(removed)
    }
}

/// Copy the stream into `path`, returning (size, md5 hex).
async fn write_payload<S>(path: &Path, stream: S, limit: Option<i64>) -> StorageResult<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        if let Some(limit) = limit {
            if size_bytes > limit {
                return Err(StorageError::ObjectTooLarge { limit });
            }
        }
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size_bytes, format!("{:x}", digest.compute())))
}

/// Remove empty directories from `start` upward, stopping below `stop`.
async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StorageService {
        let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        StorageService::new(pool, "/srv/objects")
    }

    #[tokio::test]
    async fn rejects_traversal_and_malformed_keys() {
        let svc = service();
        for key in ["", "/abs", "a/../b", "a//b", "trailing/", "a\\b", "a\nb"] {
            assert!(
                matches!(svc.ensure_key_safe(key), Err(StorageError::InvalidObjectKey)),
                "{key:?} should be rejected"
            );
        }
        assert!(svc.ensure_key_safe("user/1700000000000.epub").is_ok());
    }

    #[tokio::test]
    async fn object_path_mirrors_key_segments() {
        let svc = service();
        assert_eq!(
            svc.object_path("books", "abc/123.pdf"),
            PathBuf::from("/srv/objects/books/abc/123.pdf")
        );
    }
}
