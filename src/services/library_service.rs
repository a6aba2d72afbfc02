//! LibraryService: the book flows: list, upload, download and delete, plus
//! the per-account storage-used aggregate behind the quota.
//!
//! Upload and delete are each two independent steps (object store, then
//! metadata row, or the reverse) with best-effort compensation only. A
//! failure between the steps can leave an orphaned object; that window is
//! logged, not reconciled.

use super::{
    staging::StagedFile,
    storage_service::{StorageError, StorageService},
};
use crate::{
    auth::Caller,
    constants::{BOOKS_BUCKET, MAX_NAME_CHARS, MAX_TITLE_CHARS},
    models::{
        book::{Book, NewBook, StorageUsage},
        object::StoredObject,
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::fs::File;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("uploaded file is empty")]
    EmptyFile,
    #[error("storage quota exceeded: {used} bytes used, {requested} requested, {quota} allowed")]
    QuotaExceeded { used: i64, requested: i64, quota: i64 },
    #[error("book `{0}` not found")]
    BookNotFound(Uuid),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type LibraryResult<T> = Result<T, LibraryError>;

const BOOK_COLUMNS: &str =
    "id, user_id, title, author, file_path, file_size, mime_type, cover_url, uploaded_at";

/// Fresh object names are timestamp based; a same-millisecond collision is
/// retried with the next millisecond this many times.
const NAME_ATTEMPTS: i64 = 5;

#[derive(Clone)]
pub struct LibraryService {
    db: SqlitePool,
    storage: StorageService,
    quota_bytes: i64,
}

impl LibraryService {
    pub fn new(db: SqlitePool, storage: StorageService, quota_bytes: i64) -> Self {
        Self {
            db,
            storage,
            quota_bytes,
        }
    }

    pub fn storage(&self) -> &StorageService {
        &self.storage
    }

    pub fn quota_bytes(&self) -> i64 {
        self.quota_bytes
    }

    /// Sum of `file_size` over the caller's own books.
    pub async fn storage_used(&self, caller: &Caller) -> LibraryResult<i64> {
        let used = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(file_size), 0) FROM books WHERE user_id = ?",
        )
        .bind(caller.user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(used)
    }

    pub async fn usage(&self, caller: &Caller) -> LibraryResult<StorageUsage> {
        let used = self.storage_used(caller).await?;
        Ok(StorageUsage::new(used, self.quota_bytes))
    }

    /// The caller's books, newest first.
    pub async fn list_books(&self, caller: &Caller) -> LibraryResult<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE user_id = ?
             ORDER BY uploaded_at DESC, id DESC"
        ))
        .bind(caller.user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(books)
    }

    pub async fn get_book(&self, caller: &Caller, id: Uuid) -> LibraryResult<Book> {
        sqlx::query_as::<_, Book>(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE id = ? AND user_id = ?"
        ))
        .bind(id)
        .bind(caller.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(LibraryError::BookNotFound(id))
    }

    /// Store a staged file as a new book.
    ///
    /// The quota check runs before the object store is touched. It is a
    /// plain read-then-act: two concurrent uploads can both pass it.
    pub async fn upload_book(
        &self,
        caller: &Caller,
        new_book: NewBook,
        staged: &StagedFile,
    ) -> LibraryResult<Book> {
        let new_book = validate_new_book(new_book)?;
        if staged.size == 0 {
            return Err(LibraryError::EmptyFile);
        }

        let used = self.storage_used(caller).await?;
        check_quota(used, staged.size, self.quota_bytes)?;

        let object = self.store_payload(caller, staged).await?;

        let inserted = sqlx::query_as::<_, Book>(&format!(
            "INSERT INTO books ({BOOK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {BOOK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(caller.user_id)
        .bind(&new_book.title)
        .bind(&new_book.author)
        .bind(&object.name)
        .bind(object.size_bytes)
        .bind(&object.content_type)
        .bind(&new_book.cover_url)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(book) => {
                info!(
                    user_id = %caller.user_id,
                    book_id = %book.id,
                    size = book.file_size,
                    "uploaded book `{}`",
                    book.title
                );
                Ok(book)
            }
            Err(err) => {
                if let Err(cleanup) = self
                    .storage
                    .remove_objects(caller, BOOKS_BUCKET, &[object.name.as_str()])
                    .await
                {
                    warn!(
                        "failed to remove object {} after metadata insert failed: {}",
                        object.name, cleanup
                    );
                }
                Err(LibraryError::Sqlx(err))
            }
        }
    }

    async fn store_payload(&self, caller: &Caller, staged: &StagedFile) -> LibraryResult<StoredObject> {
        let ext = staged.extension();
        let start = Utc::now().timestamp_millis();
        let mut attempt = 0;
        loop {
            let name = book_object_name(caller.user_id, start + attempt, ext.as_deref());
            let result = self
                .storage
                .upload_object_stream(
                    caller,
                    BOOKS_BUCKET,
                    &name,
                    staged.content_type.clone(),
                    staged.reader_stream().await?,
                )
                .await;
            match result {
                Err(StorageError::ObjectAlreadyExists { .. }) if attempt + 1 < NAME_ATTEMPTS => {
                    attempt += 1;
                }
                other => return Ok(other?),
            }
        }
    }

    /// Look up a book and open its payload.
    pub async fn open_book(&self, caller: &Caller, id: Uuid) -> LibraryResult<(Book, StoredObject, File)> {
        let book = self.get_book(caller, id).await?;
        let (object, file) = self
            .storage
            .get_object_reader(caller, BOOKS_BUCKET, &book.file_path)
            .await?;
        Ok((book, object, file))
    }

    /// Delete the metadata row, then try to remove the payload.
    ///
    /// The delete succeeds once the row is gone; a payload that cannot be
    /// removed is only logged.
    pub async fn delete_book(&self, caller: &Caller, id: Uuid) -> LibraryResult<Book> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "DELETE FROM books WHERE id = ? AND user_id = ? RETURNING {BOOK_COLUMNS}"
        ))
        .bind(id)
        .bind(caller.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(LibraryError::BookNotFound(id))?;

        match self
            .storage
            .remove_objects(caller, BOOKS_BUCKET, &[book.file_path.as_str()])
            .await
        {
            Ok(removed) if removed.is_empty() => {
                warn!("book {} had no stored object at {}", book.id, book.file_path);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "book {} deleted but object {} was left behind: {}",
                    book.id, book.file_path, err
                );
            }
        }

        info!(user_id = %caller.user_id, book_id = %book.id, "deleted book `{}`", book.title);
        Ok(book)
    }
}

/// `{user_id}/{millis}` plus `.{ext}` when the upload had a usable extension.
pub fn book_object_name(user_id: Uuid, millis: i64, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{}/{}.{}", user_id, millis, ext),
        None => format!("{}/{}", user_id, millis),
    }
}

/// Reject when `used + requested` would pass the quota. Reaching it exactly is allowed.
pub fn check_quota(used: i64, requested: i64, quota: i64) -> LibraryResult<()> {
    if used.saturating_add(requested) > quota {
        return Err(LibraryError::QuotaExceeded {
            used,
            requested,
            quota,
        });
    }
    Ok(())
}

fn validate_new_book(input: NewBook) -> LibraryResult<NewBook> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(LibraryError::InvalidInput("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(LibraryError::InvalidInput(format!(
            "title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }

    let author = non_blank(input.author);
    if author
        .as_ref()
        .is_some_and(|a| a.chars().count() > MAX_NAME_CHARS)
    {
        return Err(LibraryError::InvalidInput(format!(
            "author must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }

    let cover_url = non_blank(input.cover_url);
    if let Some(url) = &cover_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(LibraryError::InvalidInput(
                "cover_url must be an http(s) URL".into(),
            ));
        }
    }

    Ok(NewBook {
        title,
        author,
        cover_url,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_is_namespaced_by_owner() {
        let user = Uuid::new_v4();
        let name = book_object_name(user, 1_700_000_000_123, Some("pdf"));
        assert_eq!(name, format!("{}/1700000000123.pdf", user));
        assert_eq!(
            book_object_name(user, 42, None),
            format!("{}/42", user)
        );
    }

    #[test]
    fn quota_allows_filling_exactly() {
        assert!(check_quota(100, 100, 200).is_ok());
        assert!(check_quota(0, 200, 200).is_ok());
    }

    #[test]
    fn quota_rejects_overflow() {
        let err = check_quota(150, 51, 200).unwrap_err();
        assert!(matches!(
            err,
            LibraryError::QuotaExceeded {
                used: 150,
                requested: 51,
                quota: 200
            }
        ));
        assert!(check_quota(i64::MAX, 1, 200).is_err());
    }

    #[test]
    fn title_is_required_and_trimmed() {
        let err = validate_new_book(NewBook {
            title: "   ".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput(_)));

        let ok = validate_new_book(NewBook {
            title: "  Dune ".into(),
            author: Some("  ".into()),
            cover_url: Some("".into()),
        })
        .unwrap();
        assert_eq!(ok.title, "Dune");
        assert_eq!(ok.author, None);
        assert_eq!(ok.cover_url, None);
    }

    #[test]
    fn overlong_title_is_rejected() {
        let err = validate_new_book(NewBook {
            title: "x".repeat(MAX_TITLE_CHARS + 1),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput(_)));
    }

    #[test]
    fn cover_url_must_be_http() {
        let err = validate_new_book(NewBook {
            title: "Dune".into(),
            cover_url: Some("javascript:alert(1)".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput(_)));
    }
}
