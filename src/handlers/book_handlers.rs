//! HTTP handlers for the caller's books.
//! Upload bodies are spooled to a staging file first so the quota can be
//! checked before anything reaches the books bucket; downloads are streamed.

use crate::{
    AppState,
    auth::Caller,
    constants::{BOOKS_BUCKET, MAX_OBJECT_BYTES},
    errors::AppError,
    models::book::{Book, NewBook, StorageUsage},
    services::staging::{StagedFile, file_extension},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// `GET /api/books`
pub async fn list_books(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(state.library.list_books(&caller).await?))
}

/// `GET /api/books/{id}`
pub async fn get_book(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Book>, AppError> {
    Ok(Json(state.library.get_book(&caller, id).await?))
}

/// `POST /api/books`: multipart form with `title`, optional `author` and
/// `cover_url`, and exactly one `file` part.
pub async fn upload_book(
    State(state): State<AppState>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let size_limit = state
        .library
        .storage()
        .fetch_bucket(BOOKS_BUCKET)
        .await?
        .file_size_limit
        .unwrap_or(MAX_OBJECT_BYTES);
    let mut new_book = NewBook::default();
    let mut staged: Option<StagedFile> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => new_book.title = field.text().await.map_err(multipart_error)?,
            "author" => new_book.author = Some(field.text().await.map_err(multipart_error)?),
            "cover_url" => new_book.cover_url = Some(field.text().await.map_err(multipart_error)?),
            "file" => {
                if staged.is_some() {
                    return Err(AppError::bad_request("only one file may be uploaded at a time"));
                }
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let spooled = StagedFile::spool(
                    &state.staging_dir(),
                    field,
                    size_limit,
                    file_name,
                    content_type,
                )
                .await?;
                staged = Some(spooled);
            }
            other => tracing::debug!("ignoring unexpected form field `{}`", other),
        }
    }

    let staged = staged.ok_or_else(|| AppError::bad_request("a `file` part is required"))?;
    let book = state.library.upload_book(&caller, new_book, &staged).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// `GET /api/books/{id}/download`: stream the payload as an attachment.
pub async fn download_book(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (book, object, file) = state.library.open_book(&caller, id).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    let content_type = object
        .content_type
        .as_deref()
        .or(book.mime_type.as_deref())
        .unwrap_or("application/octet-stream");
    set_header(headers, header::CONTENT_TYPE, content_type, "application/octet-stream");
    set_header(
        headers,
        header::CONTENT_LENGTH,
        &object.size_bytes.max(0).to_string(),
        "0",
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download_filename(&book.title, &book.file_path)
    );
    set_header(headers, header::CONTENT_DISPOSITION, &disposition, "attachment");
    if let Some(etag) = object.etag.as_deref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    Ok(response)
}

/// `DELETE /api/books/{id}`
pub async fn delete_book(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.library.delete_book(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/storage/usage`
pub async fn storage_usage(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<StorageUsage>, AppError> {
    Ok(Json(state.library.usage(&caller).await?))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

fn set_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str, fallback: &'static str) {
    let value = HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(fallback));
    headers.insert(name, value);
}

/// `<title>.<ext>` made safe for a quoted Content-Disposition filename.
pub fn download_filename(title: &str, file_path: &str) -> String {
    let mut name: String = title
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string();
    if name.is_empty() {
        name.push_str("book");
    }
    let last_segment = file_path.rsplit('/').next().unwrap_or(file_path);
    if let Some(ext) = file_extension(last_segment) {
        name.push('.');
        name.push_str(&ext);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_uses_title_and_stored_extension() {
        assert_eq!(
            download_filename("Dune", "u/1700000000000.epub"),
            "Dune.epub"
        );
        assert_eq!(download_filename("Notes", "u/1700000000000"), "Notes");
    }

    #[test]
    fn filename_is_sanitized() {
        assert_eq!(
            download_filename("Say \"hi\"\\ café", "u/1.pdf"),
            "Say _hi__ caf_.pdf"
        );
        assert_eq!(download_filename("   ", "u/1.pdf"), "book.pdf");
    }
}
