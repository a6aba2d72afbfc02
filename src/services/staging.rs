//! Spooling of incoming upload bodies.
//!
//! The quota check needs the file size before anything is written to the
//! bucket, so the multipart file part is first copied into a private staging
//! file. The staging file is removed when the `StagedFile` is dropped.

use super::storage_service::{StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{io, path::Path};
use tempfile::NamedTempFile;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// A fully received upload waiting for the quota check.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    pub size: i64,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl StagedFile {
    /// Copy `stream` into a new file under `dir`, failing with
    /// `ObjectTooLarge` as soon as more than `limit` bytes arrive.
    /// Errors yielded by `stream` itself come back as `IncomingBody`.
    pub async fn spool<S, E>(
        dir: &Path,
        stream: S,
        limit: i64,
        file_name: Option<String>,
        content_type: Option<String>,
    ) -> StorageResult<Self>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        tokio::fs::create_dir_all(dir).await?;
        let dir = dir.to_path_buf();
        let (temp, std_file) = tokio::task::spawn_blocking(move || -> io::Result<_> {
            let temp = tempfile::Builder::new()
                .prefix(".upload-")
                .tempfile_in(&dir)?;
            let file = temp.reopen()?;
            Ok((temp, file))
        })
        .await
        .map_err(io::Error::other)??;
        let mut out = File::from_std(std_file);

        let mut size: i64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| StorageError::IncomingBody(err.into()))?;
            size += chunk.len() as i64;
            if size > limit {
                return Err(StorageError::ObjectTooLarge { limit });
            }
            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        Ok(Self {
            file: temp,
            size,
            file_name,
            content_type,
        })
    }

    /// Lowercased extension of the original file name, when it is a plain
    /// 1–10 character alphanumeric suffix.
    pub fn extension(&self) -> Option<String> {
        self.file_name.as_deref().and_then(file_extension)
    }

    /// Reopen the staged bytes as a stream for the object store.
    ///
    /// `self` must outlive the returned stream; the file is unlinked on drop.
    pub async fn reader_stream(&self) -> StorageResult<ReaderStream<File>> {
        let file = File::open(self.file.path()).await?;
        Ok(ReaderStream::new(file))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok::<_, io::Error>(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn extension_rules() {
        assert_eq!(file_extension("Dune.EPUB"), Some("epub".into()));
        assert_eq!(file_extension("archive.tar.gz"), Some("gz".into()));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".hidden"), None);
        assert_eq!(file_extension("book."), None);
        assert_eq!(file_extension("book.p df"), None);
        assert_eq!(file_extension("book.averyverylongext"), None);
    }

    #[tokio::test]
    async fn spools_and_counts_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedFile::spool(
            dir.path(),
            chunks(&[b"hello ", b"world"]),
            1024,
            Some("notes.txt".into()),
            Some("text/plain".into()),
        )
        .await
        .unwrap();

        assert_eq!(staged.size, 11);
        assert_eq!(staged.extension().as_deref(), Some("txt"));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn stops_past_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let err = StagedFile::spool(dir.path(), chunks(&[b"12345", b"6789"]), 8, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ObjectTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn broken_body_is_reported_as_incoming() {
        let dir = tempfile::tempdir().unwrap();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "body ended early")),
        ]);
        let err = StagedFile::spool(dir.path(), body, 1024, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IncomingBody(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn staging_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedFile::spool(dir.path(), chunks(&[b"x"]), 8, None, None)
            .await
            .unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        drop(staged);
        assert!(!path.exists());
    }
}
