use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::instrument;

/// Result of streaming an object out of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResult {
    pub found: bool,
    pub content_length: u64,
}

impl FetchResult {
    pub const NOT_FOUND: FetchResult = FetchResult {
        found: false,
        content_length: 0,
    };
}

/// Blob store port. Objects are addressed by `(bucket, key)`; keys are not
/// opaque, they are path-like so a local backing store can map them straight
/// to the filesystem.
///
/// Ownership of the bytes passes to the store once `persist` returns; the
/// source file can then be deleted by the caller.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `file` under `(bucket, key)`. Returns the instant
    /// the payload was confirmed durable, which is what `uploaded_at` on the
    /// variant is set from.
    async fn persist(&self, bucket: &str, key: &str, file: &Utf8Path) -> Result<DateTime<Utc>>;

    /// Stream the object into `writer`. A missing object is not an error,
    /// it comes back as `FetchResult::NOT_FOUND`.
    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FetchResult>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    async fn delete_all(&self, bucket: &str, keys: &[String]) -> Result<()>;

    /// Public URL an HTTP layer can redirect to. Purely derived, no I/O.
    fn generate_object_url(&self, bucket: &str, key: &str) -> String;
}

/// Filesystem-backed reference store: `(bucket, key)` maps to
/// `root/bucket/key`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: Utf8PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: Utf8PathBuf) -> LocalFileStorage {
        LocalFileStorage { root }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Utf8PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalFileStorage {
    #[instrument(skip(self), level = "debug")]
    async fn persist(&self, bucket: &str, key: &str, file: &Utf8Path) -> Result<DateTime<Utc>> {
        let dest = self.object_path(bucket, key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err("could not create object directory")?;
        }
        tokio::fs::copy(file, &dest)
            .await
            .wrap_err_with(|| format!("error persisting object {}/{}", bucket, key))?;
        Ok(Utc::now())
    }

    #[instrument(skip(self, writer), level = "debug")]
    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FetchResult> {
        use tokio::io::ErrorKind;
        let open = tokio::fs::OpenOptions::new()
            .read(true)
            .open(self.object_path(bucket, key))
            .await;
        let mut file = match open {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FetchResult::NOT_FOUND),
            Err(err) => {
                return Err(err).wrap_err_with(|| format!("error opening object {}/{}", bucket, key))
            }
        };
        let content_length = tokio::io::copy(&mut file, writer)
            .await
            .wrap_err("error streaming object")?;
        writer.flush().await.wrap_err("error flushing object stream")?;
        Ok(FetchResult {
            found: true,
            content_length,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        tokio::fs::try_exists(self.object_path(bucket, key))
            .await
            .wrap_err("error checking if object exists")
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        tokio::fs::remove_file(self.object_path(bucket, key))
            .await
            .wrap_err_with(|| format!("error deleting object {}/{}", bucket, key))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_all(&self, bucket: &str, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(bucket, key).await?;
        }
        Ok(())
    }

    fn generate_object_url(&self, bucket: &str, key: &str) -> String {
        format!("file://{}/{}/{}", self.root, bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_ok};
    use pretty_assertions::assert_eq;

    use super::*;

    fn storage() -> (tempfile::TempDir, LocalFileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, LocalFileStorage::new(root))
    }

    #[tokio::test]
    async fn persist_then_fetch_round_trips_the_bytes() {
        let (_dir, storage) = storage();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("upload.jpeg");
        std::fs::write(&src, b"jpeg bytes").unwrap();
        let src = Utf8Path::from_path(&src).unwrap();

        let uploaded_at = assert_ok!(storage.persist("assets", "img/photo.jpeg", src).await);
        assert!(uploaded_at <= Utc::now());
        assert!(assert_ok!(storage.exists("assets", "img/photo.jpeg").await));

        let mut out = Vec::new();
        let result = assert_ok!(storage.fetch("assets", "img/photo.jpeg", &mut out).await);
        assert_eq!(
            result,
            FetchResult {
                found: true,
                content_length: 10
            }
        );
        assert_eq!(out, b"jpeg bytes");
    }

    #[tokio::test]
    async fn missing_object_is_not_an_error() {
        let (_dir, storage) = storage();
        let mut out = Vec::new();
        let result = assert_ok!(storage.fetch("assets", "nope.jpeg", &mut out).await);
        assert_eq!(result, FetchResult::NOT_FOUND);
        assert!(out.is_empty());
        assert!(!assert_ok!(storage.exists("assets", "nope.jpeg").await));
    }

    #[tokio::test]
    async fn delete_removes_the_object() {
        let (_dir, storage) = storage();
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("a.bin");
        std::fs::write(&src, b"x").unwrap();
        let src = Utf8Path::from_path(&src).unwrap();
        storage.persist("assets", "a.bin", src).await.unwrap();

        assert_ok!(storage.delete("assets", "a.bin").await);
        assert!(!storage.exists("assets", "a.bin").await.unwrap());
        assert_err!(storage.delete("assets", "a.bin").await);
    }
}
