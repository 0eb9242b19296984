use std::path::{Path, PathBuf};

use super::{BlobStore, StoreError, StoreResult};

/// Blob storage backed by a directory tree: `<root>/<bucket>/<name>`.
///
/// Public URLs are `<public_base>/<bucket>/<name>` when a base is
/// configured (e.g. a static file server in front of `root`), otherwise
/// `file://` URLs pointing at the blob on disk.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of a blob; rejects names that could escape the bucket.
    pub fn blob_path(&self, bucket: &str, name: &str) -> StoreResult<PathBuf> {
        validate_segment(bucket)?;
        validate_segment(name)?;
        Ok(self.root.join(bucket).join(name))
    }
}

impl BlobStore for LocalBlobStore {
    fn upload(&self, bucket: &str, name: &str, bytes: &[u8]) -> StoreResult<String> {
        let path = self.blob_path(bucket, name)?;
        let io_error = |source: std::io::Error| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(&path, bytes).map_err(io_error)?;
        Ok(self.public_url(bucket, name))
    }

    fn delete(&self, bucket: &str, name: &str) -> StoreResult<()> {
        let path = self.blob_path(bucket, name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        match &self.public_base {
            Some(base) => format!("{base}/{bucket}/{name}"),
            None => format!("file://{}", self.root.join(bucket).join(name).display()),
        }
    }
}

fn validate_segment(segment: &str) -> StoreResult<()> {
    let trimmed = segment.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
        || trimmed != segment
    {
        return Err(StoreError::InvalidName(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::LocalBlobStore;
    use crate::storage::{BlobStore, StoreError};

    #[test]
    fn upload_overwrites_and_returns_public_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blobs = LocalBlobStore::new(temp.path(), Some("https://cdn.example/".to_string()));

        let url = blobs.upload("closet", "select_t1-b1_1.png", b"first")?;
        assert_eq!(url, "https://cdn.example/closet/select_t1-b1_1.png");
        blobs.upload("closet", "select_t1-b1_1.png", b"second")?;

        let on_disk = std::fs::read(temp.path().join("closet").join("select_t1-b1_1.png"))?;
        assert_eq!(on_disk, b"second");
        Ok(())
    }

    #[test]
    fn file_urls_without_public_base() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blobs = LocalBlobStore::new(temp.path(), None);
        let url = blobs.upload("closet", "a.png", b"x")?;
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("closet/a.png"));
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blobs = LocalBlobStore::new(temp.path(), None);
        blobs.upload("closet", "a.png", b"x")?;
        blobs.delete("closet", "a.png")?;
        blobs.delete("closet", "a.png")?;
        assert!(!temp.path().join("closet").join("a.png").exists());
        Ok(())
    }

    #[test]
    fn rejects_path_traversal_names() {
        let blobs = LocalBlobStore::new("/tmp/closet-blobs", None);
        for name in ["../escape.png", "nested/a.png", "..", ""] {
            assert!(matches!(
                blobs.upload("closet", name, b"x"),
                Err(StoreError::InvalidName(_))
            ));
        }
    }
}
