use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use herald_types::error::Error;

use crate::Store;

/// Scheme of URLs handed back by [`MediaStore::upload`].
pub const MEDIA_SCHEME: &str = "media://";

/// Content-addressed blob storage for message attachments. Files are named
/// by their SHA-256, so identical uploads land on the same path.
pub struct MediaStore {
    dir: PathBuf,
}

impl Store {
    /// Store an attachment and return its `media://` URL, suitable as the
    /// content of an image message.
    pub async fn upload_media(&self, data: &[u8], ext: &str) -> Result<String, Error> {
        self.media.upload(data, ext).await
    }
}

impl MediaStore {
    /// The directory is created lazily on first upload.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn upload(&self, data: &[u8], ext: &str) -> Result<String, Error> {
        if data.is_empty() {
            return Err(Error::UploadFailed("empty upload".into()));
        }
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::UploadFailed(format!("invalid extension {ext:?}")));
        }

        let mut hasher = Sha256::new();
        hasher.update(data);
        let name = format!("{}.{ext}", hex::encode(hasher.finalize()));
        let path = self.dir.join(&name);

        fs::create_dir_all(&self.dir).await.map_err(upload_err)?;
        if fs::try_exists(&path).await.map_err(upload_err)? {
            debug!(name, "media already stored");
        } else {
            fs::write(&path, data).await.map_err(upload_err)?;
            info!(name, bytes = data.len(), "media stored");
        }

        Ok(format!("{MEDIA_SCHEME}{name}"))
    }

    /// Resolve an [`upload`](MediaStore::upload) URL back to its on-disk path.
    pub fn resolve(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(MEDIA_SCHEME)?;
        let clean = !name.is_empty()
            && !name.contains("..")
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
        clean.then(|| self.dir.join(name))
    }
}

fn upload_err(err: std::io::Error) -> Error {
    Error::UploadFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_store() -> (tempfile::TempDir, MediaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("media"));
        (dir, store)
    }

    #[tokio::test]
    async fn uploads_are_content_addressed() {
        let (_tmp, media) = media_store();

        let url = media.upload(b"picture bytes", "PNG").await.unwrap();
        assert!(url.starts_with(MEDIA_SCHEME));
        assert!(url.ends_with(".png"));

        let path = media.resolve(&url).unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"picture bytes");

        // Identical content maps to the identical URL and file.
        let again = media.upload(b"picture bytes", "png").await.unwrap();
        assert_eq!(again, url);
        let entries = std::fs::read_dir(media.dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn rejects_empty_data_and_bad_extensions() {
        let (_tmp, media) = media_store();

        assert!(matches!(
            media.upload(b"", "png").await,
            Err(Error::UploadFailed(_))
        ));
        assert!(matches!(
            media.upload(b"data", "p/n g").await,
            Err(Error::UploadFailed(_))
        ));
        assert!(matches!(
            media.upload(b"data", "").await,
            Err(Error::UploadFailed(_))
        ));
    }

    #[tokio::test]
    async fn resolve_refuses_traversal() {
        let (_tmp, media) = media_store();
        assert!(media.resolve("media://../secrets").is_none());
        assert!(media.resolve("media://a/b.png").is_none());
        assert!(media.resolve("https://elsewhere/x.png").is_none());
    }
}
