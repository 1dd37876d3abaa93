//! Local staging of object bodies for scanning.

use crate::event::ObjectRef;
use crate::store::{ObjectStore, StoreError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StageError {
    /// The key has no final path component to use as a file name.
    #[error("object key `{0}` has no usable file name")]
    InvalidFileName(String),
    #[error("failed to prepare staging directory: {0}")]
    Io(#[from] io::Error),
    #[error("download failed: {0}")]
    Download(#[source] StoreError),
}

/// Downloads objects into a scratch directory.
#[derive(Debug, Clone)]
pub struct ObjectStager {
    staging_dir: PathBuf,
}

impl ObjectStager {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Local path an object is staged at.
    ///
    /// Only the last segment of the key is used so that separators in the
    /// key never create directories under the staging root.
    pub fn local_path(&self, object: &ObjectRef) -> Result<PathBuf, StageError> {
        let file_name = Path::new(&object.key)
            .file_name()
            .ok_or_else(|| StageError::InvalidFileName(object.key.clone()))?;
        Ok(self.staging_dir.join(file_name))
    }

    /// Download the object body to its local path.
    ///
    /// A partially written file is removed before the error is returned.
    pub async fn stage<S>(&self, store: &S, object: &ObjectRef) -> Result<StagedFile, StageError>
    where
        S: ObjectStore + ?Sized,
    {
        let path = self.local_path(object)?;
        fs::create_dir_all(&self.staging_dir).await?;

        info!(
            bucket = %object.bucket,
            key = %object.key,
            path = %path.display(),
            "Downloading object"
        );

        match store.download_to(object, &path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes, "Object staged");
                Ok(StagedFile::new(path))
            }
            Err(e) => {
                remove_staged(&path).await;
                Err(StageError::Download(e))
            }
        }
    }
}

/// A downloaded object on local disk.
///
/// Call [`StagedFile::release`] once scanning is done. If the value is
/// dropped without being released the file is removed synchronously.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the local file. A file that is already gone is not an error.
    pub async fn release(mut self) {
        self.released = true;
        remove_staged(&self.path).await;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Could not delete local file"
            ),
        }
    }
}

async fn remove_staged(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed local file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "Could not delete local file"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_local_path_uses_last_segment() {
        let stager = ObjectStager::new("/tmp/staging");
        assert_eq!(
            stager
                .local_path(&ObjectRef::new("b", "a/b/c/report.pdf"))
                .unwrap(),
            PathBuf::from("/tmp/staging/report.pdf")
        );
        assert_eq!(
            stager.local_path(&ObjectRef::new("b", "eicar.txt")).unwrap(),
            PathBuf::from("/tmp/staging/eicar.txt")
        );
        assert_eq!(
            stager.local_path(&ObjectRef::new("b", "folder/")).unwrap(),
            PathBuf::from("/tmp/staging/folder")
        );
    }

    #[test]
    fn test_local_path_rejects_parent_segments() {
        let stager = ObjectStager::new("/tmp/staging");
        assert!(matches!(
            stager.local_path(&ObjectRef::new("b", "..")),
            Err(StageError::InvalidFileName(_))
        ));
        assert!(matches!(
            stager.local_path(&ObjectRef::new("b", "a/..")),
            Err(StageError::InvalidFileName(_))
        ));
    }

    #[tokio::test]
    async fn test_stage_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let object = ObjectRef::new("b", "docs/hello.txt");
        store.insert(&object, b"hello world", vec![]);

        let stager = ObjectStager::new(dir.path());
        let staged = stager.stage(&store, &object).await.unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        staged.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let object = ObjectRef::new("b", "x.bin");
        store.insert(&object, b"x", vec![]);

        let staged = ObjectStager::new(dir.path())
            .stage(&store, &object)
            .await
            .unwrap();
        std::fs::remove_file(staged.path()).unwrap();
        staged.release().await;
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let object = ObjectRef::new("b", "dropped.bin");
        store.insert(&object, b"data", vec![]);

        let staged = ObjectStager::new(dir.path())
            .stage(&store, &object)
            .await
            .unwrap();
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let object = ObjectRef::new("b", "broken.bin");
        store.insert(&object, b"data", vec![]);
        store.fail_downloads();

        let stager = ObjectStager::new(dir.path());
        let result = stager.stage(&store, &object).await;
        assert!(matches!(result, Err(StageError::Download(_))));
        assert!(!dir.path().join("broken.bin").exists());
    }

    #[tokio::test]
    async fn test_creates_missing_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch").join("scan");
        let store = MemoryStore::new();
        let object = ObjectRef::new("b", "f.txt");
        store.insert(&object, b"f", vec![]);

        let staged = ObjectStager::new(&nested)
            .stage(&store, &object)
            .await
            .unwrap();
        assert!(staged.path().starts_with(&nested));
        staged.release().await;
    }
}
