use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Job-scoped image store on the local filesystem.
///
/// Uploaded bytes live under the configured root, one file per job. The
/// pipeline reads them back by the path recorded on the job.
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Persist uploaded image bytes for a job, returning the stored path.
    pub async fn save(&self, job_id: Uuid, data: &[u8]) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{job_id}.img"));
        tokio::fs::write(&path, data).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Read stored image bytes back for pipeline processing.
    pub async fn load(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(path).await?)
    }

    /// Remove a stored image (external cleanup path).
    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("image storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("realism-store-{}", Uuid::new_v4()));
        let store = ImageStore::new(&dir);
        let job_id = Uuid::new_v4();

        let path = store.save(job_id, b"raw image bytes").await.unwrap();
        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded, b"raw image bytes");

        store.delete(&path).await.unwrap();
        assert!(store.load(&path).await.is_err());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
