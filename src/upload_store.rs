use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::uploads::AdmittedUpload;

/// Prefix and suffix of in-flight files. Listings skip anything starting with a dot.
const PARTIAL_PREFIX: &str = ".";
const PARTIAL_SUFFIX: &str = ".part";

/// A file that made it into the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub stored_name: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub declared_type: String,
    pub checksum_hex: String,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("upload exceeded {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("upload contained no data")]
    Empty,
    #[error("upload stream failed: {0}")]
    Stream(Box<dyn std::error::Error + Send + Sync>),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Flat directory of accepted uploads, addressed by generated storage name.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: Arc<PathBuf>,
}

impl UploadStore {
    /// Open (creating if needed) the upload directory and sweep leftovers of
    /// uploads interrupted by a previous crash.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_partial_name(name) {
                warn!(target: "upload", file = name, "removing stale partial upload");
                cleanup_orphaned_file(&entry.path()).await?;
            }
        }

        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream `body` to disk under the admitted storage name.
    ///
    /// Bytes land in a hidden temp file that is linked into place only after
    /// the whole stream was read within `max_bytes`. The temp file is removed
    /// on every failure, and also when the returned future is dropped mid-way
    /// (client disconnect).
    pub async fn persist<S, E>(
        &self,
        admitted: &AdmittedUpload,
        mut body: S,
        max_bytes: u64,
    ) -> Result<UploadRecord, PersistError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let final_path = self.root.join(&admitted.stored_name);
        let temp_path = self.root.join(format!(
            "{PARTIAL_PREFIX}{}{PARTIAL_SUFFIX}",
            admitted.stored_name
        ));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        let partial = PartialFile::new(temp_path);

        let mut hasher = Sha256::new();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    partial.discard().await;
                    return Err(PersistError::Stream(err.into()));
                }
            };
            if chunk.is_empty() {
                continue;
            }

            bytes_written = bytes_written.saturating_add(chunk.len() as u64);
            if bytes_written > max_bytes {
                drop(file);
                partial.discard().await;
                return Err(PersistError::TooLarge { limit: max_bytes });
            }

            if let Err(err) = file.write_all(&chunk).await {
                drop(file);
                partial.discard().await;
                return Err(PersistError::Io(err));
            }

            hasher.update(&chunk);
        }

        if let Err(err) = file.flush().await {
            drop(file);
            partial.discard().await;
            return Err(PersistError::Io(err));
        }
        drop(file);

        if bytes_written == 0 {
            partial.discard().await;
            return Err(PersistError::Empty);
        }

        // A hard link fails on an existing target, unlike rename, which would replace it.
        if let Err(err) = fs::hard_link(partial.path(), &final_path).await {
            partial.discard().await;
            return Err(PersistError::Io(err));
        }
        partial.discard().await;

        debug!(target: "upload", stored_name = %admitted.stored_name, bytes_written, "upload persisted");

        Ok(UploadRecord {
            stored_name: admitted.stored_name.clone(),
            original_name: admitted.original_name.clone(),
            size_bytes: bytes_written,
            declared_type: admitted.declared_type.clone(),
            checksum_hex: format!("{:x}", hasher.finalize()),
        })
    }

    /// Delete a completed upload. Missing files are not an error.
    pub async fn remove(&self, stored_name: &str) -> io::Result<()> {
        if stored_name.is_empty()
            || stored_name.starts_with('.')
            || stored_name.contains(['/', '\\'])
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{stored_name:?} is not a stored upload name"),
            ));
        }

        cleanup_orphaned_file(&self.root.join(stored_name)).await
    }

    /// Names of all completed uploads, sorted.
    pub async fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.root.as_path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(PARTIAL_PREFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

fn is_partial_name(name: &str) -> bool {
    name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

async fn cleanup_orphaned_file(path: &Path) -> Result<(), io::Error> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Owns an in-flight temp file and deletes it when discarded or dropped.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn discard(mut self) {
        let outcome = cleanup_orphaned_file(&self.path).await;
        self.armed = false;
        if let Err(err) = outcome {
            error!(
                target: "upload",
                path = %self.path.display(),
                %err,
                "failed to remove partial upload"
            );
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(_) => {
                debug!(target: "upload", path = %self.path.display(), "discarded abandoned upload");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                error!(
                    target: "upload",
                    path = %self.path.display(),
                    %err,
                    "failed to remove abandoned upload"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::FileCategory;
    use futures::stream;

    fn admitted(stored_name: &str) -> AdmittedUpload {
        AdmittedUpload {
            stored_name: stored_name.to_string(),
            original_name: "holiday.png".to_string(),
            declared_type: "image/png".to_string(),
            category: FileCategory::Image,
        }
    }

    fn dir_entries(path: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn persist_writes_bytes_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let body = stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"world")),
        ]);

        let record = store.persist(&admitted("a.png"), body, 1024).await.unwrap();

        assert_eq!(record.size_bytes, 11);
        assert_eq!(
            record.checksum_hex,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), b"hello world");
        assert_eq!(dir_entries(dir.path()), vec!["a.png".to_string()]);
    }

    #[tokio::test]
    async fn overflow_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let body = stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from_static(b"12345")),
            Ok(Bytes::from_static(b"67890")),
        ]);

        let err = store.persist(&admitted("b.png"), body, 8).await.unwrap_err();

        assert!(matches!(err, PersistError::TooLarge { limit: 8 }));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn stream_error_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = store.persist(&admitted("c.png"), body, 1024).await.unwrap_err();

        assert!(matches!(err, PersistError::Stream(_)));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn empty_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let body = stream::iter(Vec::<Result<Bytes, io::Error>>::new());

        let err = store.persist(&admitted("d.png"), body, 1024).await.unwrap_err();

        assert!(matches!(err, PersistError::Empty));
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"first"))])
            .chain(stream::pending());

        let admitted = admitted("e.png");
        let upload = store.persist(&admitted, body, 1024);
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), upload).await;

        assert!(timed_out.is_err());
        assert!(dir_entries(dir.path()).is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_names_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.png"), b"original").unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"replacement"))]);

        let err = store.persist(&admitted("f.png"), body, 1024).await.unwrap_err();

        assert!(matches!(err, PersistError::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(std::fs::read(dir.path().join("f.png")).unwrap(), b"original");
        assert_eq!(dir_entries(dir.path()), vec!["f.png".to_string()]);
    }

    #[tokio::test]
    async fn open_sweeps_stale_partials_and_list_hides_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".stale.png.part"), b"junk").unwrap();
        std::fs::write(dir.path().join(".gitkeep"), b"").unwrap();
        std::fs::write(dir.path().join("kept.pdf"), b"pdf").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let store = UploadStore::open(dir.path()).await.unwrap();

        assert!(!dir.path().join(".stale.png.part").exists());
        assert_eq!(store.list().await.unwrap(), vec!["kept.pdf".to_string()]);
    }

    #[tokio::test]
    async fn remove_only_accepts_plain_stored_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"png").unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();

        store.remove("a.png").await.unwrap();
        store.remove("a.png").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        for name in ["", "../a.png", ".hidden", "sub\\a.png"] {
            let err = store.remove(name).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }
}
