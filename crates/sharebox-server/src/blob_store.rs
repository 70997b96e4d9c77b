//! Filesystem blob store for uploaded file bytes.
//!
//! Blobs live flat under the upload root as `<uuid><ext>`.  Only that
//! generated name ever reaches the filesystem; the client's file name is
//! reduced to a short alphanumeric extension first.
//!
//! Writes go through a staging directory (`.incoming/`) so a half-written or
//! unregistered upload never appears under its final name.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

const STAGING_DIR: &str = ".incoming";

/// Longest extension (without the dot) carried over from the client name.
const MAX_EXTENSION_LEN: usize = 16;

/// Extension of the last path segment of `original_name`, including the dot.
///
/// Returns `""` for dot-files, names without a dot, and anything that is not
/// plain ASCII alphanumerics, so the result is always safe in a file name.
pub fn sanitized_extension(original_name: &str) -> &str {
    let base = original_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original_name);

    match base.rfind('.') {
        Some(dot) if dot > 0 => {
            let ext = &base[dot..];
            let body = &ext[1..];
            if (1..=MAX_EXTENSION_LEN).contains(&body.len())
                && body.bytes().all(|b| b.is_ascii_alphanumeric())
            {
                ext
            } else {
                ""
            }
        }
        _ => "",
    }
}

/// The public id encoded in a stored name: the name with its extension removed.
pub fn public_id(stored_name: &str) -> &str {
    stored_name
        .split_once('.')
        .map_or(stored_name, |(stem, _)| stem)
}

/// Pick a fresh random id and the stored name that goes with it.
fn allocate_name(ext: &str) -> (Uuid, String) {
    let id = Uuid::new_v4();
    (id, format!("{id}{ext}"))
}

/// Reject anything that is not a single plain file name.
fn ensure_plain_name(stored_name: &str) -> Result<(), ServerError> {
    if stored_name.is_empty()
        || stored_name.contains('/')
        || stored_name.contains('\\')
        || stored_name.contains("..")
    {
        warn!(stored_name, "Refusing blob name with path components");
        return Err(ServerError::NotFound);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create the upload root and staging directory, and drop any staged
    /// blobs left behind by a previous process.
    pub async fn new(root: PathBuf) -> Result<Self, ServerError> {
        let store = Self { root };
        store.ensure_dirs().await?;

        let swept = store.sweep_staging().await?;
        if swept > 0 {
            info!(count = swept, "Removed leftover staged blobs");
        }

        info!(path = %store.root.display(), "Blob store initialized");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root().join(STAGING_DIR)
    }

    /// `create_dir_all` succeeds when the directory already exists, so this
    /// is safe to race against another request doing the same.
    async fn ensure_dirs(&self) -> Result<(), ServerError> {
        fs::create_dir_all(self.staging_dir()).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create upload directory '{}': {}",
                self.root().display(),
                e
            ))
        })
    }

    /// Nothing in the staging directory survives a restart: a staged blob is
    /// either committed or abandoned by the request that wrote it.
    async fn sweep_staging(&self) -> Result<usize, ServerError> {
        let mut removed = 0;
        let mut entries = fs::read_dir(self.staging_dir()).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                remove_if_present(&entry.path()).await;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Stream `reader` into a staged blob named after a fresh random id.
    ///
    /// The blob is not visible under its final name until
    /// [`StagedBlob::commit`] is called.  If this future is dropped midway,
    /// or the returned blob is dropped uncommitted, the staged file is
    /// removed.
    pub async fn stage<R>(&self, original_name: &str, mut reader: R) -> Result<StagedBlob, ServerError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_dirs().await?;

        let (id, stored_name) = allocate_name(sanitized_extension(original_name));
        let staged_path = self.staging_dir().join(&stored_name);
        let final_path = self.root.join(&stored_name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged_path)
            .await?;

        // From here on the guard owns the staged file.
        let mut staged = StagedBlob {
            id,
            stored_name,
            staged_path,
            final_path,
            size: 0,
            committed: AtomicBool::new(false),
        };

        staged.size = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        drop(file);

        debug!(id = %id, size = staged.size, "Staged blob");
        Ok(staged)
    }

    /// Open a committed blob for reading, returning the file and its length.
    pub async fn open(&self, stored_name: &str) -> Result<(File, u64), ServerError> {
        ensure_plain_name(stored_name)?;

        let path = self.root.join(stored_name);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ServerError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();

        debug!(stored_name, size = len, "Opened blob");
        Ok((file, len))
    }
}

/// A fully written blob waiting to be moved under its final name.
///
/// Dropping it before [`commit`](Self::commit) succeeds removes the staged
/// file.
#[derive(Debug)]
pub struct StagedBlob {
    id: Uuid,
    stored_name: String,
    staged_path: PathBuf,
    final_path: PathBuf,
    size: u64,
    committed: AtomicBool,
}

impl StagedBlob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stored_name(&self) -> &str {
        &self.stored_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Move the blob to its final name.  Synchronous so it can run inside a
    /// database transaction.
    pub fn commit(&self) -> io::Result<()> {
        std::fs::rename(&self.staged_path, &self.final_path)?;
        self.committed.store(true, Ordering::Release);
        Ok(())
    }

    /// Remove the blob under both its staged and final names.
    pub async fn discard(self) {
        remove_if_present(&self.staged_path).await;
        remove_if_present(&self.final_path).await;
        // Both paths are gone; keep Drop from trying again.
        self.committed.store(true, Ordering::Release);
        info!(id = %self.id, "Discarded orphaned blob");
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if self.committed.load(Ordering::Acquire) {
            return;
        }
        match std::fs::remove_file(&self.staged_path) {
            Ok(()) => debug!(id = %self.id, "Removed abandoned staged blob"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.staged_path.display(), error = %e, "Failed to remove staged blob")
            }
        }
    }
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("uploads")).await.unwrap();
        (store, dir)
    }

    /// Stage and commit in one go, returning the stored name.
    async fn save(store: &BlobStore, original_name: &str, data: &[u8]) -> String {
        let staged = store.stage(original_name, data).await.unwrap();
        staged.commit().unwrap();
        staged.stored_name().to_string()
    }

    fn staged_entries(store: &BlobStore) -> Vec<std::ffi::OsString> {
        std::fs::read_dir(store.staging_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect()
    }

    /// Yields one chunk, then never makes progress again.
    struct StallAfterFirstChunk {
        sent: bool,
    }

    impl AsyncRead for StallAfterFirstChunk {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            if self.sent {
                return std::task::Poll::Pending;
            }
            self.sent = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    async fn read_blob(store: &BlobStore, stored_name: &str) -> Vec<u8> {
        let (mut file, len) = store.open(stored_name).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len() as u64, len);
        buf
    }

    #[test]
    fn test_extension_rules() {
        assert_eq!(sanitized_extension("a.txt"), ".txt");
        assert_eq!(sanitized_extension("archive.tar.gz"), ".gz");
        assert_eq!(sanitized_extension("Photo.JPG"), ".JPG");
        assert_eq!(sanitized_extension("README"), "");
        assert_eq!(sanitized_extension(".bashrc"), "");
        assert_eq!(sanitized_extension("trailing."), "");
        assert_eq!(sanitized_extension("dir.d/file"), "");
        assert_eq!(sanitized_extension("C:\\docs\\report.pdf"), ".pdf");
        assert_eq!(sanitized_extension("evil.t xt"), "");
        assert_eq!(sanitized_extension("x.aaaaaaaaaaaaaaaaaaaaaaaa"), "");
    }

    #[test]
    fn test_public_id_strips_extension() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(public_id(&format!("{id}.txt")), id);
        assert_eq!(public_id(&id), id);
    }

    #[test]
    fn test_names_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let (id, stored_name) = allocate_name(".bin");
            assert_eq!(public_id(&stored_name), id.to_string());
            assert!(seen.insert(stored_name));
        }
    }

    #[tokio::test]
    async fn test_save_and_open() {
        let (store, _dir) = test_store().await;
        let data: &[u8] = b"hello";

        let stored_name = save(&store, "a.txt", data).await;

        assert!(stored_name.ends_with(".txt"));
        assert!(Uuid::parse_str(public_id(&stored_name)).is_ok());
        assert_eq!(read_blob(&store, &stored_name).await, data);
    }

    #[tokio::test]
    async fn test_staged_blob_invisible_until_commit() {
        let (store, _dir) = test_store().await;
        let staged = store.stage("doc.pdf", &b"pdf-bytes"[..]).await.unwrap();

        assert_eq!(staged.size(), 9);
        assert!(matches!(
            store.open(staged.stored_name()).await,
            Err(ServerError::NotFound)
        ));

        staged.commit().unwrap();
        assert_eq!(read_blob(&store, staged.stored_name()).await, b"pdf-bytes");
    }

    #[tokio::test]
    async fn test_discard_removes_staged_and_committed() {
        let (store, _dir) = test_store().await;

        let staged = store.stage("a.txt", &b"one"[..]).await.unwrap();
        let staged_path = staged.staged_path.clone();
        staged.discard().await;
        assert!(!staged_path.exists());

        let committed = store.stage("b.txt", &b"two"[..]).await.unwrap();
        committed.commit().unwrap();
        let name = committed.stored_name().to_string();
        committed.discard().await;
        assert!(matches!(store.open(&name).await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn test_concurrent_saves_get_distinct_blobs() {
        let (store, _dir) = test_store().await;

        let (a, b) = tokio::join!(
            save(&store, "same.txt", b"first"),
            save(&store, "same.txt", b"second"),
        );

        assert_ne!(a, b);
        assert_eq!(read_blob(&store, &a).await, b"first");
        assert_eq!(read_blob(&store, &b).await, b"second");
    }

    #[tokio::test]
    async fn test_root_recreated_on_use() {
        let (store, _dir) = test_store().await;
        std::fs::remove_dir_all(store.root()).unwrap();

        let stored_name = save(&store, "late.txt", b"x").await;
        assert_eq!(read_blob(&store, &stored_name).await, b"x");
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let (store, _dir) = test_store().await;
        let missing = format!("{}.txt", Uuid::new_v4());
        assert!(matches!(store.open(&missing).await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn test_open_rejects_traversal() {
        let (store, dir) = test_store().await;
        std::fs::write(dir.path().join("secret"), b"nope").unwrap();

        for name in ["../secret", "..", "", "a/b", "a\\b"] {
            assert!(matches!(store.open(name).await, Err(ServerError::NotFound)));
        }
    }

    #[tokio::test]
    async fn test_empty_upload_is_kept() {
        let (store, _dir) = test_store().await;
        let stored_name = save(&store, "empty.txt", b"").await;
        assert!(read_blob(&store, &stored_name).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_stage_leaves_nothing_behind() {
        let (store, _dir) = test_store().await;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            store.stage("a.txt", StallAfterFirstChunk { sent: false }),
        )
        .await;

        assert!(result.is_err(), "stage should still be waiting on the reader");
        assert!(staged_entries(&store).is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_blob_removed_on_drop() {
        let (store, _dir) = test_store().await;

        let staged = store.stage("a.txt", &b"never committed"[..]).await.unwrap();
        assert_eq!(staged_entries(&store).len(), 1);
        drop(staged);

        assert!(staged_entries(&store).is_empty());
    }

    #[tokio::test]
    async fn test_committed_blob_survives_drop() {
        let (store, _dir) = test_store().await;

        let stored_name = save(&store, "keep.txt", b"kept").await;

        assert!(staged_entries(&store).is_empty());
        assert_eq!(read_blob(&store, &stored_name).await, b"kept");
    }

    #[tokio::test]
    async fn test_startup_sweeps_staging_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("uploads");
        let leftover = root.join(STAGING_DIR).join(format!("{}.txt", Uuid::new_v4()));
        std::fs::create_dir_all(leftover.parent().unwrap()).unwrap();
        std::fs::write(&leftover, b"half written").unwrap();
        let committed = root.join(format!("{}.txt", Uuid::new_v4()));
        std::fs::write(&committed, b"done").unwrap();

        let store = BlobStore::new(root).await.unwrap();

        assert!(staged_entries(&store).is_empty());
        assert!(committed.exists());
    }
}
