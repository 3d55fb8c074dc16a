//! Persistent storage for attachment records.
//!
//! Records live in a single JSON file organised in named buckets, one record
//! per sandbox ID in the `pod` bucket. Every mutation rewrites the file
//! atomically (write to tmp file, fsync, then rename) so a crash leaves
//! either the old or the new contents.
//!
//! File writes run on the blocking pool. Readers only take the in-memory
//! lock for a clone, so a query never waits on an fsync.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kni_core::error::{KniError, Result};
use kni_core::record::AttachmentRecord;
use parking_lot::RwLock;
use tokio::sync::Mutex;

/// Bucket holding one attachment record per sandbox ID.
pub const POD_BUCKET: &str = "pod";

/// Serializable layout of the store file.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct StoreFile {
    #[serde(default)]
    buckets: BTreeMap<String, HashMap<String, AttachmentRecord>>,
}

/// Durable store of attachment records.
///
/// Opened once at service start; the in-memory copy mirrors the file and is
/// only replaced after the new file is in place.
#[derive(Debug)]
pub struct AttachmentStore {
    /// Path to the JSON file.
    path: PathBuf,
    /// Committed contents.
    state: Arc<RwLock<StoreFile>>,
    /// Serializes writers across the blocking file write.
    writer: Arc<Mutex<()>>,
}

impl AttachmentStore {
    /// Open the store at `path`, creating the file and the pod bucket if
    /// absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = read_file(&path)?;

        if !file.buckets.contains_key(POD_BUCKET) {
            file.buckets.entry(POD_BUCKET.to_string()).or_default();
            persist(&path, &file)?;
        }

        tracing::info!(path = %path.display(), "Attachment store opened");
        Ok(Self {
            path,
            state: Arc::new(RwLock::new(file)),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Upsert the record for `id`.
    pub async fn save(&self, id: &str, record: &AttachmentRecord) -> Result<()> {
        let id = id.to_string();
        let record = record.clone();
        self.mutate(move |file| {
            file.buckets
                .entry(POD_BUCKET.to_string())
                .or_default()
                .insert(id, record);
        })
        .await
    }

    /// Get the record for `id`, if any.
    pub fn query(&self, id: &str) -> Result<Option<AttachmentRecord>> {
        let state = self.state.read();
        Ok(state
            .buckets
            .get(POD_BUCKET)
            .and_then(|bucket| bucket.get(id))
            .cloned())
    }

    /// Remove the record for `id`. Removing an absent record is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.query(id)?.is_none() {
            return Ok(());
        }
        let id = id.to_string();
        self.mutate(move |file| {
            if let Some(bucket) = file.buckets.get_mut(POD_BUCKET) {
                bucket.remove(&id);
            }
        })
        .await
    }

    /// IDs of all recorded sandboxes.
    pub fn list(&self) -> Result<Vec<String>> {
        let state = self.state.read();
        let mut ids: Vec<String> = state
            .buckets
            .get(POD_BUCKET)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    /// Get the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the committed state, persist it, then commit.
    ///
    /// The write and the commit run together on the blocking pool with the
    /// writer lock held, so dropping the caller's future cannot leave the
    /// file and the in-memory copy out of step.
    async fn mutate(&self, f: impl FnOnce(&mut StoreFile) + Send + 'static) -> Result<()> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let state = Arc::clone(&self.state);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let _writer = writer;
            let mut next = state.read().clone();
            f(&mut next);
            persist(&path, &next)?;
            *state.write() = next;
            Ok(())
        })
        .await
        .map_err(|e| KniError::Store(format!("store write task failed: {}", e)))?
    }
}

fn read_file(path: &Path) -> Result<StoreFile> {
    if !path.exists() {
        return Ok(StoreFile::default());
    }

    let data = std::fs::read_to_string(path).map_err(|e| {
        KniError::Store(format!("failed to read store file {}: {}", path.display(), e))
    })?;

    if data.trim().is_empty() {
        return Ok(StoreFile::default());
    }

    serde_json::from_str(&data).map_err(|e| {
        KniError::Store(format!("failed to parse store file {}: {}", path.display(), e))
    })
}

/// Atomic write: write to tmp, fsync, then rename.
fn persist(path: &Path, file: &StoreFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            KniError::Store(format!(
                "failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let json = serde_json::to_vec(file)
        .map_err(|e| KniError::Store(format!("failed to serialize records: {}", e)))?;

    let tmp_path = tmp_path(path);
    let write_tmp = || -> std::io::Result<()> {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(&json)?;
        tmp.sync_all()
    };
    write_tmp().map_err(|e| {
        KniError::Store(format!(
            "failed to write tmp file {}: {}",
            tmp_path.display(),
            e
        ))
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        KniError::Store(format!(
            "failed to rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kni_core::record::InterfaceAddresses;

    fn temp_store() -> (tempfile::TempDir, AttachmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::open(dir.path().join("net.db")).unwrap();
        (dir, store)
    }

    fn record(ip: &str) -> AttachmentRecord {
        let mut record = AttachmentRecord::default();
        record.interfaces.insert(
            "eth0".to_string(),
            InterfaceAddresses {
                mac_address: "02:42:0a:58:00:02".to_string(),
                addresses: vec![ip.to_string()],
            },
        );
        record
            .extra_data
            .insert("netns".to_string(), "/var/run/netns/x".to_string());
        record
    }

    #[test]
    fn test_open_creates_file_with_bucket() {
        let (_dir, store) = temp_store();
        assert!(store.path().exists());

        let data = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert!(json["buckets"].get(POD_BUCKET).is_some());
    }

    #[test]
    fn test_query_missing() {
        let (_dir, store) = temp_store();
        assert!(store.query("nope").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_query() {
        let (_dir, store) = temp_store();
        store.save("sb1", &record("10.88.0.2/16")).await.unwrap();

        let found = store.query("sb1").unwrap().unwrap();
        assert_eq!(found.interfaces["eth0"].addresses, vec!["10.88.0.2/16"]);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (_dir, store) = temp_store();
        store.save("sb1", &record("10.88.0.2/16")).await.unwrap();
        store.save("sb1", &record("10.88.0.3/16")).await.unwrap();

        let found = store.query("sb1").unwrap().unwrap();
        assert_eq!(found.interfaces["eth0"].addresses, vec!["10.88.0.3/16"]);
        assert_eq!(store.list().unwrap(), vec!["sb1"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = temp_store();
        store.save("sb1", &record("10.88.0.2/16")).await.unwrap();
        store.delete("sb1").await.unwrap();
        assert!(store.query("sb1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_dir, store) = temp_store();
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.db");
        {
            let store = AttachmentStore::open(&path).unwrap();
            store.save("sb1", &record("10.88.0.2/16")).await.unwrap();
            store.save("sb2", &record("10.88.0.3/16")).await.unwrap();
            store.delete("sb2").await.unwrap();
        }

        let store = AttachmentStore::open(&path).unwrap();
        assert!(store.query("sb1").unwrap().is_some());
        assert!(store.query("sb2").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.db");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AttachmentStore::open(&path).unwrap_err();
        assert!(matches!(err, KniError::Store(_)));
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_tmp() {
        let (_dir, store) = temp_store();
        store.save("sb1", &record("10.88.0.2/16")).await.unwrap();
        assert!(!tmp_path(store.path()).exists());
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_previous_state() {
        let (dir, store) = temp_store();
        store.save("sb1", &record("10.88.0.2/16")).await.unwrap();

        // A directory squatting on the tmp path makes the write fail.
        std::fs::create_dir(tmp_path(store.path())).unwrap();
        assert!(store.save("sb2", &record("10.88.0.3/16")).await.is_err());

        assert!(store.query("sb2").unwrap().is_none());
        assert!(store.query("sb1").unwrap().is_some());
        drop(dir);
    }

    #[tokio::test]
    async fn test_dropped_save_keeps_file_and_memory_in_step() {
        let (_dir, store) = temp_store();
        let _ = tokio::time::timeout(
            std::time::Duration::ZERO,
            store.save("sb1", &record("10.88.0.2/16")),
        )
        .await;

        // Waits for any write still running on the blocking pool.
        store.save("sb2", &record("10.88.0.3/16")).await.unwrap();

        let reopened = AttachmentStore::open(store.path()).unwrap();
        assert_eq!(reopened.list().unwrap(), store.list().unwrap());
        assert!(store.query("sb2").unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let id = format!("sb{}", i);
                store.save(&id, &record("10.88.0.2/16")).await.unwrap();
                assert!(store.query(&id).unwrap().is_some());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.list().unwrap().len(), 16);
        let reopened = AttachmentStore::open(store.path()).unwrap();
        assert_eq!(reopened.list().unwrap().len(), 16);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::open(dir.path().join("subdir").join("net.db")).unwrap();
        assert!(store.path().exists());
    }
}
