// Blob storage contract for submitted source files
//
// Keys are '/'-separated. Sources of a solution live under
// `<solution_id>/files/<name>`.

use crate::store::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const FILES_PREFIX: &str = "files/";

/// Prefix under which a solution's sources are stored
pub fn source_prefix(solution_id: &Uuid) -> String {
    format!("{}/{}", solution_id, FILES_PREFIX)
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// All objects directly under `prefix`, keyed by the remainder of their key
    async fn get_directory(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StoreError>;
}

/// Reject keys that could escape the bucket when mapped onto a filesystem
fn checked_relative(key: &str) -> Result<PathBuf, StoreError> {
    let path = Path::new(key);
    let clean = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if key.is_empty() || !clean {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(path.to_path_buf())
}

/// Blob store backed by a directory tree: `<root>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let bucket = checked_relative(bucket)?;
        let key = checked_relative(key.trim_end_matches('/'))?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_directory(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let dir = self.object_path(bucket, prefix)?;
        let mut files = BTreeMap::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let content = tokio::fs::read(entry.path()).await?;
            files.insert(name, content);
        }

        Ok(files)
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        checked_relative(key)?;
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    async fn get_directory(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .filter_map(|((_, key), bytes)| {
                let name = key.strip_prefix(prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| (name.to_string(), bytes.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_prefix_format() {
        let id = Uuid::new_v4();
        assert_eq!(source_prefix(&id), format!("{}/files/", id));
    }

    #[test]
    fn test_rejects_escaping_keys() {
        assert!(checked_relative("../etc/passwd").is_err());
        assert!(checked_relative("/etc/passwd").is_err());
        assert!(checked_relative("").is_err());
        assert!(checked_relative("abc/files/main.py").is_ok());
    }

    #[tokio::test]
    async fn test_fs_store_lists_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path());
        let id = Uuid::new_v4();
        let prefix = source_prefix(&id);

        store.put("solutions", &format!("{}main.py", prefix), b"print(1)").await.unwrap();
        store.put("solutions", &format!("{}util.py", prefix), b"X = 2").await.unwrap();
        store.put("solutions", &format!("{}/other", id), b"ignored").await.unwrap();

        let files = store.get_directory("solutions", &prefix).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["main.py"], b"print(1)");
        assert_eq!(files["util.py"], b"X = 2");
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path());
        let files = store.get_directory("solutions", "nope/files/").await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_ignores_nested_keys() {
        let store = MemoryBlobStore::default();
        store.put("b", "x/files/a.c", b"a").await.unwrap();
        store.put("b", "x/files/sub/b.c", b"b").await.unwrap();
        store.put("other", "x/files/c.c", b"c").await.unwrap();

        let files = store.get_directory("b", "x/files/").await.unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.c"]);
    }
}
