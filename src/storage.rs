use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{StorageError, StorageResult};
use crate::models::{Bucket, ListObjectsPage, ObjectMeta};

const MAX_OBJECT_KEY_LEN: usize = 1024;
/// Keys map onto paths; each segment becomes one file or directory name.
const MAX_KEY_SEGMENT_LEN: usize = 255;
const BUCKET_META_FILE: &str = ".bucket_meta.json";

/// File-system backed storage engine
pub struct StorageEngine {
    root: PathBuf,
    /// In-memory bucket metadata index (persisted to disk)
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl StorageEngine {
    /// Initialize the storage engine, creating the root data directory if needed
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let engine = Self {
            root,
            buckets: RwLock::new(HashMap::new()),
        };

        // Load existing buckets from disk
        engine.scan_buckets()?;
        Ok(engine)
    }

    fn read_index(&self) -> RwLockReadGuard<'_, HashMap<String, Bucket>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, HashMap<String, Bucket>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan the root directory for existing bucket folders
    fn scan_buckets(&self) -> StorageResult<()> {
        let mut buckets = self.write_index();
        for entry in fs::read_dir(&self.root)?.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue; // skip hidden dirs
            }

            let meta_path = entry.path().join(BUCKET_META_FILE);
            let bucket = match fs::read_to_string(&meta_path) {
                Ok(data) => serde_json::from_str::<Bucket>(&data).unwrap_or_else(|e| {
                    tracing::warn!("Rebuilding metadata of bucket '{}': {}", name, e);
                    Self::new_bucket_meta(&name, "local")
                }),
                Err(_) => {
                    let b = Self::new_bucket_meta(&name, "local");
                    fs::write(&meta_path, serde_json::to_string_pretty(&b)?)?;
                    b
                }
            };

            buckets.insert(name, bucket);
        }
        tracing::debug!("Found {} bucket(s) under {}", buckets.len(), self.root.display());
        Ok(())
    }

    fn new_bucket_meta(name: &str, region: &str) -> Bucket {
        Bucket {
            name: name.to_string(),
            created_at: Utc::now(),
            region: region.to_string(),
            object_count: 0,
            total_size: 0,
        }
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn objects_root(&self, bucket: &str) -> PathBuf {
        self.bucket_path(bucket).join("objects")
    }

    /// Path of an object's payload; the key must already be validated.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.objects_root(bucket).join(key)
    }

    /// Sidecar named by the SHA-256 of the key, so every key gets its own
    /// fixed-length file name.
    fn object_meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.bucket_path(bucket).join(".meta").join(format!("{}.json", name))
    }

    fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.read_index().contains_key(bucket) {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }

    // ─── Bucket Operations ────────────────────────────────────────

    pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
        if name.len() < 3 || name.len() > 63 {
            return Err(StorageError::InvalidBucketName(
                "Bucket name must be between 3 and 63 characters".to_string(),
            ));
        }
        if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') {
            return Err(StorageError::InvalidBucketName(
                "Bucket name can only contain lowercase letters, numbers, hyphens, and periods".to_string(),
            ));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(StorageError::InvalidBucketName(
                "Bucket name cannot start or end with a hyphen".to_string(),
            ));
        }
        Ok(())
    }

    /// Rejects keys that could escape the bucket directory.
    pub fn validate_object_key(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey(
                "Key must be between 1 and 1024 characters".to_string(),
            ));
        }
        if key.starts_with('/') || key.split('/').any(|part| part == ".." || part == ".") {
            return Err(StorageError::InvalidObjectKey(format!(
                "'{}' must be a relative path without '.' or '..' segments",
                key
            )));
        }
        if key.split('/').any(|part| part.len() > MAX_KEY_SEGMENT_LEN) {
            return Err(StorageError::InvalidObjectKey(format!(
                "Key segments must be at most {} bytes",
                MAX_KEY_SEGMENT_LEN
            )));
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StorageError::InvalidObjectKey(format!(
                "'{}' contains control characters or backslashes",
                key.escape_debug()
            )));
        }
        Ok(())
    }

    pub fn create_bucket(&self, name: &str, region: &str) -> StorageResult<Bucket> {
        Self::validate_bucket_name(name)?;

        let mut buckets = self.write_index();
        if buckets.contains_key(name) {
            return Err(StorageError::BucketAlreadyExists(name.to_string()));
        }

        let bucket_dir = self.bucket_path(name);
        fs::create_dir_all(bucket_dir.join("objects"))?;
        fs::create_dir_all(bucket_dir.join(".meta"))?;

        let bucket = Self::new_bucket_meta(name, region);
        fs::write(bucket_dir.join(BUCKET_META_FILE), serde_json::to_string_pretty(&bucket)?)?;

        buckets.insert(name.to_string(), bucket.clone());
        tracing::info!("Created bucket: {}", name);
        Ok(bucket)
    }

    pub fn list_buckets(&self) -> Vec<Bucket> {
        let mut list: Vec<Bucket> = self.read_index().values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn get_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.read_index()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))
    }

    pub fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        let mut buckets = self.write_index();
        if !buckets.contains_key(name) {
            return Err(StorageError::BucketNotFound(name.to_string()));
        }

        let objects_dir = self.objects_root(name);
        if objects_dir.exists() && fs::read_dir(&objects_dir)?.next().is_some() {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }

        fs::remove_dir_all(self.bucket_path(name))?;
        buckets.remove(name);
        tracing::info!("Deleted bucket: {}", name);
        Ok(())
    }

    // ─── Object Operations ────────────────────────────────────────

    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> StorageResult<ObjectMeta> {
        self.ensure_bucket(bucket)?;
        Self::validate_object_key(key)?;

        let content_type = content_type
            .map(|s| s.to_string())
            .unwrap_or_else(|| mime_guess::from_path(key).first_or_octet_stream().to_string());

        // ETag is the SHA-256 of the payload
        let etag = format!("\"{}\"", hex::encode(Sha256::digest(data)));

        let obj_path = self.object_path(bucket, key);
        if let Some(parent) = obj_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let meta = ObjectMeta {
            key: key.to_string(),
            bucket: bucket.to_string(),
            size: data.len() as u64,
            content_type,
            etag,
            last_modified: Utc::now(),
            metadata,
        };

        let meta_json = serde_json::to_string_pretty(&meta)?;
        let meta_path = self.object_meta_path(bucket, key);
        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&obj_path)?;
        let written = file
            .write_all(data)
            .and_then(|()| fs::write(&meta_path, meta_json));
        if let Err(e) = written {
            // A payload without its sidecar would still be listed
            drop(file);
            let _ = fs::remove_file(&obj_path);
            if let Some(parent) = obj_path.parent() {
                Self::cleanup_empty_dirs(parent, &self.objects_root(bucket));
            }
            return Err(e.into());
        }

        self.update_bucket_stats(bucket)?;

        tracing::info!("Put object: {}/{} ({} bytes)", bucket, key, data.len());
        Ok(meta)
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> StorageResult<(ObjectMeta, Vec<u8>)> {
        let meta = self.head_object(bucket, key)?;
        let data = fs::read(self.object_path(bucket, key))?;
        Ok((meta, data))
    }

    /// Metadata of an existing object, rebuilt from the payload when the
    /// sidecar is missing.
    pub fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.ensure_bucket(bucket)?;
        Self::validate_object_key(key)?;

        let obj_path = self.object_path(bucket, key);
        if !obj_path.is_file() {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let meta_path = self.object_meta_path(bucket, key);
        if meta_path.exists() {
            let json = fs::read_to_string(&meta_path)?;
            let meta: ObjectMeta = serde_json::from_str(&json)?;
            if meta.key == key {
                return Ok(meta);
            }
            tracing::warn!("Sidecar of {}/{} belongs to '{}', rebuilding", bucket, key, meta.key);
        }

        let file_meta = fs::metadata(&obj_path)?;
        let etag = format!("\"{}\"", hex::encode(Sha256::digest(fs::read(&obj_path)?)));
        let last_modified = file_meta.modified().map(Into::into).unwrap_or_else(|_| Utc::now());

        Ok(ObjectMeta {
            key: key.to_string(),
            bucket: bucket.to_string(),
            size: file_meta.len(),
            content_type: mime_guess::from_path(key).first_or_octet_stream().to_string(),
            etag,
            last_modified,
            metadata: HashMap::new(),
        })
    }

    pub fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.ensure_bucket(bucket)?;
        Self::validate_object_key(key)?;

        let obj_path = self.object_path(bucket, key);
        if !obj_path.is_file() {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        fs::remove_file(&obj_path)?;

        let meta_path = self.object_meta_path(bucket, key);
        if meta_path.exists() {
            fs::remove_file(&meta_path)?;
        }

        // Clean up empty parent directories inside objects/
        if let Some(parent) = obj_path.parent() {
            Self::cleanup_empty_dirs(parent, &self.objects_root(bucket));
        }

        self.update_bucket_stats(bucket)?;
        tracing::info!("Deleted object: {}/{}", bucket, key);
        Ok(())
    }

    fn cleanup_empty_dirs(dir: &Path, stop_at: &Path) {
        let mut current = dir.to_path_buf();
        while current != stop_at {
            let is_empty = fs::read_dir(&current)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty || fs::remove_dir(&current).is_err() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }

    /// One key-ordered page of objects whose keys start with `prefix`,
    /// beginning after `start_after`.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: u32,
    ) -> StorageResult<ListObjectsPage> {
        self.ensure_bucket(bucket)?;

        let objects_dir = self.objects_root(bucket);
        let mut keys = Vec::new();
        if objects_dir.exists() {
            Self::walk_keys(&objects_dir, &objects_dir, &mut keys)?;
        }
        keys.retain(|key| key.starts_with(prefix) && start_after.map_or(true, |after| key.as_str() > after));
        keys.sort();

        let max_keys = max_keys.max(1) as usize;
        let is_truncated = keys.len() > max_keys;
        keys.truncate(max_keys);

        let mut objects = Vec::with_capacity(keys.len());
        for key in &keys {
            match self.head_object(bucket, key) {
                Ok(meta) => objects.push(meta),
                // Removed while we were listing
                Err(StorageError::ObjectNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(ListObjectsPage {
            objects,
            is_truncated,
            next_start_after: if is_truncated { keys.last().cloned() } else { None },
        })
    }

    fn walk_keys(dir: &Path, root: &Path, keys: &mut Vec<String>) -> StorageResult<()> {
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::walk_keys(&path, root, keys)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                keys.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }

    fn update_bucket_stats(&self, bucket_name: &str) -> StorageResult<()> {
        let (count, size) = Self::dir_stats(&self.objects_root(bucket_name));

        let mut buckets = self.write_index();
        if let Some(bucket) = buckets.get_mut(bucket_name) {
            bucket.object_count = count;
            bucket.total_size = size;

            let meta_path = self.bucket_path(bucket_name).join(BUCKET_META_FILE);
            fs::write(&meta_path, serde_json::to_string_pretty(&bucket)?)?;
        }

        Ok(())
    }

    fn dir_stats(dir: &Path) -> (u64, u64) {
        let mut count = 0u64;
        let mut size = 0u64;

        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let (c, s) = Self::dir_stats(&path);
                    count += c;
                    size += s;
                } else {
                    count += 1;
                    size += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                }
            }
        }

        (count, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::new(dir.path()).unwrap();
        (dir, engine)
    }

    #[test]
    fn bucket_lifecycle() {
        let (_dir, engine) = engine();

        engine.create_bucket("photos", "local").unwrap();
        assert!(matches!(
            engine.create_bucket("photos", "local"),
            Err(StorageError::BucketAlreadyExists(_))
        ));
        assert!(matches!(
            engine.create_bucket("No_Caps", "local"),
            Err(StorageError::InvalidBucketName(_))
        ));

        engine.put_object("photos", "cat.jpg", b"meow", None, HashMap::new()).unwrap();
        assert!(matches!(engine.delete_bucket("photos"), Err(StorageError::BucketNotEmpty(_))));

        engine.delete_object("photos", "cat.jpg").unwrap();
        engine.delete_bucket("photos").unwrap();
        assert!(engine.list_buckets().is_empty());
    }

    #[test]
    fn put_get_and_stats() {
        let (_dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();

        let meta = engine
            .put_object("docs", "notes/today.txt", b"hello", None, HashMap::new())
            .unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.content_type, "text/plain");

        let (read_meta, data) = engine.get_object("docs", "notes/today.txt").unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(read_meta.etag, meta.etag);

        let bucket = engine.get_bucket("docs").unwrap();
        assert_eq!((bucket.object_count, bucket.total_size), (1, 5));
    }

    #[test]
    fn rejects_escaping_keys() {
        let (_dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();

        for key in ["", "/etc/passwd", "../outside", "a/../../b", "tab\there"] {
            assert!(
                matches!(
                    engine.put_object("docs", key, b"x", None, HashMap::new()),
                    Err(StorageError::InvalidObjectKey(_))
                ),
                "accepted {key:?}"
            );
        }
    }

    #[test]
    fn listing_is_paged_by_key() {
        let (_dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();
        for key in ["c.png", "a.txt", "dir/b.bin"] {
            engine.put_object("docs", key, b"x", None, HashMap::new()).unwrap();
        }

        let first = engine.list_objects("docs", "", None, 2).unwrap();
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "c.png"]);
        assert!(first.is_truncated);
        assert_eq!(first.next_start_after.as_deref(), Some("c.png"));

        let second = engine.list_objects("docs", "", first.next_start_after.as_deref(), 2).unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["dir/b.bin"]);
        assert!(!second.is_truncated);

        let prefixed = engine.list_objects("docs", "dir/", None, 10).unwrap();
        assert_eq!(prefixed.objects.len(), 1);
    }

    #[test]
    fn deleting_nested_object_prunes_empty_dirs() {
        let (dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();
        engine.put_object("docs", "a/b/c.txt", b"x", None, HashMap::new()).unwrap();

        engine.delete_object("docs", "a/b/c.txt").unwrap();

        assert!(!dir.path().join("docs/objects/a").exists());
        assert!(dir.path().join("docs/objects").exists());
        assert!(matches!(
            engine.delete_object("docs", "a/b/c.txt"),
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn rescans_existing_buckets() {
        let (dir, engine) = engine();
        engine.create_bucket("kept", "eu-west-1").unwrap();
        drop(engine);

        let reopened = StorageEngine::new(dir.path()).unwrap();
        let bucket = reopened.get_bucket("kept").unwrap();
        assert_eq!(bucket.region, "eu-west-1");
    }

    #[test]
    fn keys_differing_only_by_separator_keep_their_own_metadata() {
        let (_dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();
        engine.put_object("docs", "a/b", b"first", None, HashMap::new()).unwrap();
        engine
            .put_object("docs", "a__SLASH__b", b"second-longer", None, HashMap::new())
            .unwrap();

        let page = engine.list_objects("docs", "", None, 10).unwrap();
        let listed: Vec<_> = page.objects.iter().map(|o| (o.key.as_str(), o.size)).collect();
        assert_eq!(listed, vec![("a/b", 5), ("a__SLASH__b", 13)]);
        assert_eq!(engine.head_object("docs", "a/b").unwrap().size, 5);
    }

    #[test]
    fn long_keys_get_bounded_sidecar_names() {
        let (_dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();
        let key = format!("{}/{}", "x".repeat(200), "y".repeat(200));

        engine.put_object("docs", &key, b"deep", None, HashMap::new()).unwrap();

        let page = engine.list_objects("docs", "", None, 10).unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, key);

        let too_long = "z".repeat(300);
        assert!(matches!(
            engine.put_object("docs", &too_long, b"x", None, HashMap::new()),
            Err(StorageError::InvalidObjectKey(_))
        ));
        assert_eq!(engine.list_objects("docs", "", None, 10).unwrap().objects.len(), 1);
    }

    #[test]
    fn failed_sidecar_write_leaves_no_payload() {
        let (_dir, engine) = engine();
        engine.create_bucket("docs", "local").unwrap();
        // A directory where the sidecar file should go makes the write fail
        fs::create_dir_all(engine.object_meta_path("docs", "nested/report.txt")).unwrap();

        let result = engine.put_object("docs", "nested/report.txt", b"data", None, HashMap::new());

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!engine.object_path("docs", "nested/report.txt").exists());
        assert!(!engine.object_path("docs", "nested").exists());
        assert!(engine.list_objects("docs", "", None, 10).unwrap().objects.is_empty());
    }
}
