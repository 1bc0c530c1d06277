use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a storage bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub region: String,
    pub object_count: u64,
    pub total_size: u64,
}

/// Sidecar metadata the storage engine keeps for every stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub bucket: String,
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// One row of an object listing, as the console sees it.
///
/// Field names follow the S3 listing shape (`Key`, `Size`, `LastModified`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectRecord {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl From<&ObjectMeta> for ObjectRecord {
    fn from(meta: &ObjectMeta) -> Self {
        Self {
            key: meta.key.clone(),
            size: meta.size,
            last_modified: meta.last_modified,
        }
    }
}

/// One page of an engine listing
#[derive(Debug, Clone)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectMeta>,
    pub is_truncated: bool,
    /// Key to resume from when `is_truncated` is set
    pub next_start_after: Option<String>,
}

/// A file picked for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Upload progress, counted in objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
}

/// Result of a finished download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutput {
    pub key: String,
    pub size: u64,
    pub path: PathBuf,
}

/// Result of a finished delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteObjectOutput {
    pub key: String,
}

/// Request to create a new bucket
#[derive(Debug, Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "local".to_string()
}

/// Response for listing buckets
#[derive(Debug, Serialize)]
pub struct ListBucketsResponse {
    pub buckets: Vec<Bucket>,
    pub owner: String,
}
