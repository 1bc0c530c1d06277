//! [`StorageClient`] backed by an in-process [`StorageEngine`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::error::StorageError;
use crate::models::{DeleteObjectOutput, DownloadOutput, ObjectRecord, UploadFile, UploadProgress};
use crate::services::{ClientStream, StorageClient};
use crate::storage::StorageEngine;

#[derive(Clone)]
pub struct LocalStorageClient {
    engine: Arc<StorageEngine>,
    download_dir: PathBuf,
    page_size: u32,
}

impl LocalStorageClient {
    pub fn new(engine: Arc<StorageEngine>, download_dir: impl Into<PathBuf>, page_size: u32) -> Self {
        Self {
            engine,
            download_dir: download_dir.into(),
            page_size: page_size.max(1),
        }
    }
}

/// Listing cursor: `None` once the last page was delivered.
type Cursor = Option<Option<String>>;

impl StorageClient for LocalStorageClient {
    fn list_objects(&self, bucket: &str) -> ClientStream<Vec<ObjectRecord>> {
        let engine = Arc::clone(&self.engine);
        let bucket = bucket.to_string();
        let page_size = self.page_size;
        let start: Cursor = Some(None);

        stream::unfold(start, move |cursor| {
            let engine = Arc::clone(&engine);
            let bucket = bucket.clone();
            async move {
                let Some(start_after) = cursor else {
                    return None;
                };
                match engine.list_objects(&bucket, "", start_after.as_deref(), page_size) {
                    Ok(page) => {
                        let records: Vec<ObjectRecord> = page.objects.iter().map(ObjectRecord::from).collect();
                        let next: Cursor = page.next_start_after.map(Some);
                        Some((Ok(records), next))
                    }
                    Err(err) => Some((Err(err), None)),
                }
            }
        })
        .boxed()
    }

    fn download_object(&self, bucket: &str, key: &str) -> ClientStream<DownloadOutput> {
        let engine = Arc::clone(&self.engine);
        let download_dir = self.download_dir.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();

        stream::once(async move {
            let (meta, data) = engine.get_object(&bucket, &key)?;
            let file_name = key.rsplit('/').next().unwrap_or(&key);
            let path = download_dir.join(file_name);

            tokio::fs::create_dir_all(&download_dir).await?;
            tokio::fs::write(&path, &data).await?;
            tracing::info!("Downloaded {}/{} to {}", bucket, key, path.display());

            Ok::<_, StorageError>(DownloadOutput {
                key,
                size: meta.size,
                path,
            })
        })
        .boxed()
    }

    fn upload_objects(&self, bucket: &str, files: Vec<UploadFile>) -> ClientStream<UploadProgress> {
        let engine = Arc::clone(&self.engine);
        let bucket = bucket.to_string();
        let total = files.len() as u64;
        let pending = Some(files.into_iter().enumerate());

        stream::unfold(pending, move |pending| {
            let engine = Arc::clone(&engine);
            let bucket = bucket.clone();
            async move {
                let Some(mut files) = pending else {
                    return None;
                };
                let Some((index, file)) = files.next() else {
                    return None;
                };
                let stored = engine.put_object(
                    &bucket,
                    &file.name,
                    &file.data,
                    file.content_type.as_deref(),
                    HashMap::new(),
                );
                match stored {
                    Ok(_) => {
                        let progress = UploadProgress {
                            loaded: index as u64 + 1,
                            total,
                        };
                        Some((Ok(progress), Some(files)))
                    }
                    // Stop at the first failure; earlier files stay stored.
                    Err(err) => Some((Err::<UploadProgress, StorageError>(err), None)),
                }
            }
        })
        .boxed()
    }

    fn delete_object(&self, bucket: &str, key: &str) -> ClientStream<DeleteObjectOutput> {
        let engine = Arc::clone(&self.engine);
        let bucket = bucket.to_string();
        let key = key.to_string();

        stream::once(async move {
            engine.delete_object(&bucket, &key)?;
            Ok::<_, StorageError>(DeleteObjectOutput { key })
        })
        .boxed()
    }
}
