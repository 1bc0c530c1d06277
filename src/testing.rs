//! In-memory doubles for the console's collaborators, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt};

use crate::error::StorageError;
use crate::models::{DeleteObjectOutput, DownloadOutput, ObjectRecord, UploadFile, UploadProgress};
use crate::services::{
    BlockingOverlay, ClientStream, ConfirmationRequest, ConfirmationService, NotificationSink,
    StorageClient,
};

pub fn record(key: &str, size: u64) -> ObjectRecord {
    ObjectRecord {
        key: key.to_string(),
        size,
        last_modified: Utc.with_ymd_and_hms(2023, 4, 12, 7, 23, 8).unwrap(),
    }
}

#[derive(Default)]
pub struct RecordingOverlay {
    events: Mutex<Vec<String>>,
}

impl RecordingOverlay {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BlockingOverlay for RecordingOverlay {
    fn start(&self, text: &str) {
        self.events.lock().unwrap().push(format!("start: {text}"));
    }

    fn update(&self, text: &str) {
        self.events.lock().unwrap().push(format!("update: {text}"));
    }

    fn stop(&self) {
        self.events.lock().unwrap().push("stop".to_string());
    }
}

#[derive(Default)]
pub struct RecordingNotifications {
    successes: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifications {
    pub fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifications {
    fn show_success(&self, text: &str) {
        self.successes.lock().unwrap().push(text.to_string());
    }

    fn show_error(&self, text: &str) {
        self.errors.lock().unwrap().push(text.to_string());
    }
}

pub struct RecordingConfirmation {
    answer: bool,
    prompts: Mutex<Vec<ConfirmationRequest>>,
}

impl RecordingConfirmation {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<ConfirmationRequest> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationService for RecordingConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        self.prompts.lock().unwrap().push(request.clone());
        self.answer
    }
}

/// Scripted storage client. Every call is logged when its stream is first
/// polled, so the log shows the order requests were actually issued in.
#[derive(Default)]
pub struct FakeClient {
    listings: HashMap<String, Vec<Vec<ObjectRecord>>>,
    failing_lists: HashSet<String>,
    failing_keys: HashSet<String>,
    failing_upload_at: Option<usize>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `pages` (one stream item each) whenever `bucket` is listed.
    pub fn with_listing(mut self, bucket: &str, pages: Vec<Vec<ObjectRecord>>) -> Self {
        self.listings.insert(bucket.to_string(), pages);
        self
    }

    /// Listing `bucket` yields its pages and then fails.
    pub fn failing_list(mut self, bucket: &str) -> Self {
        self.failing_lists.insert(bucket.to_string());
        self
    }

    /// Downloads and deletes of `key` fail.
    pub fn failing_key(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    /// Uploading the file at `index` fails.
    pub fn failing_upload_at(mut self, index: usize) -> Self {
        self.failing_upload_at = Some(index);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn single<T: Send + 'static>(
        &self,
        call: String,
        result: Result<T, StorageError>,
    ) -> ClientStream<T> {
        let calls = Arc::clone(&self.calls);
        stream::once(async move {
            calls.lock().unwrap().push(call);
            result
        })
        .boxed()
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl StorageClient for FakeClient {
    fn list_objects(&self, bucket: &str) -> ClientStream<Vec<ObjectRecord>> {
        let calls = Arc::clone(&self.calls);
        let bucket = bucket.to_string();
        let pages = self.listings.get(&bucket).cloned().unwrap_or_default();
        let fails = self.failing_lists.contains(&bucket);

        stream::once(async move {
            calls.lock().unwrap().push(format!("list {bucket}"));
            (bucket, pages, fails)
        })
        .flat_map(|(bucket, pages, fails)| {
            let failure = fails.then(|| Err(StorageError::BucketNotFound(bucket)));
            stream::iter(pages.into_iter().map(Ok).chain(failure))
        })
        .boxed()
    }

    fn download_object(&self, bucket: &str, key: &str) -> ClientStream<DownloadOutput> {
        let result = if self.failing_keys.contains(key) {
            Err(Self::not_found(bucket, key))
        } else {
            Ok(DownloadOutput {
                key: key.to_string(),
                size: 0,
                path: PathBuf::from(key),
            })
        };
        self.single(format!("download {bucket}/{key}"), result)
    }

    fn upload_objects(&self, bucket: &str, files: Vec<UploadFile>) -> ClientStream<UploadProgress> {
        let calls = Arc::clone(&self.calls);
        let call = format!("upload {bucket} {}", files.len());
        let total = files.len() as u64;
        let failing_at = self.failing_upload_at;

        stream::once(async move {
            calls.lock().unwrap().push(call);
        })
        .flat_map(move |()| {
            let stored = failing_at.map_or(files.len(), |index| index.min(files.len()));
            let progress = (1..=stored as u64).map(move |loaded| Ok(UploadProgress { loaded, total }));
            let failure = failing_at
                .filter(|index| *index < files.len())
                .map(|index| Err(StorageError::InvalidObjectKey(files[index].name.clone())));
            stream::iter(progress.chain(failure).collect::<Vec<_>>())
        })
        .boxed()
    }

    fn delete_object(&self, bucket: &str, key: &str) -> ClientStream<DeleteObjectOutput> {
        let result = if self.failing_keys.contains(key) {
            Err(Self::not_found(bucket, key))
        } else {
            Ok(DeleteObjectOutput {
                key: key.to_string(),
            })
        };
        self.single(format!("delete {bucket}/{key}"), result)
    }
}
