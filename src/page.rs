//! Object listing page: the objects of one bucket plus the batch actions a
//! user can run on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use futures::StreamExt;
use serde::Serialize;

use crate::batch::{self, BatchReport, NotifyMessages, ParallelReport, ProgressMessages};
use crate::error::StorageError;
use crate::fmt_args;
use crate::format::{format, human_readable_size, FmtArgs};
use crate::models::{DeleteObjectOutput, ObjectRecord, UploadFile};
use crate::routes::{self, RouteParams};
use crate::services::{
    BlockingOverlay, ConfirmationMessages, ConfirmationRequest, ConfirmationService,
    NotificationSink, OverlayGuard, Severity, StorageClient,
};

const UPLOAD_START: &str = "Please wait, uploading {{ total }} object(s) ...";
const UPLOAD_PROGRESS: &str =
    "Please wait, uploading {{ loaded }} of {{ total }} object(s) ({{ percent }}%) ...";
const UPLOAD_DONE: &str = "{{ total }} object(s) have been successfully uploaded.";
const UPLOAD_FAILED: &str = "Failed to upload the objects: {{ error }}";

fn key_as_name(object: &ObjectRecord) -> FmtArgs {
    fmt_args! { "name" => object.key.clone() }
}

fn deleted_key_as_name(output: &DeleteObjectOutput) -> FmtArgs {
    fmt_args! { "name" => output.key.clone() }
}

const DELETE_CONFIRMATION: ConfirmationMessages<ObjectRecord> = ConfirmationMessages {
    singular: "Do you really want to delete the object <strong>{{ name }}</strong>?",
    singular_fmt_args: key_as_name,
    plural: "Do you really want to delete these <strong>{{ count }}</strong> objects?",
};

const DELETE_PROGRESS: ProgressMessages = ProgressMessages {
    start: "Please wait, deleting {{ total }} object(s) ...",
    next: "Please wait, deleting object {{ current }} of {{ total }} ({{ percent }}%) ...",
};

const DELETE_NOTIFY: NotifyMessages<DeleteObjectOutput> = NotifyMessages {
    next: "Object {{ name }} has been deleted.",
    next_fmt_args: deleted_key_as_name,
    error: "Failed to delete object {{ name }}: {{ error }}",
};

/// Future that drives one listing to completion.
///
/// The page's visible state is already reset when the task is handed out;
/// awaiting it applies the listing (unless a newer load superseded it).
pub type LoadTask = BoxFuture<'static, ()>;

/// What the view renders: spinner, table or error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    None,
    Loading,
    Reloading,
    Ready,
    LoadingError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Icon {
    Download,
    Delete,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Download,
    Delete,
}

/// Entry of a row's action menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowAction {
    pub title: &'static str,
    pub icon: Icon,
    pub kind: ActionKind,
}

/// Toolbar button acting on the selected rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatatableAction {
    pub text: &'static str,
    pub icon: Icon,
    pub min_selected: usize,
    pub kind: ActionKind,
}

impl DatatableAction {
    pub fn is_enabled(&self, selected: usize) -> bool {
        selected >= self.min_selected
    }
}

/// Page-level button; `Upload` opens a file picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageAction {
    pub text: &'static str,
    pub icon: Icon,
    pub accepts_files: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellTemplate {
    Text,
    BytesToSize,
    LocaleDateTime,
    ActionMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatatableColumn {
    pub name: &'static str,
    pub prop: &'static str,
    pub cell: CellTemplate,
}

impl DatatableColumn {
    /// Cell text for `record`; the action menu column has none.
    pub fn render(&self, record: &ObjectRecord) -> String {
        match self.cell {
            CellTemplate::Text => record.key.clone(),
            CellTemplate::BytesToSize => human_readable_size(record.size),
            CellTemplate::LocaleDateTime => record.last_modified.format("%Y-%m-%d %H:%M:%S").to_string(),
            CellTemplate::ActionMenu => String::new(),
        }
    }
}

pub fn datatable_columns() -> [DatatableColumn; 4] {
    [
        DatatableColumn { name: "Name", prop: "Key", cell: CellTemplate::Text },
        DatatableColumn { name: "Size", prop: "Size", cell: CellTemplate::BytesToSize },
        DatatableColumn {
            name: "Last Modified",
            prop: "LastModified",
            cell: CellTemplate::LocaleDateTime,
        },
        DatatableColumn { name: "", prop: "", cell: CellTemplate::ActionMenu },
    ]
}

pub fn datatable_actions() -> [DatatableAction; 2] {
    [
        DatatableAction {
            text: "Download",
            icon: Icon::Download,
            min_selected: 1,
            kind: ActionKind::Download,
        },
        DatatableAction {
            text: "Delete",
            icon: Icon::Delete,
            min_selected: 1,
            kind: ActionKind::Delete,
        },
    ]
}

pub fn page_actions() -> [PageAction; 1] {
    [PageAction { text: "Upload", icon: Icon::Upload, accepts_files: true }]
}

/// The per-row menu; the same two entries for every object.
pub fn row_actions() -> [RowAction; 2] {
    [
        RowAction { title: "Download", icon: Icon::Download, kind: ActionKind::Download },
        RowAction { title: "Delete", icon: Icon::Delete, kind: ActionKind::Delete },
    ]
}

/// Collaborators a page drives.
#[derive(Clone)]
pub struct ConsoleServices {
    pub client: Arc<dyn StorageClient>,
    pub notifications: Arc<dyn NotificationSink>,
    pub confirmation: Arc<dyn ConfirmationService>,
    pub overlay: Arc<dyn BlockingOverlay>,
}

/// Serializable snapshot of the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub bucket: String,
    pub status: PageStatus,
    pub objects: Vec<ObjectRecord>,
}

#[derive(Default)]
struct PageState {
    bucket: String,
    objects: Vec<ObjectRecord>,
    /// Index into `objects` by key
    positions: HashMap<String, usize>,
    status: PageStatus,
    /// Bumped by every load and navigation; results tagged with an older
    /// value are discarded.
    generation: u64,
    loads_started: u64,
}

impl PageState {
    fn clear_objects(&mut self) {
        self.objects.clear();
        self.positions.clear();
    }

    /// Appends new keys, replaces known ones in place.
    fn merge(&mut self, batch: Vec<ObjectRecord>) {
        for record in batch {
            match self.positions.get(&record.key) {
                Some(&index) => self.objects[index] = record,
                None => {
                    self.positions.insert(record.key.clone(), self.objects.len());
                    self.objects.push(record);
                }
            }
        }
    }
}

fn lock(state: &Mutex<PageState>) -> MutexGuard<'_, PageState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ObjectListingPage {
    services: ConsoleServices,
    state: Arc<Mutex<PageState>>,
}

impl ObjectListingPage {
    pub fn new(services: ConsoleServices) -> Self {
        Self {
            services,
            state: Arc::new(Mutex::new(PageState::default())),
        }
    }

    pub fn bucket(&self) -> String {
        lock(&self.state).bucket.clone()
    }

    pub fn status(&self) -> PageStatus {
        lock(&self.state).status
    }

    pub fn objects(&self) -> Vec<ObjectRecord> {
        lock(&self.state).objects.clone()
    }

    pub fn view(&self) -> PageView {
        let state = lock(&self.state);
        PageView {
            bucket: state.bucket.clone(),
            status: state.status,
            objects: state.objects.clone(),
        }
    }

    /// Records whose keys are in `keys`, in page order.
    pub fn select(&self, keys: &[String]) -> Vec<ObjectRecord> {
        lock(&self.state)
            .objects
            .iter()
            .filter(|o| keys.contains(&o.key))
            .cloned()
            .collect()
    }

    /// Enters the page with the given route parameters.
    ///
    /// Without a `bid` the page shows the bucket-less view right away and the
    /// storage client is not touched.
    pub fn initialize(&self, params: &RouteParams) -> LoadTask {
        let mut state = lock(&self.state);
        let Some(raw) = params.get("bid") else {
            state.generation += 1;
            state.bucket.clear();
            state.clear_objects();
            state.status = PageStatus::Ready;
            return future::ready(()).boxed();
        };

        // Bucket switch and reset happen under one lock
        state.bucket = routes::decode(raw);
        self.load_locked(&mut state)
    }

    /// Resets the visible state and returns the task that lists the current
    /// bucket.
    pub fn load(&self) -> LoadTask {
        let mut state = lock(&self.state);
        self.load_locked(&mut state)
    }

    fn load_locked(&self, state: &mut PageState) -> LoadTask {
        state.generation += 1;
        state.clear_objects();
        state.status = if state.loads_started == 0 {
            PageStatus::Loading
        } else {
            PageStatus::Reloading
        };
        state.loads_started += 1;
        let (generation, bucket) = (state.generation, state.bucket.clone());

        tracing::debug!("Listing bucket '{}' (generation {})", bucket, generation);
        let mut listing = self.services.client.list_objects(&bucket);
        let shared = Arc::clone(&self.state);

        async move {
            let outcome: Result<(), StorageError> = loop {
                match listing.next().await {
                    Some(Ok(batch)) => {
                        let mut state = lock(&shared);
                        if state.generation != generation {
                            tracing::debug!("Dropping stale listing of bucket '{}'", bucket);
                            return;
                        }
                        state.merge(batch);
                    }
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                }
            };

            let mut state = lock(&shared);
            if state.generation != generation {
                tracing::debug!("Dropping stale listing of bucket '{}'", bucket);
                return;
            }
            match outcome {
                Ok(()) => state.status = PageStatus::Ready,
                Err(err) => {
                    tracing::warn!("Failed to list bucket '{}': {}", bucket, err);
                    state.clear_objects();
                    state.status = PageStatus::LoadingError;
                }
            }
        }
        .boxed()
    }

    /// Downloads the selected objects concurrently. Individual failures are
    /// only logged.
    pub async fn download(&self, selected: &[ObjectRecord]) -> ParallelReport {
        let bucket = self.bucket();
        let sources = selected
            .iter()
            .map(|object| self.services.client.download_object(&bucket, &object.key))
            .collect();

        let report = batch::merge(sources).await;
        tracing::debug!(
            "Downloaded {} of {} object(s) from bucket '{}'",
            report.succeeded,
            selected.len(),
            bucket
        );
        report
    }

    /// Uploads `files` behind the blocking overlay, then reloads on success.
    pub async fn upload(&self, files: Vec<UploadFile>) {
        if files.is_empty() {
            return;
        }

        let total = files.len();
        let bucket = self.bucket();
        let outcome: Result<(), StorageError> = {
            let overlay = OverlayGuard::start(
                self.services.overlay.as_ref(),
                &format(UPLOAD_START, &fmt_args! { "total" => total }),
            );
            let mut progress = self.services.client.upload_objects(&bucket, files);
            let mut outcome = Ok(());
            while let Some(event) = progress.next().await {
                match event {
                    Ok(p) => overlay.update(&format(
                        UPLOAD_PROGRESS,
                        &fmt_args! {
                            "loaded" => p.loaded,
                            "total" => p.total,
                            "percent" => batch::percent(p.loaded, p.total),
                        },
                    )),
                    Err(err) => {
                        outcome = Err(err);
                        break;
                    }
                }
            }
            outcome
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Uploaded {} object(s) to bucket '{}'", total, bucket);
                self.services
                    .notifications
                    .show_success(&format(UPLOAD_DONE, &fmt_args! { "total" => total }));
                self.load().await;
            }
            Err(err) => {
                tracing::warn!("Upload to bucket '{}' failed: {}", bucket, err);
                self.services
                    .notifications
                    .show_error(&format(UPLOAD_FAILED, &fmt_args! { "error" => err.to_string() }));
            }
        }
    }

    /// Asks for confirmation, deletes the selection one object at a time and
    /// reloads.
    ///
    /// Returns `None` when nothing was selected or the user declined.
    pub async fn delete(&self, selected: Vec<ObjectRecord>) -> Option<BatchReport> {
        if selected.is_empty() {
            return None;
        }

        let request = ConfirmationRequest::new(&selected, Severity::Danger, &DELETE_CONFIRMATION);
        if !self.services.confirmation.confirm(&request).await {
            tracing::debug!("Delete of {} object(s) declined", selected.len());
            return None;
        }

        let bucket = self.bucket();
        let sources = selected
            .iter()
            .map(|object| {
                let source = self.services.client.delete_object(&bucket, &object.key);
                (object.key.clone(), source)
            })
            .collect();

        let report = batch::concat(
            sources,
            self.services.overlay.as_ref(),
            self.services.notifications.as_ref(),
            &DELETE_PROGRESS,
            &DELETE_NOTIFY,
        )
        .await;
        tracing::info!(
            "Deleted {} of {} object(s) from bucket '{}'",
            report.completed,
            report.total,
            bucket
        );

        self.load().await;
        Some(report)
    }

    /// Runs a row menu entry on its single record.
    pub async fn run_row_action(&self, kind: ActionKind, record: ObjectRecord) {
        match kind {
            ActionKind::Download => {
                self.download(std::slice::from_ref(&record)).await;
            }
            ActionKind::Delete => {
                self.delete(vec![record]).await;
            }
        }
    }
}
