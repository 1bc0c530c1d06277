//! Contracts between the console pages and the collaborators they drive.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::StorageError;
use crate::format::{format, FmtArgs};
use crate::fmt_args;
use crate::models::{DeleteObjectOutput, DownloadOutput, ObjectRecord, UploadFile, UploadProgress};

/// Stream returned by every storage client call.
///
/// Streams are lazy: no request is issued before the first poll. A stream
/// yields zero or more items and then ends, or yields one `Err` and ends.
pub type ClientStream<T> = BoxStream<'static, Result<T, StorageError>>;

/// Object operations against a named bucket.
pub trait StorageClient: Send + Sync {
    /// Lists a bucket, one batch of records per listing page.
    fn list_objects(&self, bucket: &str) -> ClientStream<Vec<ObjectRecord>>;

    fn download_object(&self, bucket: &str, key: &str) -> ClientStream<DownloadOutput>;

    /// Uploads `files` in order, reporting progress after each stored file.
    fn upload_objects(&self, bucket: &str, files: Vec<UploadFile>) -> ClientStream<UploadProgress>;

    fn delete_object(&self, bucket: &str, key: &str) -> ClientStream<DeleteObjectOutput>;
}

/// Transient user-visible messages (toasts, terminal lines).
pub trait NotificationSink: Send + Sync {
    fn show_success(&self, text: &str);
    fn show_error(&self, text: &str);
}

/// A UI indicator that blocks interaction while a long operation runs.
///
/// Use [`OverlayGuard`] rather than calling these directly.
pub trait BlockingOverlay: Send + Sync {
    fn start(&self, text: &str);
    fn update(&self, text: &str);
    fn stop(&self);
}

/// Holds a [`BlockingOverlay`] open; dropping the guard stops it.
pub struct OverlayGuard<'a> {
    overlay: &'a dyn BlockingOverlay,
}

impl<'a> OverlayGuard<'a> {
    pub fn start(overlay: &'a dyn BlockingOverlay, text: &str) -> Self {
        overlay.start(text);
        Self { overlay }
    }

    pub fn update(&self, text: &str) {
        self.overlay.update(text);
    }
}

impl Drop for OverlayGuard<'_> {
    fn drop(&mut self) {
        self.overlay.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Danger,
}

/// Singular/plural prompt templates for a confirmation over a selection.
pub struct ConfirmationMessages<T> {
    pub singular: &'static str,
    /// Placeholder values for `singular`, taken from the one selected item
    pub singular_fmt_args: fn(&T) -> FmtArgs,
    /// Formatted with `count`
    pub plural: &'static str,
}

impl<T> ConfirmationMessages<T> {
    /// Picks the singular template for exactly one item, the plural one
    /// otherwise.
    pub fn render(&self, items: &[T]) -> String {
        match items {
            [item] => format(self.singular, &(self.singular_fmt_args)(item)),
            _ => format(self.plural, &fmt_args! { "count" => items.len() }),
        }
    }
}

/// A rendered confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub severity: Severity,
    pub message: String,
    pub count: usize,
}

impl ConfirmationRequest {
    pub fn new<T>(items: &[T], severity: Severity, messages: &ConfirmationMessages<T>) -> Self {
        Self {
            severity,
            message: messages.render(items),
            count: items.len(),
        }
    }
}

#[async_trait]
pub trait ConfirmationService: Send + Sync {
    /// Resolves to `true` only if the user accepted the prompt.
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingOverlay;

    fn name_args(name: &&'static str) -> FmtArgs {
        fmt_args! { "name" => *name }
    }

    const MESSAGES: ConfirmationMessages<&'static str> = ConfirmationMessages {
        singular: "Delete <strong>{{ name }}</strong>?",
        singular_fmt_args: name_args,
        plural: "Delete these <strong>{{ count }}</strong> objects?",
    };

    #[test]
    fn confirmation_picks_template_by_count() {
        let one = ConfirmationRequest::new(&["only.txt"], Severity::Danger, &MESSAGES);
        assert_eq!(one.message, "Delete <strong>only.txt</strong>?");
        assert_eq!(one.count, 1);

        let three = ConfirmationRequest::new(&["a", "b", "c"], Severity::Danger, &MESSAGES);
        assert_eq!(three.message, "Delete these <strong>3</strong> objects?");
        assert_eq!(three.severity, Severity::Danger);
    }

    #[test]
    fn overlay_guard_stops_on_drop() {
        let overlay = RecordingOverlay::default();
        {
            let guard = OverlayGuard::start(&overlay, "working");
            guard.update("half way");
        }
        assert_eq!(overlay.events(), vec!["start: working", "update: half way", "stop"]);
    }

    #[test]
    fn overlay_guard_stops_on_early_return() {
        fn fails(overlay: &RecordingOverlay) -> Result<(), ()> {
            let _guard = OverlayGuard::start(overlay, "working");
            Err(())
        }

        let overlay = RecordingOverlay::default();
        assert!(fails(&overlay).is_err());
        assert_eq!(overlay.events().last().map(String::as_str), Some("stop"));
    }
}
