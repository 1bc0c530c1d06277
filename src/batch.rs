//! Runs a batch of independent storage operations as one user action.
//!
//! [`concat`] drives the operations one after another and reports progress
//! through a blocking overlay and per-item notifications. [`merge`] drives
//! them all at once and only counts the outcome.

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::error::StorageError;
use crate::fmt_args;
use crate::format::{format, FmtArgs};
use crate::services::{BlockingOverlay, ClientStream, NotificationSink, OverlayGuard};

/// Rounded completion percentage, clamped to `0..=100`.
pub fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u64
}

/// Completed/total counters of one running batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTally {
    pub completed: usize,
    pub total: usize,
}

impl ProgressTally {
    pub fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    pub fn advance(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }

    pub fn percent(&self) -> u64 {
        percent(self.completed as u64, self.total as u64)
    }

    fn fmt_args(&self) -> FmtArgs {
        fmt_args! {
            "current" => self.completed,
            "total" => self.total,
            "percent" => self.percent(),
        }
    }
}

/// Overlay texts. `start` gets `total`; `next` gets `current`, `total` and
/// `percent`.
#[derive(Debug, Clone, Copy)]
pub struct ProgressMessages {
    pub start: &'static str,
    pub next: &'static str,
}

/// Notification texts.
pub struct NotifyMessages<T> {
    /// Shown for every emitted item, formatted with `next_fmt_args`
    pub next: &'static str,
    pub next_fmt_args: fn(&T) -> FmtArgs,
    /// Shown once when an operation fails; gets `name` (the operation's
    /// label), `current`, `total` and `error`
    pub error: &'static str,
}

/// Outcome of a [`concat`] run.
#[derive(Debug)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    /// The failure that aborted the batch, if any
    pub error: Option<StorageError>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.completed == self.total
    }
}

/// Runs `sources` strictly in order. Each source is paired with the label
/// that names it in the error notification.
///
/// Source `i + 1` is not polled before source `i` has ended. The first
/// failure aborts the batch: the remaining sources are dropped without being
/// polled and one error notification is shown. The overlay is held for the
/// whole run and released on every path.
pub async fn concat<T>(
    sources: Vec<(String, ClientStream<T>)>,
    overlay: &dyn BlockingOverlay,
    notifications: &dyn NotificationSink,
    progress: &ProgressMessages,
    notify: &NotifyMessages<T>,
) -> BatchReport {
    let mut tally = ProgressTally::new(sources.len());
    if sources.is_empty() {
        return BatchReport {
            total: 0,
            completed: 0,
            error: None,
        };
    }

    let guard = OverlayGuard::start(overlay, &format(progress.start, &fmt_args! { "total" => tally.total }));

    for (index, (label, mut source)) in sources.into_iter().enumerate() {
        while let Some(item) = source.next().await {
            match item {
                Ok(output) => {
                    notifications.show_success(&format(notify.next, &(notify.next_fmt_args)(&output)));
                }
                Err(err) => {
                    tracing::warn!(
                        "Batch aborted at operation {} of {} ({}): {}",
                        index + 1,
                        tally.total,
                        label,
                        err
                    );
                    drop(guard);
                    let mut args = fmt_args! {
                        "name" => label,
                        "current" => index + 1,
                        "total" => tally.total,
                    };
                    args.insert("error".into(), err.to_string().into());
                    notifications.show_error(&format(notify.error, &args));
                    return BatchReport {
                        total: tally.total,
                        completed: tally.completed,
                        error: Some(err),
                    };
                }
            }
        }

        tally.advance();
        guard.update(&format(progress.next, &tally.fmt_args()));
    }

    tracing::debug!("Batch of {} operation(s) finished", tally.total);
    BatchReport {
        total: tally.total,
        completed: tally.completed,
        error: None,
    }
}

/// Outcome of a [`merge`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParallelReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives every source concurrently until all have ended.
///
/// Failures are logged and counted, nothing is shown to the user.
pub async fn merge<T: Send + 'static>(sources: Vec<ClientStream<T>>) -> ParallelReport {
    let mut report = ParallelReport::default();
    let mut merged = stream::select_all(sources);

    while let Some(item) = merged.next().await {
        match item {
            Ok(_) => report.succeeded += 1,
            Err(err) => {
                tracing::warn!("Operation failed: {}", err);
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::stream::{self, StreamExt};

    use super::*;
    use crate::models::DeleteObjectOutput;
    use crate::testing::{RecordingNotifications, RecordingOverlay};

    fn name_args(output: &DeleteObjectOutput) -> FmtArgs {
        fmt_args! { "name" => output.key.clone() }
    }

    const PROGRESS: ProgressMessages = ProgressMessages {
        start: "deleting {{ total }}",
        next: "deleting {{ current }} of {{ total }} ({{ percent }}%)",
    };

    const NOTIFY: NotifyMessages<DeleteObjectOutput> = NotifyMessages {
        next: "deleted {{ name }}",
        next_fmt_args: name_args,
        error: "failed {{ name }} ({{ current }} of {{ total }}): {{ error }}",
    };

    /// Sources that log when they are first polled.
    fn sources(
        keys: &[&str],
        failing: Option<&str>,
        polled: &Arc<Mutex<Vec<String>>>,
    ) -> Vec<(String, ClientStream<DeleteObjectOutput>)> {
        keys.iter()
            .map(|key| {
                let key = key.to_string();
                let fail = failing == Some(key.as_str());
                let polled = Arc::clone(polled);
                let label = key.clone();
                let source = stream::once(async move {
                    polled.lock().unwrap().push(key.clone());
                    if fail {
                        Err(StorageError::Io(std::io::Error::other("disk gone")))
                    } else {
                        Ok(DeleteObjectOutput { key })
                    }
                })
                .boxed();
                (label, source)
            })
            .collect()
    }

    #[test]
    fn percent_rounds_and_clamps() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(5, 3), 100);
        assert_eq!(percent(0, 0), 0);
    }

    #[tokio::test]
    async fn concat_reports_every_step_in_order() {
        let polled = Arc::new(Mutex::new(Vec::new()));
        let overlay = RecordingOverlay::default();
        let notifications = RecordingNotifications::default();

        let report = concat(
            sources(&["a.txt", "b.bin", "c.png"], None, &polled),
            &overlay,
            &notifications,
            &PROGRESS,
            &NOTIFY,
        )
        .await;

        assert!(report.is_success());
        assert_eq!(report.completed, 3);
        assert_eq!(*polled.lock().unwrap(), vec!["a.txt", "b.bin", "c.png"]);
        assert_eq!(
            overlay.events(),
            vec![
                "start: deleting 3",
                "update: deleting 1 of 3 (33%)",
                "update: deleting 2 of 3 (67%)",
                "update: deleting 3 of 3 (100%)",
                "stop",
            ]
        );
        assert_eq!(
            notifications.successes(),
            vec!["deleted a.txt", "deleted b.bin", "deleted c.png"]
        );
        assert!(notifications.errors().is_empty());
    }

    #[tokio::test]
    async fn concat_aborts_on_first_failure() {
        let polled = Arc::new(Mutex::new(Vec::new()));
        let overlay = RecordingOverlay::default();
        let notifications = RecordingNotifications::default();

        let report = concat(
            sources(&["a.txt", "b.bin", "c.png"], Some("b.bin"), &polled),
            &overlay,
            &notifications,
            &PROGRESS,
            &NOTIFY,
        )
        .await;

        assert!(!report.is_success());
        assert_eq!(report.completed, 1);
        assert!(matches!(report.error, Some(StorageError::Io(_))));
        // c.png is never issued
        assert_eq!(*polled.lock().unwrap(), vec!["a.txt", "b.bin"]);
        assert_eq!(overlay.events().last().map(String::as_str), Some("stop"));
        assert_eq!(notifications.successes(), vec!["deleted a.txt"]);
        assert_eq!(
            notifications.errors(),
            vec!["failed b.bin (2 of 3): I/O error: disk gone"]
        );
    }

    #[tokio::test]
    async fn concat_of_nothing_is_silent() {
        let overlay = RecordingOverlay::default();
        let notifications = RecordingNotifications::default();

        let report = concat(Vec::new(), &overlay, &notifications, &PROGRESS, &NOTIFY).await;

        assert!(report.is_success());
        assert_eq!(report.total, 0);
        assert!(overlay.events().is_empty());
        assert!(notifications.successes().is_empty());
    }

    #[tokio::test]
    async fn merge_absorbs_failures() {
        let polled = Arc::new(Mutex::new(Vec::new()));
        let streams = sources(&["a.txt", "b.bin", "c.png"], Some("a.txt"), &polled)
            .into_iter()
            .map(|(_, source)| source)
            .collect();
        let report = merge(streams).await;

        assert_eq!(report, ParallelReport { succeeded: 2, failed: 1 });
        let mut polled = polled.lock().unwrap().clone();
        polled.sort();
        assert_eq!(polled, vec!["a.txt", "b.bin", "c.png"]);
    }
}
