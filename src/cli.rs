use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;

use crate::client::LocalStorageClient;
use crate::config::Config;
use crate::error::StorageError;
use crate::format::human_readable_size;
use crate::models::{ObjectRecord, UploadFile};
use crate::page::{self, CellTemplate, ConsoleServices, ObjectListingPage, PageStatus};
use crate::routes;
use crate::services::{BlockingOverlay, ConfirmationRequest, ConfirmationService, NotificationSink};
use crate::storage::StorageEngine;
use crate::title::PageTitle;

#[derive(Parser)]
#[command(
    name = "bucket-console",
    about = "Administrative console for a local S3-compatible object store",
    version,
    author
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Data directory for stored objects
    #[arg(long, global = true)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web console
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create a new bucket
    #[command(visible_alias = "mb")]
    MakeBucket {
        /// Name of the bucket to create
        name: String,
        /// Region label
        #[arg(short, long, default_value = "local")]
        region: String,
    },

    /// Remove a bucket (must be empty)
    #[command(visible_alias = "rb")]
    RemoveBucket {
        /// Name of the bucket to delete
        name: String,
    },

    /// List buckets or the objects of a bucket
    #[command(visible_alias = "ls")]
    List {
        /// Bucket name (omit to list all buckets)
        bucket: Option<String>,
    },

    /// Upload local files into a bucket
    #[command(visible_alias = "put")]
    Upload {
        bucket: String,
        /// Files to upload; each is stored under its file name
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download objects into a local directory
    #[command(visible_alias = "get")]
    Download {
        bucket: String,
        #[arg(required = true)]
        keys: Vec<String>,
        /// Target directory (defaults to the configured download directory)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Delete objects from a bucket
    #[command(visible_alias = "rm")]
    Remove {
        bucket: String,
        #[arg(required = true)]
        keys: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    /// Environment-derived configuration with command-line overrides applied.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        match &self.command {
            Some(Commands::Serve { host, port }) => {
                if let Some(host) = host {
                    config.host = host.clone();
                }
                if let Some(port) = port {
                    config.port = *port;
                }
            }
            Some(Commands::Download { output: Some(dir), .. }) => config.download_dir = dir.clone(),
            _ => {}
        }
        config
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Cannot read file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to load the objects of bucket '{0}'")]
    Listing(String),
    #[error("Object '{key}' is not listed in bucket '{bucket}'")]
    NotListed { bucket: String, key: String },
    #[error("{0} operation(s) failed")]
    Failed(usize),
}

// ─── Terminal adapters ───────────────────────────────────────────

/// Prints notifications and keeps the overlay as a single rewritten line on
/// stderr.
#[derive(Default)]
pub struct Terminal {
    overlay: Mutex<Option<String>>,
    errors: AtomicUsize,
}

impl Terminal {
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    fn draw(line: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K{}", line);
        let _ = stderr.flush();
    }

    /// Prints `text` above the overlay line, if one is showing.
    fn print(&self, text: &str, to_stderr: bool) {
        let overlay = self.overlay.lock().unwrap_or_else(PoisonError::into_inner);
        if overlay.is_some() {
            Self::draw("");
        }
        if to_stderr {
            eprintln!("{}", text);
        } else {
            println!("{}", text);
        }
        if let Some(line) = overlay.as_deref() {
            Self::draw(line);
        }
    }
}

impl NotificationSink for Terminal {
    fn show_success(&self, text: &str) {
        self.print(&format!("✓ {}", strip_markup(text)), false);
    }

    fn show_error(&self, text: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.print(&format!("✗ {}", strip_markup(text)), true);
    }
}

impl BlockingOverlay for Terminal {
    fn start(&self, text: &str) {
        self.update(text);
    }

    fn update(&self, text: &str) {
        let mut overlay = self.overlay.lock().unwrap_or_else(PoisonError::into_inner);
        Self::draw(text);
        *overlay = Some(text.to_string());
    }

    fn stop(&self) {
        let mut overlay = self.overlay.lock().unwrap_or_else(PoisonError::into_inner);
        if overlay.take().is_some() {
            Self::draw("");
        }
    }
}

/// Asks on stdin; `--yes` answers every prompt up front.
pub struct PromptConfirmation {
    assume_yes: bool,
}

#[async_trait]
impl ConfirmationService for PromptConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        if self.assume_yes {
            return true;
        }

        let prompt = strip_markup(&request.message);
        let answer = tokio::task::spawn_blocking(move || {
            print!("{} [y/N] ", prompt);
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                tracing::warn!("Failed to read confirmation: {}", e);
                false
            }
            Err(e) => {
                tracing::warn!("Confirmation prompt aborted: {}", e);
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Removes HTML tags from console messages.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

// ─── Commands ────────────────────────────────────────────────────

struct Session {
    page: ObjectListingPage,
    title: PageTitle,
}

async fn open_page(
    engine: &Arc<StorageEngine>,
    config: &Config,
    terminal: &Arc<Terminal>,
    bucket: &str,
    assume_yes: bool,
) -> Result<Session, CliError> {
    let path = format!("/objects/{}", utf8_percent_encode(bucket, NON_ALPHANUMERIC));
    let Some(route) = routes::resolve(&path) else {
        return Err(CliError::Listing(bucket.to_string()));
    };

    let client = LocalStorageClient::new(Arc::clone(engine), &config.download_dir, config.page_size);
    let page = ObjectListingPage::new(ConsoleServices {
        client: Arc::new(client),
        notifications: terminal.clone(),
        confirmation: Arc::new(PromptConfirmation { assume_yes }),
        overlay: terminal.clone(),
    });

    page.initialize(&route.params).await;
    if page.status() == PageStatus::LoadingError {
        return Err(CliError::Listing(bucket.to_string()));
    }

    Ok(Session {
        title: PageTitle::project(&route.data, &route.params),
        page,
    })
}

fn list_buckets(engine: &StorageEngine) {
    let buckets = engine.list_buckets();
    if buckets.is_empty() {
        println!("No buckets found. Create one with: bucket-console make-bucket <name>");
        return;
    }
    println!("{:<30} {:>8} {:>12}  {}", "BUCKET", "OBJECTS", "SIZE", "CREATED");
    println!("{}", "─".repeat(70));
    for b in &buckets {
        println!(
            "{:<30} {:>8} {:>12}  {}",
            b.name,
            b.object_count,
            human_readable_size(b.total_size),
            b.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("{}", "─".repeat(70));
    println!("{} bucket(s)", buckets.len());
}

fn print_objects(session: &Session, app_title: &str) {
    if let Some(title) = session.title.document_title(app_title) {
        println!("{}", title);
    }

    let objects = session.page.objects();
    if objects.is_empty() {
        println!("No objects in bucket '{}'", session.page.bucket());
        return;
    }

    let columns: Vec<_> = page::datatable_columns()
        .into_iter()
        .filter(|c| c.cell != CellTemplate::ActionMenu)
        .collect();
    let header: Vec<String> = columns.iter().map(|c| c.name.to_uppercase()).collect();
    println!("{:<50} {:>12}  {}", header[0], header[1], header[2]);
    println!("{}", "─".repeat(85));
    for object in &objects {
        let cells: Vec<String> = columns.iter().map(|c| c.render(object)).collect();
        println!("{:<50} {:>12}  {}", cells[0], cells[1], cells[2]);
    }
    println!("{}", "─".repeat(85));
    println!("{} object(s)", objects.len());
}

async fn read_uploads(files: &[PathBuf]) -> Result<Vec<UploadFile>, CliError> {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let data = tokio::fs::read(path).await.map_err(|source| CliError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("upload-{}", uuid::Uuid::new_v4()));
        uploads.push(UploadFile {
            name,
            content_type: None,
            data: Bytes::from(data),
        });
    }
    Ok(uploads)
}

/// Resolves `keys` against the listing; every key has to be listed.
fn select(session: &Session, keys: &[String]) -> Result<Vec<ObjectRecord>, CliError> {
    let selected = session.page.select(keys);
    if let Some(missing) = keys.iter().find(|k| !selected.iter().any(|o| o.key == **k)) {
        return Err(CliError::NotListed {
            bucket: session.page.bucket(),
            key: missing.clone(),
        });
    }
    Ok(selected)
}

/// Runs a storage command. `Serve` is dispatched by `main`.
pub async fn execute(command: Commands, config: &Config, terminal: &Arc<Terminal>) -> Result<(), CliError> {
    let engine = Arc::new(StorageEngine::new(&config.data_dir)?);

    match command {
        Commands::Serve { .. } => {
            tracing::warn!("serve is not a storage command");
            Ok(())
        }

        Commands::MakeBucket { name, region } => {
            let bucket = engine.create_bucket(&name, &region)?;
            println!("✓ Bucket '{}' created successfully", bucket.name);
            println!("  Region:  {}", bucket.region);
            println!("  Created: {}", bucket.created_at.format("%Y-%m-%d %H:%M:%S"));
            Ok(())
        }

        Commands::RemoveBucket { name } => {
            engine.delete_bucket(&name)?;
            println!("✓ Bucket '{}' deleted", name);
            Ok(())
        }

        Commands::List { bucket: None } => {
            list_buckets(&engine);
            Ok(())
        }

        Commands::List { bucket: Some(bucket) } => {
            let session = open_page(&engine, config, terminal, &bucket, false).await?;
            print_objects(&session, &config.title);
            Ok(())
        }

        Commands::Upload { bucket, files } => {
            let uploads = read_uploads(&files).await?;
            let session = open_page(&engine, config, terminal, &bucket, false).await?;
            session.page.upload(uploads).await;
            match terminal.error_count() {
                0 => Ok(()),
                n => Err(CliError::Failed(n)),
            }
        }

        Commands::Download { bucket, keys, .. } => {
            let session = open_page(&engine, config, terminal, &bucket, false).await?;
            let selected = select(&session, &keys)?;
            let report = session.page.download(&selected).await;
            println!(
                "✓ Downloaded {} of {} object(s) to '{}'",
                report.succeeded,
                selected.len(),
                config.download_dir
            );
            match report.failed {
                0 => Ok(()),
                n => Err(CliError::Failed(n)),
            }
        }

        Commands::Remove { bucket, keys, yes } => {
            let session = open_page(&engine, config, terminal, &bucket, yes).await?;
            let selected = select(&session, &keys)?;
            match session.page.delete(selected).await {
                None => {
                    println!("Nothing deleted");
                    Ok(())
                }
                Some(report) if report.is_success() => Ok(()),
                Some(report) => Err(CliError::Failed(report.total - report.completed)),
            }
        }
    }
}

pub async fn run_cli(command: Commands, config: Config) -> ExitCode {
    let terminal = Arc::new(Terminal::default());
    match execute(command, &config, &terminal).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {}", e);
            ExitCode::FAILURE
        }
    }
}
