//! Web console: a single HTML shell plus the JSON API it drives.
//!
//! Every page request builds a fresh [`ObjectListingPage`] wired to
//! request-scoped adapters, runs the action and answers with the page state
//! together with the notifications and overlay messages the action produced.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::LocalStorageClient;
use crate::config::Config;
use crate::error::{AppError, StorageError};
use crate::fmt_args;
use crate::format::format;
use crate::models::{CreateBucketRequest, ListBucketsResponse, ObjectRecord, UploadFile};
use crate::page::{
    self, ConsoleServices, DatatableAction, DatatableColumn, ObjectListingPage, PageAction,
    PageStatus, RowAction,
};
use crate::routes::{self, Page, RouteMatch};
use crate::services::{BlockingOverlay, ConfirmationRequest, ConfirmationService, NotificationSink};
use crate::storage::StorageEngine;
use crate::title::PageTitle;

type AppResult<T> = Result<T, AppError>;

pub struct AppState {
    pub engine: Arc<StorageEngine>,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_size;
    Router::new()
        .route("/", get(console_page))
        .nest("/api", api_routes())
        // Wildcards cannot be nested, register them at top level
        .route("/api/object/*path", get(download_object))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/title", get(page_title))
        .route("/buckets", get(list_buckets).post(create_bucket))
        .route("/buckets/:bucket", axum::routing::delete(delete_bucket))
        .route("/objects/:bucket", get(object_page))
        .route("/objects/:bucket/upload", post(upload_objects))
        .route("/objects/:bucket/delete", post(delete_objects))
}

pub async fn serve(config: Config) -> Result<(), StorageError> {
    let engine = Arc::new(StorageEngine::new(&config.data_dir)?);
    tracing::info!("Storage directory: {}", config.data_dir);

    let addr = config.addr();
    let app = router(Arc::new(AppState { engine, config }));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Console listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

// ─── Request-scoped adapters ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum NotificationKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Notification {
    kind: NotificationKind,
    text: String,
}

/// Collects what a page action shows the user during one request.
#[derive(Default)]
struct RequestUi {
    notifications: Mutex<Vec<Notification>>,
    overlay: Mutex<Vec<String>>,
}

impl RequestUi {
    fn push(&self, kind: NotificationKind, text: &str) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification { kind, text: text.to_string() });
    }

    fn take(&self) -> (Vec<Notification>, Vec<String>) {
        let notifications = std::mem::take(&mut *self.notifications.lock().unwrap_or_else(PoisonError::into_inner));
        let overlay = std::mem::take(&mut *self.overlay.lock().unwrap_or_else(PoisonError::into_inner));
        (notifications, overlay)
    }
}

impl NotificationSink for RequestUi {
    fn show_success(&self, text: &str) {
        self.push(NotificationKind::Success, text);
    }

    fn show_error(&self, text: &str) {
        self.push(NotificationKind::Error, text);
    }
}

impl BlockingOverlay for RequestUi {
    fn start(&self, text: &str) {
        self.overlay.lock().unwrap_or_else(PoisonError::into_inner).push(text.to_string());
    }

    fn update(&self, text: &str) {
        self.start(text);
    }

    fn stop(&self) {}
}

/// Confirmation answered up front by the request; a declined prompt is kept
/// so it can be sent back to the browser.
struct RequestConfirmation {
    confirmed: bool,
    prompt: Mutex<Option<ConfirmationRequest>>,
}

#[async_trait]
impl ConfirmationService for RequestConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        if !self.confirmed {
            *self.prompt.lock().unwrap_or_else(PoisonError::into_inner) = Some(request.clone());
        }
        self.confirmed
    }
}

struct PageSession {
    page: ObjectListingPage,
    route: RouteMatch,
    ui: Arc<RequestUi>,
    confirmation: Arc<RequestConfirmation>,
}

impl PageSession {
    /// Resolves the object page of `bucket` and initializes it.
    async fn open(state: &AppState, bucket: &str, confirmed: bool) -> AppResult<Self> {
        let path = format!("/objects/{}", utf8_percent_encode(bucket, NON_ALPHANUMERIC));
        let route = routes::resolve(&path).ok_or_else(|| AppError::RouteNotFound(path.clone()))?;

        let ui = Arc::new(RequestUi::default());
        let confirmation = Arc::new(RequestConfirmation {
            confirmed,
            prompt: Mutex::new(None),
        });
        let client = LocalStorageClient::new(
            Arc::clone(&state.engine),
            &state.config.download_dir,
            state.config.page_size,
        );
        let page = ObjectListingPage::new(ConsoleServices {
            client: Arc::new(client),
            notifications: ui.clone(),
            confirmation: confirmation.clone(),
            overlay: ui.clone(),
        });

        page.initialize(&route.params).await;
        Ok(Self { page, route, ui, confirmation })
    }

    fn respond(self, app_title: &str) -> PageResponse {
        let title = PageTitle::project(&self.route.data, &self.route.params);
        let view = self.page.view();
        let columns = page::datatable_columns();
        let (notifications, overlay) = self.ui.take();
        let confirmation = self
            .confirmation
            .prompt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        PageResponse {
            document_title: title.document_title(app_title),
            back_link: title.back_link(&format!("/{}", self.route.path)),
            title,
            bucket: view.bucket,
            status: view.status,
            objects: view
                .objects
                .into_iter()
                .map(|record| RowView {
                    cells: columns.iter().map(|c| c.render(&record)).collect(),
                    record,
                })
                .collect(),
            columns,
            toolbar: page::datatable_actions(),
            row_actions: page::row_actions(),
            page_actions: page::page_actions(),
            notifications,
            overlay,
            confirmation,
        }
    }
}

#[derive(Serialize)]
struct RowView {
    #[serde(flatten)]
    record: ObjectRecord,
    cells: Vec<String>,
}

#[derive(Serialize)]
struct PageResponse {
    title: PageTitle,
    document_title: Option<String>,
    back_link: Option<String>,
    bucket: String,
    status: PageStatus,
    objects: Vec<RowView>,
    columns: [DatatableColumn; 4],
    toolbar: [DatatableAction; 2],
    row_actions: [RowAction; 2],
    page_actions: [PageAction; 1],
    notifications: Vec<Notification>,
    overlay: Vec<String>,
    /// Prompt to show before repeating the request with `confirmed: true`
    confirmation: Option<ConfirmationRequest>,
}

// ─── Page handlers ───────────────────────────────────────────────

async fn console_page(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_console(&state.config.title))
}

#[derive(Debug, Deserialize)]
struct TitleQuery {
    path: String,
}

#[derive(Serialize)]
struct TitleResponse {
    page: Page,
    path: String,
    #[serde(flatten)]
    title: PageTitle,
    document_title: Option<String>,
    back_link: Option<String>,
}

async fn page_title(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TitleQuery>,
) -> AppResult<Json<TitleResponse>> {
    let matched = routes::resolve(&query.path).ok_or_else(|| AppError::RouteNotFound(query.path.clone()))?;
    let title = PageTitle::project(&matched.data, &matched.params);
    let path = format!("/{}", matched.path);

    Ok(Json(TitleResponse {
        page: matched.page,
        document_title: title.document_title(&state.config.title),
        back_link: title.back_link(&path),
        path,
        title,
    }))
}

async fn object_page(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> AppResult<Json<PageResponse>> {
    let session = PageSession::open(&state, &bucket, false).await?;
    Ok(Json(session.respond(&state.config.title)))
}

async fn upload_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Json<PageResponse>> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("upload-{}", uuid::Uuid::new_v4()));
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload data: {}", e)))?;

        files.push(UploadFile { name, content_type, data });
    }

    let session = PageSession::open(&state, &bucket, false).await?;
    session.page.upload(files).await;
    Ok(Json(session.respond(&state.config.title)))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    keys: Vec<String>,
    #[serde(default)]
    confirmed: bool,
}

async fn delete_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Json(request): Json<DeleteRequest>,
) -> AppResult<Json<PageResponse>> {
    let session = PageSession::open(&state, &bucket, request.confirmed).await?;

    let selected = session.page.select(&request.keys);
    if selected.is_empty() {
        return Err(AppError::BadRequest("No listed object matches the selection".to_string()));
    }
    if selected.len() < request.keys.len() {
        tracing::warn!(
            "Ignoring {} unknown key(s) in delete request for bucket '{}'",
            request.keys.len() - selected.len(),
            bucket
        );
    }

    session.page.delete(selected).await;
    Ok(Json(session.respond(&state.config.title)))
}

// ─── Bucket handlers ─────────────────────────────────────────────

async fn list_buckets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ListBucketsResponse {
        buckets: state.engine.list_buckets(),
        owner: "bucket-console".to_string(),
    })
}

async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBucketRequest>,
) -> AppResult<impl IntoResponse> {
    let bucket = state.engine.create_bucket(&body.name, &body.region)?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.engine.delete_bucket(&bucket)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Raw object download ─────────────────────────────────────────

/// Parse a catch-all path like "mybucket/path/to/key.txt" into (bucket, key)
fn parse_bucket_key(path: &str) -> AppResult<(&str, &str)> {
    let path = path.strip_prefix('/').unwrap_or(path);
    match path.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => Ok((bucket, key)),
        _ => Err(AppError::BadRequest(
            "Path must be in the format: {bucket}/{key}".to_string(),
        )),
    }
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AppError::BadRequest(format!("Invalid header value: {}", e)))
}

async fn download_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> AppResult<Response> {
    let (bucket, key) = parse_bucket_key(&path)?;
    let meta = state.engine.head_object(bucket, key)?;
    let file = tokio::fs::File::open(state.engine.object_path(bucket, key))
        .await
        .map_err(StorageError::from)?;

    let file_name = key.rsplit('/').next().unwrap_or(key);
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(file_name, NON_ALPHANUMERIC)
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(&meta.content_type)?);
    headers.insert(header::ETAG, header_value(&meta.etag)?);
    headers.insert(header::LAST_MODIFIED, header_value(&meta.last_modified.to_rfc2822())?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
    headers.insert(header::CONTENT_DISPOSITION, header_value(&disposition)?);

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

// ─── HTML shell ──────────────────────────────────────────────────

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn render_console(app_title: &str) -> String {
    let args = fmt_args! { "app_title" => escape_html(app_title) };
    format(CONSOLE_HTML, &args)
}

const CONSOLE_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{ app_title }}</title>
    <style>
        :root { --bg: #0a0e1a; --card: #1a1f35; --border: #2a3152; --text: #e8ecf4; --muted: #8892a8; --accent: #6366f1; --success: #10b981; --danger: #ef4444; }
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body { font-family: 'Inter', -apple-system, sans-serif; background: var(--bg); color: var(--text); min-height: 100vh; }
        .header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
        .header a { color: var(--muted); text-decoration: none; }
        .header h1 { font-size: 1.25rem; font-weight: 600; }
        .header h1 small { color: var(--muted); font-weight: 400; margin-left: .5rem; }
        .main { padding: 1.5rem 2rem; }
        .toolbar { display: flex; gap: .5rem; margin-bottom: 1rem; }
        .btn { background: var(--card); color: var(--text); border: 1px solid var(--border); border-radius: 8px; padding: .45rem .9rem; cursor: pointer; }
        .btn:disabled { opacity: .4; cursor: default; }
        .btn-danger { border-color: var(--danger); color: var(--danger); }
        table { width: 100%; border-collapse: collapse; background: var(--card); border-radius: 12px; overflow: hidden; }
        th, td { text-align: left; padding: .6rem .8rem; border-bottom: 1px solid var(--border); }
        th { color: var(--muted); font-weight: 500; }
        .status { color: var(--muted); padding: 2rem 0; text-align: center; }
        .status.error { color: var(--danger); }
        .overlay { position: fixed; inset: 0; background: rgba(0,0,0,.6); display: none; align-items: center; justify-content: center; font-size: 1.1rem; }
        .overlay.active { display: flex; }
        .toasts { position: fixed; bottom: 1.5rem; right: 1.5rem; display: flex; flex-direction: column; gap: .5rem; }
        .toast { background: var(--card); border-left: 4px solid var(--success); padding: .7rem 1rem; border-radius: 8px; }
        .toast.error { border-left-color: var(--danger); }
        .bucket-list a { color: var(--text); }
    </style>
</head>
<body>
    <header class="header">
        <a id="back-link" href="#/buckets" hidden>&larr;</a>
        <h1><span id="page-title"></span><small id="page-subtitle"></small></h1>
    </header>
    <main class="main" id="content"></main>
    <div class="overlay" id="overlay"><span id="overlay-text"></span></div>
    <div class="toasts" id="toasts"></div>

    <script>
        const API = '/api';
        const APP_TITLE = document.title;
        let current = null;

        function escapeHtml(str) {
            const div = document.createElement('div');
            div.textContent = str;
            return div.innerHTML;
        }

        function toast(text, kind) {
            const el = document.createElement('div');
            el.className = 'toast ' + (kind || 'success');
            el.textContent = text;
            document.getElementById('toasts').appendChild(el);
            setTimeout(() => el.remove(), 4000);
        }

        function blockUi(text) {
            document.getElementById('overlay-text').textContent = text;
            document.getElementById('overlay').classList.toggle('active', !!text);
        }

        async function api(path, options) {
            const res = await fetch(API + path, options);
            const body = res.status === 204 ? null : await res.json();
            if (!res.ok) throw new Error(body && body.message ? body.message : res.statusText);
            return body;
        }

        async function applyTitle(path) {
            const title = await api('/title?path=' + encodeURIComponent(path));
            document.getElementById('page-title').textContent = title.title || '';
            document.getElementById('page-subtitle').textContent = title.sub_title || '';
            const back = document.getElementById('back-link');
            back.hidden = !title.back_link;
            back.href = '#' + (title.back_link || '/');
            document.title = title.document_title || APP_TITLE;
        }

        function selectedKeys() {
            return [...document.querySelectorAll('input.row-select:checked')].map(el => el.value);
        }

        function renderObjects(view) {
            current = view;
            const content = document.getElementById('content');
            if (view.status === 'loading_error') {
                content.innerHTML = '<p class="status error">Failed to load the objects of this bucket.</p>';
                return;
            }
            const head = view.columns.map(c => '<th>' + escapeHtml(c.name) + '</th>').join('');
            const rows = view.objects.map(o => '<tr><td><input type="checkbox" class="row-select" value="' + escapeHtml(o.Key) + '"></td>' +
                o.cells.slice(0, -1).map(c => '<td>' + escapeHtml(c) + '</td>').join('') +
                '<td>' + view.row_actions.map(a => '<button class="btn" data-action="' + a.kind + '" data-key="' + escapeHtml(o.Key) + '">' + a.title + '</button>').join(' ') + '</td></tr>').join('');
            content.innerHTML = '<div class="toolbar">' +
                view.toolbar.map(a => '<button class="btn" data-toolbar="' + a.kind + '" data-min="' + a.min_selected + '" disabled>' + a.text + '</button>').join('') +
                view.page_actions.map(a => '<label class="btn">' + a.text + '<input type="file" id="upload-input" multiple hidden></label>').join('') +
                '</div><table><thead><tr><th></th>' + head + '</tr></thead><tbody>' + rows + '</tbody></table>' +
                (view.objects.length ? '' : '<p class="status">No objects in this bucket</p>');

            content.querySelectorAll('input.row-select').forEach(el => el.addEventListener('change', updateToolbar));
            content.querySelectorAll('[data-toolbar]').forEach(el => el.addEventListener('click', () => runAction(el.dataset.toolbar, selectedKeys())));
            content.querySelectorAll('[data-action]').forEach(el => el.addEventListener('click', () => runAction(el.dataset.action, [el.dataset.key])));
            document.getElementById('upload-input').addEventListener('change', e => upload(e.target.files));
        }

        function updateToolbar() {
            const count = selectedKeys().length;
            document.querySelectorAll('[data-toolbar]').forEach(el => el.disabled = count < Number(el.dataset.min));
        }

        function showOutcome(view) {
            if (view.overlay.length) blockUi(view.overlay[view.overlay.length - 1]);
            setTimeout(() => blockUi(''), 300);
            view.notifications.forEach(n => toast(n.text, n.kind));
            renderObjects(view);
        }

        function runAction(kind, keys) {
            if (kind === 'download') {
                keys.forEach(key => {
                    const a = document.createElement('a');
                    a.href = API + '/object/' + encodeURIComponent(current.bucket) + '/' + key.split('/').map(encodeURIComponent).join('/');
                    a.download = key.split('/').pop();
                    document.body.appendChild(a);
                    a.click();
                    a.remove();
                });
            } else if (kind === 'delete') {
                remove(keys, false);
            }
        }

        async function remove(keys, confirmed) {
            try {
                if (confirmed) blockUi('Please wait, deleting ' + keys.length + ' object(s) ...');
                const view = await api('/objects/' + encodeURIComponent(current.bucket) + '/delete', {
                    method: 'POST',
                    headers: { 'Content-Type': 'application/json' },
                    body: JSON.stringify({ keys, confirmed })
                });
                if (view.confirmation) {
                    const message = view.confirmation.message.replace(/<[^>]*>/g, '');
                    if (confirm(message)) await remove(keys, true);
                    return;
                }
                showOutcome(view);
            } catch (e) {
                blockUi('');
                toast(e.message, 'error');
            }
        }

        async function upload(fileList) {
            if (!fileList || !fileList.length) return;
            const form = new FormData();
            [...fileList].forEach(f => form.append('file', f));
            blockUi('Please wait, uploading ' + fileList.length + ' object(s) ...');
            try {
                showOutcome(await api('/objects/' + encodeURIComponent(current.bucket) + '/upload', { method: 'POST', body: form }));
            } catch (e) {
                blockUi('');
                toast(e.message, 'error');
            }
        }

        async function renderBuckets() {
            const data = await api('/buckets');
            document.getElementById('content').innerHTML = '<ul class="bucket-list">' +
                data.buckets.map(b => '<li><a href="#/objects/' + encodeURIComponent(b.name) + '">' + escapeHtml(b.name) + '</a> ' + b.object_count + ' object(s)</li>').join('') +
                '</ul>' + (data.buckets.length ? '' : '<p class="status">No buckets yet</p>');
        }

        async function route() {
            const path = location.hash.slice(1) || '/buckets';
            const content = document.getElementById('content');
            content.innerHTML = '<p class="status">Loading ...</p>';
            try {
                await applyTitle(path);
                const match = path.match(/^\/objects\/([^/]+)/);
                if (match) {
                    renderObjects(await api('/objects/' + match[1]));
                } else {
                    await renderBuckets();
                }
            } catch (e) {
                content.innerHTML = '<p class="status error">' + escapeHtml(e.message) + '</p>';
            }
        }

        window.addEventListener('hashchange', route);
        route();
    </script>
</body>
</html>"##;
