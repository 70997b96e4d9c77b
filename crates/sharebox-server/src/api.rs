use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Form, Multipart, Path, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tracing::{info, warn};
use uuid::Uuid;

use sharebox_store::users::{verify_password, NewUser};
use sharebox_store::{Database, FileRecord, StoreError};

use crate::auth::{AuthContext, RequireUser, SessionUser, LOGIN_PATH};
use crate::blob_store::{public_id, BlobStore};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pages::{self, PageContext};

const MSG_FIELDS_REQUIRED: &str = "All fields are required.";
const MSG_USERNAME_TAKEN: &str = "Username already exists.";
const MSG_INVALID_CREDENTIALS: &str = "Invalid credentials.";

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub blob_store: Arc<BlobStore>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        lock_db(&self.db)
    }

    fn page<'a>(&'a self, user: Option<&'a SessionUser>) -> PageContext<'a> {
        PageContext {
            instance_name: &self.config.instance_name,
            user,
        }
    }
}

fn lock_db(db: &Mutex<Database>) -> Result<MutexGuard<'_, Database>, ServerError> {
    db.lock()
        .map_err(|_| ServerError::Internal("database lock poisoned".into()))
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = match state.config.max_upload_bytes {
        Some(max) => DefaultBodyLimit::max(max),
        None => DefaultBodyLimit::disable(),
    };

    // Sessions live in memory for the life of the process; there is no
    // idle or absolute expiry. Sessions that never log out are only freed
    // on restart, so the store grows with every new login.
    let sessions = SessionManagerLayer::new(MemoryStore::default()).with_secure(false);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/signup", get(signup_form).post(signup))
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .route("/dashboard", get(dashboard))
        .route("/upload", post(upload).layer(upload_limit))
        .route("/file/:id", get(file_page))
        .route("/download/:id", get(download))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Signup and login both post these two fields.  Missing fields decode as
/// empty strings so they can be reported on the form instead of rejected.
#[derive(Deserialize)]
struct CredentialsForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl CredentialsForm {
    fn filled(self) -> Option<(String, String)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((self.username, self.password))
        }
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn index(State(state): State<AppState>, auth: AuthContext) -> Response {
    if auth.is_authenticated() {
        return Redirect::to("/dashboard").into_response();
    }
    pages::landing(&state.page(None)).into_response()
}

async fn signup_form(State(state): State<AppState>, auth: AuthContext) -> Html<String> {
    pages::signup(&state.page(auth.user()), None)
}

async fn signup(
    State(state): State<AppState>,
    auth: AuthContext,
    Form(form): Form<CredentialsForm>,
) -> Result<Response, ServerError> {
    let Some((username, password)) = form.filled() else {
        return Ok(pages::signup(&state.page(auth.user()), Some(MSG_FIELDS_REQUIRED)).into_response());
    };

    let new_user = tokio::task::spawn_blocking(move || NewUser::hash(username, &password))
        .await
        .map_err(|e| ServerError::Internal(format!("password hashing task failed: {e}")))??;

    let created = state.db()?.create_user(&new_user);
    match created {
        Ok(_) => Ok(Redirect::to(LOGIN_PATH).into_response()),
        Err(StoreError::DuplicateUsername) => {
            info!(username = %new_user.username(), "signup rejected, username taken");
            Ok(pages::signup(&state.page(auth.user()), Some(MSG_USERNAME_TAKEN)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

async fn login_form(State(state): State<AppState>, auth: AuthContext) -> Html<String> {
    pages::login(&state.page(auth.user()), None)
}

async fn login(
    State(state): State<AppState>,
    mut auth: AuthContext,
    Form(form): Form<CredentialsForm>,
) -> Result<Response, ServerError> {
    let Some((username, password)) = form.filled() else {
        return Ok(pages::login(&state.page(auth.user()), Some(MSG_FIELDS_REQUIRED)).into_response());
    };

    let found = state.db()?.find_user(&username)?;

    // Unknown user and wrong password must look the same to the client.
    let verified = match found {
        Some(user) => {
            tokio::task::spawn_blocking(move || verify_password(&user, &password).then_some(user))
                .await
                .map_err(|e| ServerError::Internal(format!("password check task failed: {e}")))?
        }
        None => None,
    };

    let Some(user) = verified else {
        warn!(username = %username, "login failed");
        return Ok(pages::login(&state.page(auth.user()), Some(MSG_INVALID_CREDENTIALS)).into_response());
    };

    auth.login(&user).await?;
    info!(user_id = user.id, "login succeeded");

    Ok(Redirect::to("/dashboard").into_response())
}

async fn logout(auth: AuthContext) -> Result<Redirect, ServerError> {
    if let Some(user) = auth.user() {
        info!(user_id = user.user_id, "logout");
    }
    auth.logout().await?;
    Ok(Redirect::to("/"))
}

async fn dashboard(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Html<String>, ServerError> {
    let files = state.db()?.list_files_by_uploader(user.user_id)?;
    Ok(pages::dashboard(&state.page(Some(&user)), &files))
}

/// Accept one multipart part named `file`, store it, register it, and hand
/// back the share link.
///
/// The blob is staged first and only moved under its final name inside the
/// registry transaction, so a failed insert leaves neither a row nor a file.
async fn upload(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Html<String>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            continue;
        };

        let reader = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
        let staged = state
            .blob_store
            .stage(&original_name, reader)
            .await
            .map_err(client_read_error)?;

        let id = staged.id();
        debug_assert_eq!(public_id(staged.stored_name()), id.to_string());

        let record = FileRecord::new(id, original_name, staged.stored_name(), user.user_id);
        // The transaction and the final rename are blocking work.
        let db = Arc::clone(&state.db);
        let (staged, registered) = tokio::task::spawn_blocking(move || {
            let registered = lock_db(&db).and_then(|mut db| {
                db.register_file(&record, || staged.commit())
                    .map_err(ServerError::from)
            });
            (staged, registered)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("upload registration task failed: {e}")))?;

        if let Err(e) = registered {
            staged.discard().await;
            return Err(e);
        }

        info!(
            id = %id,
            user_id = user.user_id,
            size = staged.size(),
            "File uploaded"
        );

        let link = share_link(&state.config, &headers, id);
        return Ok(pages::upload_success(&state.page(Some(&user)), &link));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn file_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Html<String>, ServerError> {
    let record = find_record(&state, &id)?;
    Ok(pages::file(&state.page(auth.user()), &record))
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ServerError> {
    let record = find_record(&state, &id)?;
    let (file, len) = state.blob_store.open(&record.stored_name).await?;

    let headers = [
        (header::CONTENT_TYPE, content_type(&record.stored_name)),
        (header::CONTENT_LENGTH, len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&record.original_name),
        ),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Guessed from the stored extension; unknown extensions are served as
/// opaque bytes.
fn content_type(stored_name: &str) -> String {
    mime_guess::from_path(stored_name)
        .first_or_octet_stream()
        .to_string()
}

/// Failures while reading the request body are the client's fault (aborted
/// upload, body limit), not a storage problem.
fn client_read_error(err: ServerError) -> ServerError {
    match err {
        ServerError::Blob(io_err)
            if io_err
                .get_ref()
                .is_some_and(|inner| inner.is::<MultipartError>()) =>
        {
            ServerError::BadRequest(format!("Multipart error: {}", io_err))
        }
        other => other,
    }
}

/// Resolve a public id from the URL.  Malformed ids are reported exactly
/// like unknown ones.
fn find_record(state: &AppState, raw_id: &str) -> Result<FileRecord, ServerError> {
    let Ok(id) = Uuid::parse_str(raw_id) else {
        return Err(ServerError::NotFound);
    };
    state.db()?.get_file(id)?.ok_or(ServerError::NotFound)
}

fn share_link(config: &ServerConfig, headers: &HeaderMap, id: Uuid) -> String {
    let base = match &config.public_url {
        Some(url) => url.clone(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .filter(|h| !h.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| config.http_addr.to_string());
            format!("http://{host}")
        }
    };
    format!("{base}/file/{id}")
}

/// `attachment` disposition suggesting `original_name` as the saved name.
///
/// The quoted `filename` is an ASCII approximation; names that needed
/// changing also get an RFC 5987 `filename*` with the exact UTF-8 bytes.
fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if fallback == original_name {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode(original_name)
        )
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
