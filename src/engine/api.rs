//! Firmhub HTTP API
//!
//! Device update endpoint plus a few read-only operational routes with an
//! OpenAPI document.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{
        header::{
            CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES,
            LAST_MODIFIED, PRAGMA,
        },
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::engine::device::{Artifacts, DeviceUpdateRequest, RequestRejection};
use crate::engine::release::status::SyncSummary;
use crate::engine::release::store::{ReleaseEntry, StoreError};
use crate::engine::release::verify::{Manifest, CHUNK_SIZE};
use crate::engine::release::{ReleaseState, ReleaseStore, SyncStatusBoard, Version};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<ReleaseStore>,
    pub artifacts: Arc<Artifacts>,
    pub sync_status: Arc<SyncStatusBoard>,
}

#[derive(OpenApi)]
#[openapi(
    paths(health_check, list_releases, sync_status),
    tags(
        (name = "releases", description = "Locally stored releases"),
        (name = "system", description = "Service health and synchronization"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    let device_routes = Router::new()
        .route("/update", get(update))
        .layer(middleware::map_response(no_cache));

    Router::new()
        .route("/", get(index))
        .merge(device_routes)
        .route("/api/health", get(health_check))
        .route("/api/releases", get(list_releases))
        .route("/api/status", get(sync_status))
        .route("/api/openapi.json", get(openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html("This page is meant for \u{1F331}, not \u{1F412}")
}

async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    if let Ok(value) = HeaderValue::from_str(&now) {
        headers.insert(LAST_MODIFIED, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static(
            "no-store, no-cache, must-revalidate, post-check=0, pre-check=0, max-age=0",
        ),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("-1"));
    response
}

/// A verified image ready to be sent to a device
#[derive(Debug)]
pub struct UpdateArtifact {
    pub version: Version,
    pub path: PathBuf,
    pub attachment_name: String,
    pub digest_header: &'static str,
    pub digest: String,
    pub size: u64,
    pub file: File,
}

/// Decide what a device poll receives; `None` means "no update".
///
/// The store lock is held while the latest release is picked, the file is
/// re-verified and opened. Streaming happens after the lock is released from
/// the already open handle.
pub async fn resolve_update(
    store: &ReleaseStore,
    artifacts: &Artifacts,
    request: &DeviceUpdateRequest,
) -> Result<Option<UpdateArtifact>, StoreError> {
    let guard = store.lock().await?;

    let Some(latest) = guard.latest_verified()? else {
        warn!("No local release was found");
        return Ok(None);
    };
    if !latest.is_newer_than(&request.current_version) {
        info!("{} is already the newest version", request.current_version);
        return Ok(None);
    }

    let verifier = store.verifier();
    let file_name = artifacts.file_name(request.kind);
    let dir = guard.path(&latest);
    let path = dir.join(file_name);
    let manifest_path = dir.join(verifier.algorithm().manifest_name());
    let manifest = match Manifest::read(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to read {}: {}", manifest_path.display(), e);
            return Ok(None);
        }
    };
    let result = verifier.verify_entries(&dir, &manifest, Some(&[file_name.to_string()][..]));
    if !result.is_verified() {
        error!("Checksum failed for {}: {}", path.display(), result);
        return Ok(None);
    }
    // The file just matched its manifest entry, so that entry is its digest
    let Some(digest) = manifest.get(file_name).map(|entry| entry.checksum.clone()) else {
        return Ok(None);
    };

    let file = File::open(&path).await?;
    let size = file.metadata().await?.len();
    drop(guard);

    debug!("Serving {} ({} bytes) to a {} device", path.display(), size, request.class);
    Ok(Some(UpdateArtifact {
        attachment_name: artifacts.attachment_name(request.kind, &latest),
        version: latest,
        path,
        digest_header: verifier.algorithm().header_name(),
        digest,
        size,
        file,
    }))
}

fn not_modified() -> Response {
    (StatusCode::NOT_MODIFIED, [(CONTENT_TYPE, "text/plain")]).into_response()
}

fn file_body(file: File) -> Body {
    let stream = futures_util::stream::unfold(Some(file), |state| async move {
        let Some(mut file) = state else {
            return None;
        };
        let mut buf = vec![0u8; CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, io::Error>(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    Body::from_stream(stream)
}

impl IntoResponse for UpdateArtifact {
    fn into_response(self) -> Response {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, self.size)
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", self.attachment_name),
            )
            .header(self.digest_header, &self.digest)
            .body(file_body(self.file));

        match response {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to build response for {}: {}", self.path.display(), e);
                not_modified()
            }
        }
    }
}

async fn update(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, RequestRejection> {
    let request = DeviceUpdateRequest::from_headers(&headers)?;

    match resolve_update(&state.store, &state.artifacts, &request).await {
        Ok(Some(artifact)) => {
            info!(
                "Sending {} {} to device at {}",
                artifact.attachment_name, artifact.version, request.current_version
            );
            Ok(artifact.into_response())
        }
        Ok(None) => Ok(not_modified()),
        Err(e) => {
            // Devices only ever see "no update" for server-side problems
            error!("Failed to resolve update: {}", e);
            Ok(not_modified())
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "system"
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReleaseInfo {
    pub version: String,
    pub verified: bool,
    /// Why verification failed
    pub problem: Option<String>,
}

impl From<&ReleaseEntry> for ReleaseInfo {
    fn from(entry: &ReleaseEntry) -> Self {
        let problem = match &entry.state {
            ReleaseState::Verified => None,
            ReleaseState::Absent => Some("missing".to_string()),
            ReleaseState::Unverified(result) => Some(result.to_string()),
        };
        Self {
            version: entry.version.to_string(),
            verified: entry.state.is_verified(),
            problem,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReleasesResponse {
    pub source: String,
    pub latest_verified: Option<String>,
    /// Oldest first
    pub releases: Vec<ReleaseInfo>,
}

/// Scan the store under its lock
pub async fn releases_report(store: &ReleaseStore) -> Result<ReleasesResponse, StoreError> {
    let guard = store.lock().await?;
    let releases: Vec<ReleaseInfo> = guard.scan()?.iter().map(ReleaseInfo::from).collect();
    let latest_verified = releases.iter().rev().find(|r| r.verified).map(|r| r.version.clone());
    Ok(ReleasesResponse {
        source: store.source().full_name(),
        latest_verified,
        releases,
    })
}

#[utoipa::path(
    get,
    path = "/api/releases",
    responses(
        (
            status = 200,
            description = "Release directories and their verification state",
            body = ReleasesResponse
        ),
        (status = 500, description = "Store could not be read")
    ),
    tag = "releases"
)]
async fn list_releases(
    State(state): State<ApiState>,
) -> Result<Json<ReleasesResponse>, StatusCode> {
    releases_report(&state.store).await.map(Json).map_err(|e| {
        error!("Failed to list releases: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, description = "Recent synchronization runs", body = SyncSummary)
    ),
    tag = "system"
)]
async fn sync_status(State(state): State<ApiState>) -> Json<SyncSummary> {
    Json(state.sync_status.snapshot())
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
