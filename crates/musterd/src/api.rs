//! HTTP API.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /enroll` | multipart `external_id`, `display_name?`, `image` |
//! | `POST /mark` | multipart `image`, `source?` |
//! | `GET /people` | enrolled identities |
//! | `GET /people/{external_id}/attendance` | one identity's ledger, newest first |
//! | `GET /attendance` | full ledger, newest first |
//! | `GET /health` | liveness and cache size |

use crate::attendance::{AttendanceError, AttendanceService, Outcome, Rejection};
use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use crate::enrollment::{EnrollError, EnrollmentService};
use crate::store::{AttendanceEntry, Person, Store, StoreError};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use muster_core::{IdentityCache, RecordId};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const NOT_RECOGNIZED: &str = "Face not recognized";
const COOLDOWN_MESSAGE: &str = "Already marked recently (cooldown)";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<IdentityCache>,
    pub enrollment: Arc<EnrollmentService>,
    pub attendance: Arc<AttendanceService>,
    pub engine: EngineHandle,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<IdentityCache>,
        engine: EngineHandle,
        config: &Config,
    ) -> Self {
        let enrollment = EnrollmentService::new(Arc::clone(&store), Arc::clone(&cache));
        let attendance = AttendanceService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.match_threshold,
            config.cooldown(),
        );
        Self {
            store,
            cache,
            enrollment: Arc::new(enrollment),
            attendance: Arc::new(attendance),
            engine,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/enroll", post(enroll))
        .route("/mark", post(mark))
        .route("/people", get(people))
        .route("/people/{external_id}/attendance", get(person_attendance))
        .route("/attendance", get(attendance))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing form field: {0}")]
    MissingField(&'static str),
    #[error("No face detected in image.")]
    NoFaceDetected,
    #[error("No enrolled faces yet. Register at least one person.")]
    EmptyRegistry,
    #[error("unknown person: {0}")]
    UnknownPerson(String),
    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Engine(EngineError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoFaceDetected => ApiError::NoFaceDetected,
            other => ApiError::Engine(other),
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NoFaceDetected | ApiError::EmptyRegistry => StatusCode::BAD_REQUEST,
            ApiError::UnknownPerson(_) => StatusCode::NOT_FOUND,
            ApiError::Multipart(err) => err.status(),
            ApiError::Engine(EngineError::Decode(_)) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::Extract(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Engine(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Enroll(EnrollError::Store(err)) => store_status(err),
            ApiError::Enroll(EnrollError::MissingExternalId) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Enroll(_) => StatusCode::BAD_REQUEST,
            ApiError::Attendance(AttendanceError::Store(err)) => store_status(err),
            // Extracted embedding does not fit the gallery.
            ApiError::Attendance(AttendanceError::Match(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Store(err) => store_status(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Text fields and the `image` part of a multipart upload.
struct UploadForm {
    fields: HashMap<String, String>,
    image: Option<Vec<u8>>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm {
            fields: HashMap::new(),
            image: None,
        };
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "image" {
                form.image = Some(field.bytes().await?.to_vec());
            } else {
                form.fields.insert(name, field.text().await?);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Serialize)]
struct EnrollResponse {
    status: &'static str,
    external_id: String,
    display_name: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MarkResponse {
    Failed {
        status: &'static str,
        reason: &'static str,
        distance: Option<f32>,
    },
    Cooldown {
        status: &'static str,
        message: &'static str,
        external_id: String,
        display_name: Option<String>,
        distance: f32,
    },
    Marked {
        status: &'static str,
        external_id: String,
        display_name: Option<String>,
        record_id: RecordId,
        timestamp: DateTime<Utc>,
        distance: f32,
    },
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "identities_cached": state.cache.len(),
    }))
}

async fn enroll(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EnrollResponse>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let external_id = form
        .text("external_id")
        .ok_or(ApiError::MissingField("external_id"))?
        .to_string();
    let display_name = form.text("display_name").map(str::to_string);
    let image = form.image.ok_or(ApiError::MissingField("image"))?;

    let embedding = state.engine.extract(image).await?;
    let upserted = state
        .enrollment
        .enroll(&external_id, display_name.as_deref(), embedding)
        .await?;

    Ok(Json(EnrollResponse {
        status: "success",
        external_id: upserted.identity.external_id,
        display_name: upserted.identity.display_name,
    }))
}

async fn mark(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MarkResponse>, ApiError> {
    // Skip extraction entirely when nobody is enrolled.
    if state.cache.is_empty() {
        return Err(ApiError::EmptyRegistry);
    }

    let form = UploadForm::read(multipart).await?;
    let source = form.text("source").map(str::to_string);
    let image = form.image.ok_or(ApiError::MissingField("image"))?;

    let query = state.engine.extract(image).await?;
    let outcome = state
        .attendance
        .mark(&query, source.as_deref(), Utc::now())
        .await?;

    let response = match outcome {
        Outcome::Rejected(Rejection::EmptyRegistry) => return Err(ApiError::EmptyRegistry),
        Outcome::Rejected(Rejection::NoMatch { distance }) => MarkResponse::Failed {
            status: "failed",
            reason: NOT_RECOGNIZED,
            distance,
        },
        Outcome::Suppressed { identity, distance } => MarkResponse::Cooldown {
            status: "success",
            message: COOLDOWN_MESSAGE,
            external_id: identity.external_id.clone(),
            display_name: identity.display_name.clone(),
            distance,
        },
        Outcome::Marked {
            identity,
            distance,
            record,
        } => MarkResponse::Marked {
            status: "success",
            external_id: identity.external_id.clone(),
            display_name: identity.display_name.clone(),
            record_id: record.id,
            timestamp: record.timestamp,
            distance,
        },
    };
    Ok(Json(response))
}

async fn people(State(state): State<AppState>) -> Result<Json<Vec<Person>>, ApiError> {
    Ok(Json(state.store.people().await?))
}

async fn attendance(
    State(state): State<AppState>,
) -> Result<Json<Vec<AttendanceEntry>>, ApiError> {
    Ok(Json(state.store.attendance().await?))
}

async fn person_attendance(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<Vec<AttendanceEntry>>, ApiError> {
    let id = state
        .store
        .identity_id(&external_id)
        .await?
        .ok_or_else(|| ApiError::UnknownPerson(external_id.clone()))?;
    let person = state
        .store
        .identity(id)
        .await?
        .ok_or(ApiError::UnknownPerson(external_id))?;

    let entries = state
        .store
        .attendance_for(person.id)
        .await?
        .into_iter()
        .map(|record| AttendanceEntry {
            record_id: record.id,
            external_id: person.external_id.clone(),
            display_name: person.display_name.clone(),
            timestamp: record.timestamp,
            source: record.source,
        })
        .collect();
    Ok(Json(entries))
}
