use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tower_http::cors::CorsLayer;

use crate::error::{PickError, StoreError};
use crate::picker::Picker;
use crate::store::{SourceRef, SourceStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    users: Arc<UserStore>,
    sources: Arc<SourceStore>,
    picker: Arc<Picker<SourceStore>>,
}

impl AppState {
    pub fn new(users: Arc<UserStore>, sources: Arc<SourceStore>) -> Self {
        let picker = Arc::new(Picker::new(sources.clone()));
        Self {
            users,
            sources,
            picker,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/user/{user_id}/source", post(add_source).get(list_sources))
        .route(
            "/user/{user_id}/source/{source_id}",
            patch(reweight_source).delete(delete_source),
        )
        .route("/user/{user_id}/pick", get(pick))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Coarse status + terse kind string; store internals never reach the body.
struct ApiError {
    status: StatusCode,
    kind: &'static str,
}

impl ApiError {
    fn bad_request(kind: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.kind }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists => Self {
                status: StatusCode::CONFLICT,
                kind: "already exists",
            },
            StoreError::UserNotFound => Self {
                status: StatusCode::NOT_FOUND,
                kind: "user not found",
            },
            StoreError::RecordNotFound => Self::bad_request("unknown source"),
            StoreError::SnapshotIo { .. } | StoreError::SnapshotParse { .. } => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                kind: "internal error",
            },
        }
    }
}

impl From<PickError> for ApiError {
    fn from(e: PickError) -> Self {
        match e {
            PickError::InvalidCount => Self::bad_request("count must be at least 1"),
            PickError::Retrieval(inner) | PickError::Update(inner) => {
                tracing::error!(target: "api", error = %inner, "pick failed");
                inner.into()
            }
        }
    }
}

fn ensure_user(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    if state.users.is_user(user_id) {
        Ok(())
    } else {
        Err(StoreError::UserNotFound.into())
    }
}

// HTML5 email syntax; anything fancier belongs to a mail server.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email regex")
});

fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(serde::Deserialize)]
struct EmailReq {
    email: String,
}

#[derive(serde::Serialize)]
struct UserOut {
    #[serde(rename = "userId")]
    user_id: String,
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<EmailReq>,
) -> Result<(StatusCode, Json<UserOut>), ApiError> {
    if !is_valid_email(&body.email) {
        return Err(ApiError::bad_request("invalid email"));
    }
    let user_id = state.users.create_user(&body.email)?;
    Ok((StatusCode::CREATED, Json(UserOut { user_id })))
}

async fn signin(
    State(state): State<AppState>,
    Json(body): Json<EmailReq>,
) -> Result<Json<UserOut>, ApiError> {
    if !is_valid_email(&body.email) {
        return Err(ApiError::bad_request("invalid email"));
    }
    let user_id = state.users.lookup(&body.email)?;
    Ok(Json(UserOut { user_id }))
}

#[derive(serde::Deserialize)]
struct AddSourceReq {
    url: String,
}

#[derive(serde::Serialize)]
struct AddSourceResp {
    id: String,
}

async fn add_source(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<AddSourceReq>,
) -> Result<(StatusCode, Json<AddSourceResp>), ApiError> {
    ensure_user(&state, &user_id)?;
    let url = body.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("invalid url"));
    }
    let record = state.sources.add_source(&user_id, url)?;
    Ok((StatusCode::CREATED, Json(AddSourceResp { id: record.id })))
}

#[derive(serde::Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: usize,
}

async fn list_sources(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Vec<SourceRef>>, ApiError> {
    ensure_user(&state, &user_id)?;
    Ok(Json(state.sources.get_sources(&user_id, q.page)?))
}

#[derive(serde::Deserialize)]
struct ReweightReq {
    #[serde(default)]
    multiplier: Option<f32>,
    #[serde(default)]
    hash: Option<String>,
}

async fn reweight_source(
    State(state): State<AppState>,
    Path((user_id, source_id)): Path<(String, String)>,
    Json(body): Json<ReweightReq>,
) -> Result<StatusCode, ApiError> {
    ensure_user(&state, &user_id)?;
    if let Some(m) = body.multiplier {
        // Rejects NaN as well.
        if !(m >= 0.0) {
            return Err(ApiError::bad_request("multiplier must be non-negative"));
        }
    }

    let mut record = state.sources.get_source(&user_id, &source_id)?;
    if let Some(m) = body.multiplier {
        record.multiplier = m;
    }
    if let Some(h) = body.hash {
        record.hash = h;
    }
    state.sources.update_source(&user_id, record)?;
    Ok(StatusCode::OK)
}

async fn delete_source(
    State(state): State<AppState>,
    Path((user_id, source_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    ensure_user(&state, &user_id)?;
    state.sources.delete_source(&user_id, &source_id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn default_count() -> i64 {
    1
}

#[derive(serde::Deserialize)]
struct PickQuery {
    #[serde(default = "default_count")]
    count: i64,
}

async fn pick(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(q): Query<PickQuery>,
) -> Result<Json<Vec<SourceRef>>, ApiError> {
    ensure_user(&state, &user_id)?;
    if q.count < 1 {
        return Err(PickError::InvalidCount.into());
    }
    let picked = state.picker.pick(&user_id, q.count as usize).await?;
    Ok(Json(picked))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co.uk"));
    }

    #[test]
    fn rejects_junk() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld@double.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email(""));
    }
}
