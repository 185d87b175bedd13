use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tig_core::{Change, ChangeSet, ChangeSetRequest, DiffResult, ErrorKind, Workspace};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub workspace: Arc<Workspace>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/gate", post(gate))
        .route("/ungate", post(ungate))
        .route("/diff/*path", get(get_diff))
        .route("/cleanup", post(cleanup))
        .route("/changesets", get(list_change_sets))
        .route("/changesets", post(create_change_set))
        .route("/changesets/:id", get(get_change_set))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Integrity | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(e: tig_core::Error) -> ApiError {
    (status_for(e.kind()), e.to_string())
}

/// Runs a workspace operation on the blocking pool.
async fn with_workspace<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Workspace) -> tig_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let workspace = Arc::clone(&state.workspace);
    tokio::task::spawn_blocking(move || op(&workspace))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(api_error)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(default)]
    diffs: bool,
}

async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Change>>, ApiError> {
    with_workspace(&state, move |ws| {
        if query.diffs {
            ws.status_with_diffs()
        } else {
            ws.status()
        }
    })
    .await
    .map(Json)
}

#[derive(Deserialize)]
struct PathsRequest {
    paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct PathsResponse {
    pub paths: Vec<String>,
}

async fn gate(
    State(state): State<AppState>,
    Json(req): Json<PathsRequest>,
) -> Result<Json<PathsResponse>, ApiError> {
    if req.paths.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No paths given".to_string()));
    }
    let paths = with_workspace(&state, move |ws| ws.gate(&req.paths)).await?;
    Ok(Json(PathsResponse { paths }))
}

async fn ungate(
    State(state): State<AppState>,
    Json(req): Json<PathsRequest>,
) -> Result<Json<PathsResponse>, ApiError> {
    let paths = with_workspace(&state, move |ws| ws.ungate(&req.paths)).await?;
    Ok(Json(PathsResponse { paths }))
}

async fn get_diff(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<DiffResult>, ApiError> {
    with_workspace(&state, move |ws| ws.show_file_diff(&path))
        .await
        .map(Json)
}

async fn cleanup(State(state): State<AppState>) -> Result<Json<PathsResponse>, ApiError> {
    let paths = with_workspace(&state, |ws| ws.cleanup_gated_changes()).await?;
    Ok(Json(PathsResponse { paths }))
}

async fn list_change_sets(State(state): State<AppState>) -> Result<Json<Vec<ChangeSet>>, ApiError> {
    with_workspace(&state, |ws| ws.list_change_sets())
        .await
        .map(Json)
}

async fn create_change_set(
    State(state): State<AppState>,
    Json(req): Json<ChangeSetRequest>,
) -> Result<(StatusCode, Json<ChangeSet>), ApiError> {
    let change_set = with_workspace(&state, move |ws| ws.create_change_set_with(req)).await?;
    Ok((StatusCode::CREATED, Json(change_set)))
}

async fn get_change_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChangeSet>, ApiError> {
    let id =
        Uuid::parse_str(&id).map_err(|_| (StatusCode::BAD_REQUEST, "Invalid UUID".to_string()))?;

    with_workspace(&state, move |ws| ws.get_change_set(id))
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn setup() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::init(dir.path()).unwrap();
        let router = create_router(AppState {
            workspace: Arc::new(workspace),
        });
        (dir, router)
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, router) = setup();
        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_gate_commit_flow() {
        let (dir, router) = setup();
        std::fs::write(dir.path().join("a.txt"), "a\nb\nc\n").unwrap();

        let (status, body) = call(&router, Method::GET, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["type"], "untracked");

        let (status, body) = call(
            &router,
            Method::POST,
            "/gate",
            Some(serde_json::json!({"paths": ["a.txt"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paths"][0], "a.txt");

        let (status, body) = call(
            &router,
            Method::POST,
            "/changesets",
            Some(serde_json::json!({"description": "first", "author": "dev"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(&router, Method::GET, &format!("/changesets/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], "first");

        std::fs::write(dir.path().join("a.txt"), "a\nx\nc\n").unwrap();
        let (status, body) = call(&router, Method::GET, "/diff/a.txt", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["changes"], 2);

        let (status, body) = call(&router, Method::GET, "/changesets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (_dir, router) = setup();

        let (status, _) = call(
            &router,
            Method::POST,
            "/changesets",
            Some(serde_json::json!({"description": "empty"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&router, Method::GET, "/changesets/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = Uuid::new_v4();
        let (status, _) = call(&router, Method::GET, &format!("/changesets/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, Method::GET, "/diff/missing.txt", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Integrity), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
