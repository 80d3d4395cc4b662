//! HTTP route handlers.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::plan as plan_api;
use super::sessions as sessions_api;
use super::types::HealthResponse;
use crate::config::Config;
use crate::generator::{SharedGenerator, UnavailableGenerator};
use crate::session::SessionRegistry;
use crate::store::{FileDocumentStore, SharedDocumentStore};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: SessionRegistry,
}

impl AppState {
    pub fn new(config: Config, store: SharedDocumentStore, generator: SharedGenerator) -> Self {
        let registry = SessionRegistry::new(store, generator, config.session_policy());
        Self { config, registry }
    }
}

/// Build the application router around `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest(
            "/api/sessions",
            sessions_api::routes().merge(plan_api::routes()),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store: SharedDocumentStore =
        Arc::new(FileDocumentStore::new(config.generated_dir.clone()).await?);
    tracing::info!(
        "Session documents stored under {}",
        config.generated_dir.display()
    );
    let generator: SharedGenerator = Arc::new(UnavailableGenerator);
    tracing::warn!("No generation backend configured; generation endpoints will answer 503");

    let state = Arc::new(AppState::new(config.clone(), store, generator));
    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Setup graceful shutdown on SIGTERM/SIGINT
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Wait for a shutdown signal.
///
/// Every acknowledged edit is already persisted, so nothing needs flushing here.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(
        "Shutdown signal received, {} sessions in memory",
        state.registry.active_count().await
    );
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_sessions: state.registry.active_count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedGenerator;
    use crate::store::{DocumentStore, InMemoryDocumentStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn app_with(store: InMemoryDocumentStore, generator: SharedGenerator) -> Router {
        let state = AppState::new(
            Config::new(PathBuf::from("unused")),
            Arc::new(store),
            generator,
        );
        router(Arc::new(state))
    }

    fn scripted_app(store: &InMemoryDocumentStore) -> Router {
        let generator = Arc::new(ScriptedGenerator::new(store.clone(), &["load", "train"]));
        app_with(store.clone(), generator)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).to_string())
            })
        };
        (status, value)
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = call(app, Method::POST, "/api/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = scripted_app(&InMemoryDocumentStore::new());
        let (status, body) = call(&app, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn plan_editing_flow() {
        let store = InMemoryDocumentStore::new();
        let app = scripted_app(&store);
        let id = new_session(&app).await;

        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/sessions/{}/plan", id),
            Some(json!({"plan": [{"task": "A"}, {"task": "B"}, {"task": "C"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"].as_array().unwrap().len(), 3);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/plan/steps", id),
            Some(json!({"after": 1, "task": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["task_id"], 2);
        assert_eq!(body["invalidated"], json!([2, 3, 4]));

        let (status, body) = call(
            &app,
            Method::DELETE,
            &format!("/api/sessions/{}/plan/steps/2", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan_length"], 3);
        assert_eq!(body["invalidated"], json!([2, 3, 4]));

        let (_, body) = call(&app, Method::GET, &format!("/api/sessions/{}/plan", id), None).await;
        let descriptions: Vec<&str> = body["plan"]
            .as_array()
            .unwrap()
            .iter()
            .map(|task| task["task"].as_str().unwrap())
            .collect();
        assert_eq!(descriptions, vec!["A", "B", "C"]);
        assert_eq!(body["task_map"]["3"]["task"], "C");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = scripted_app(&InMemoryDocumentStore::new());
        let id = new_session(&app).await;

        let (status, _) = call(&app, Method::GET, "/api/sessions/nope/plan", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/plan/steps", id),
            Some(json!({"after": 5, "task": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/plan/steps", id),
            Some(json!({"after": -1, "task": "X"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/plan/steps", id),
            Some(json!({"after": 0, "task": "X", "dep": [1]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/sessions/{}/plan/steps/1", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn desynchronized_session_is_a_conflict() {
        let store = InMemoryDocumentStore::new();
        store
            .write_document(
                "broken/plan_state.json",
                json!({"plan": [{"task_id": 1, "task": "a", "dep": []}], "task_map": {}})
                    .to_string()
                    .as_bytes(),
            )
            .await
            .unwrap();
        let app = scripted_app(&store);

        let (status, _) = call(&app, Method::GET, "/api/sessions/broken", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn code_generation_and_iterations() {
        let store = InMemoryDocumentStore::new();
        let app = scripted_app(&store);
        let id = new_session(&app).await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/plan/generate", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/tasks/1/code/generate", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["code"].as_str().unwrap().contains("load"));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/tasks/1/iterations", id),
            Some(json!({"problem": "KeyError"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["iteration"], 1);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/tasks/1/iterations/1/select", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["code"].as_str().unwrap().contains("KeyError"));

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/sessions/{}/tasks/1/iterations/1", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/api/sessions/{}/tasks/1/iterations", id),
            None,
        )
        .await;
        assert_eq!(body["current_iteration"], 1);
        assert_eq!(body["iterations"], json!([]));
    }

    #[tokio::test]
    async fn missing_generator_is_service_unavailable() {
        let store = InMemoryDocumentStore::new();
        let app = app_with(store, Arc::new(UnavailableGenerator));
        let id = new_session(&app).await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/plan/generate", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn context_documents_round_trip() {
        let store = InMemoryDocumentStore::new();
        let app = scripted_app(&store);
        let id = new_session(&app).await;

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/sessions/{}/prompt", id),
            Some(json!({"text": "predict churn"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/theories", id),
            Some(json!({"theories": ["seasonality"]})),
        )
        .await;
        assert_eq!(body["theories"], json!(["seasonality"]));

        let (_, body) = call(&app, Method::GET, "/api/sessions", None).await;
        assert_eq!(body["sessions"], json!([id.clone()]));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/sessions/{}/load", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"]["prompt"], "predict churn");
    }
}
