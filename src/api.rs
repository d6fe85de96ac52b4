use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    models::{Domain, QueryResult},
    system::SystemInfo,
};

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct QueryPayload {
    query: String,
}

#[derive(Deserialize, Default)]
pub struct InitPayload {
    #[serde(default)]
    domain: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/init-vector-store", post(init_vector_store_handler))
        .route("/api/status", get(status_handler))
        .route("/api/info", get(info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Json<QueryResult> {
    Json(state.system.process_query(&payload.query).await)
}

#[axum::debug_handler]
async fn init_vector_store_handler(
    State(state): State<AppState>,
    Json(payload): Json<InitPayload>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let selection = payload.domain.unwrap_or_else(|| "both".to_string());
    let domains = Domain::parse_selection(&selection).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    if !state.try_begin("Iniciando reconstrucción de índices...") {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "Ya hay una reconstrucción en curso."})),
        ));
    }

    spawn(async move {
        let total = domains.len();
        let mut summary = Vec::with_capacity(total);
        let mut failure = None;

        for (i, domain) in domains.into_iter().enumerate() {
            state.update_status(|s| {
                s.message = format!("Indexando {domain} ({}/{total})...", i + 1);
                s.progress = i as f32 / total as f32;
            });
            match state.system.rebuild_domain(domain).await {
                Ok(report) if report.no_documents() => {
                    summary.push(format!("{domain}: no se encontraron documentos"))
                }
                Ok(report) => summary.push(report.to_string()),
                Err(e) => {
                    error!("Error reconstruyendo {domain}: {e}");
                    failure = Some(format!("Error en la indexación de {domain}: {e}"));
                    break;
                }
            }
        }

        state.update_status(|s| {
            s.is_busy = false;
            s.progress = 0.0;
            s.message = match failure {
                Some(msg) => msg,
                None => format!("¡Indexación completada! {}", summary.join("; ")),
            };
        });
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

#[axum::debug_handler]
async fn info_handler(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(state.system.info())
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.take_shutdown_sender() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::oneshot;

    use crate::config::AppConfig;
    use crate::system::SupportSystem;
    use crate::testing::{model, CountingEmbedder, MemoryDocumentStore, ScriptedModel};

    fn state(dir: &TempDir) -> (AppState, oneshot::Receiver<()>) {
        let cfg = AppConfig {
            cache_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let system = SupportSystem::with_components(
            cfg,
            model(ScriptedModel::keyword()),
            Arc::new(CountingEmbedder::new()),
            Arc::new(MemoryDocumentStore::support_corpus()),
        );
        let (tx, rx) = oneshot::channel();
        (AppState::new(Arc::new(system), tx), rx)
    }

    async fn wait_until_idle(state: &AppState) -> Status {
        for _ in 0..200 {
            let status = state.status();
            if !status.is_busy {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("la reconstrucción no terminó");
    }

    #[tokio::test]
    async fn query_endpoint_returns_payload() {
        let dir = TempDir::new().unwrap();
        let (state, _rx) = state(&dir);
        let Json(result) = query_handler(
            State(state),
            Json(QueryPayload {
                query: "How do I submit an expense report?".into(),
            }),
        )
        .await;
        assert!(result.success);
        assert_eq!(result.specialist_agents_used, vec!["Finance Agent"]);
    }

    #[tokio::test]
    async fn init_runs_in_background_and_reports_completion() {
        let dir = TempDir::new().unwrap();
        let (state, _rx) = state(&dir);

        let response = init_vector_store_handler(State(state.clone()), Json(InitPayload::default()))
            .await
            .map(IntoResponse::into_response)
            .map_err(|(code, _)| code);
        assert_eq!(response.map(|r| r.status()), Ok(StatusCode::ACCEPTED));

        let status = wait_until_idle(&state).await;
        assert!(status.message.starts_with("¡Indexación completada!"));
        assert!(state.system.info().indexes.iter().all(|s| s.chunks.is_some()));
    }

    #[tokio::test]
    async fn init_rejects_unknown_domain_and_concurrent_runs() {
        let dir = TempDir::new().unwrap();
        let (state, _rx) = state(&dir);

        let bad = init_vector_store_handler(
            State(state.clone()),
            Json(InitPayload {
                domain: Some("hr".into()),
            }),
        )
        .await;
        assert!(matches!(bad, Err((StatusCode::BAD_REQUEST, _))));

        assert!(state.try_begin("ocupado"));
        let busy = init_vector_store_handler(State(state.clone()), Json(InitPayload::default())).await;
        assert!(matches!(busy, Err((StatusCode::CONFLICT, _))));
    }

    #[tokio::test]
    async fn shutdown_fires_once() {
        let dir = TempDir::new().unwrap();
        let (state, rx) = state(&dir);

        let first = shutdown_handler(State(state.clone())).await.into_response();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(rx.await.is_ok());
        assert!(state.take_shutdown_sender().is_none());
    }
}
