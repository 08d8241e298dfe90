//! Dashboard API: a full-snapshot endpoint and a WebSocket channel that
//! pushes the currently active job to every subscriber.
//!
//! The push side samples the store at 1 Hz and only broadcasts when the
//! serialised payload actually changed, so idle dashboards cost nothing.

use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::store::StateStore;

const BROADCAST_CAPACITY: usize = 64;
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct AppState {
    db_path: PathBuf,
    /// Opened lazily: the store file may not exist until the first job runs.
    store: Arc<Mutex<Option<StateStore>>>,
    tx: broadcast::Sender<String>,
}

impl AppState {
    fn new(db_path: PathBuf, tx: broadcast::Sender<String>) -> Self {
        Self {
            db_path,
            store: Arc::new(Mutex::new(None)),
            tx,
        }
    }

    fn store(&self) -> Option<StateStore> {
        let mut cached = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if cached.is_none() {
            if !self.db_path.exists() {
                return None;
            }
            match StateStore::open(&self.db_path) {
                Ok(store) => *cached = Some(store),
                Err(e) => {
                    tracing::warn!("dashboard: cannot open store: {e}");
                    return None;
                }
            }
        }
        cached.clone()
    }

    fn snapshot(&self) -> Value {
        let Some(store) = self.store() else {
            return json!({ "jobs": [] });
        };
        match store.read_dashboard_data() {
            Ok(data) => serde_json::to_value(&data).unwrap_or_else(|_| json!({ "jobs": [] })),
            Err(e) => {
                tracing::warn!("dashboard: snapshot read failed: {e}");
                json!({ "jobs": [] })
            }
        }
    }

    fn active_job_frame(&self) -> String {
        let job = self
            .store()
            .and_then(|store| store.read_active_job().ok().flatten())
            .and_then(|view| serde_json::to_value(&view).ok());
        json!({ "type": "active_job", "job": job }).to_string()
    }
}

/// Serve `GET /api/db` and `WS /ws` on 127.0.0.1:`port` until `cancel`.
pub async fn serve(db_path: PathBuf, port: u16, cancel: CancellationToken) -> Result<()> {
    let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    let state = AppState::new(db_path, tx);

    // 1 Hz sampler: broadcast only on change.
    let sampler_state = state.clone();
    let sampler_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        let mut last: Option<String> = None;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = sampler_cancel.cancelled() => break,
            }
            let frame = sampler_state.active_job_frame();
            if last.as_deref() != Some(frame.as_str()) {
                last = Some(frame.clone());
                let _ = sampler_state.tx.send(frame);
            }
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    let app = Router::new()
        .route("/api/db", get(snapshot_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("dashboard listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("dashboard server error")?;
    Ok(())
}

async fn snapshot_handler(State(state): State<AppState>) -> Json<Value> {
    Json(state.snapshot())
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(state, socket))
}

async fn client_loop(state: AppState, mut socket: WebSocket) {
    // Every subscriber gets the current active job immediately, then only
    // deltas from the sampler.
    let hello = state.active_job_frame();
    if socket.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    let mut rx = state.tx.subscribe();
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => continue,
                _ => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AppState;
    use crate::domain::JobStatus;
    use crate::store::{JobSeed, StateStore};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    fn state_for(path: PathBuf) -> AppState {
        let (tx, _) = broadcast::channel(4);
        AppState::new(path, tx)
    }

    #[test]
    fn snapshot_is_empty_when_store_file_is_missing() {
        let tmp = TempDir::new().expect("tempdir");
        let state = state_for(tmp.path().join("missing.db"));
        let snapshot = state.snapshot();
        assert_eq!(snapshot["jobs"], serde_json::json!([]));
    }

    #[test]
    fn snapshot_contains_jobs_once_store_exists() {
        let tmp = TempDir::new().expect("tempdir");
        let db_path = tmp.path().join("orchestrator.db");
        let store = StateStore::open(&db_path).expect("open");
        store.mark_job_status(
            &JobSeed {
                id: "job-1".to_string(),
                repo_root: PathBuf::from("/repo"),
                base_branch: "main".to_string(),
                description: "d".to_string(),
                user_task: "t".to_string(),
                push_result: false,
            },
            JobStatus::Planning,
        );

        let state = state_for(db_path);
        let snapshot = state.snapshot();
        assert_eq!(snapshot["jobs"][0]["id"], "job-1");
        assert_eq!(snapshot["jobs"][0]["status"], "planning");
    }

    #[test]
    fn active_job_frame_is_null_without_active_job() {
        let tmp = TempDir::new().expect("tempdir");
        let db_path = tmp.path().join("orchestrator.db");
        let store = StateStore::open(&db_path).expect("open");
        store.mark_job_status(
            &JobSeed {
                id: "job-1".to_string(),
                repo_root: PathBuf::from("/repo"),
                base_branch: "main".to_string(),
                description: "d".to_string(),
                user_task: "t".to_string(),
                push_result: false,
            },
            JobStatus::Done,
        );

        let state = state_for(db_path);
        let frame: serde_json::Value =
            serde_json::from_str(&state.active_job_frame()).expect("json");
        assert_eq!(frame["type"], "active_job");
        assert!(frame["job"].is_null());
    }
}
