use crate::core::DaemonEvent;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use dj_proto::protocol::{CandidateView, Command, SessionView};
use dj_proto::state::StateManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Deserialize)]
struct VoteRequest {
    uri: String,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    let app_state = HttpState { state_manager, event_tx };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/candidates", get(get_candidates))
        .route("/api/vote", post(cast_vote))
        .route("/api/end-vote", post(end_vote))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionView> {
    Json(state.state_manager.get_state().await)
}

async fn get_candidates(State(state): State<HttpState>) -> Json<Vec<CandidateView>> {
    Json(state.state_manager.get_state().await.candidates)
}

async fn cast_vote(State(state): State<HttpState>, Json(req): Json<VoteRequest>) -> StatusCode {
    info!("HTTP API: vote for {}", req.uri);
    forward(&state, Command::CastVote { uri: req.uri }).await
}

async fn end_vote(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: end vote");
    forward(&state, Command::ForceResolve).await
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// Hand a command to the core.  Its effect shows up in the next published view.
async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward command, core loop is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use dj_proto::protocol::{Candidate, SessionStatus};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (tx, _rx) = mpsc::channel(4);
        let response = router(Arc::new(StateManager::new()), tx)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn state_and_candidates_serve_the_published_view() {
        let manager = Arc::new(StateManager::new());
        let candidate = Candidate {
            uri: "spotify:track:a".into(),
            name: "Alpha".into(),
            artist: "Band".into(),
        };
        manager
            .publish(SessionView {
                status: SessionStatus::Open,
                candidates: vec![CandidateView::from(&candidate)],
                ..SessionView::default()
            })
            .await;
        let (tx, _rx) = mpsc::channel(4);
        let app = router(manager, tx);

        let response = app
            .clone()
            .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let state = body_json(response).await;
        assert_eq!(state["status"], "open");
        assert_eq!(state["rev"], 2);

        let response = app
            .oneshot(Request::get("/api/candidates").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let candidates = body_json(response).await;
        assert_eq!(candidates[0]["uri"], "spotify:track:a");
        assert_eq!(candidates[0]["label"], candidate.label());
    }

    #[tokio::test]
    async fn vote_is_forwarded_to_the_core() {
        let (tx, mut rx) = mpsc::channel(4);
        let response = router(Arc::new(StateManager::new()), tx)
            .oneshot(
                Request::post("/api/vote")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"uri":"spotify:track:a"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        match rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::CastVote { uri })) => {
                assert_eq!(uri, "spotify:track:a")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn end_vote_fails_once_the_core_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let response = router(Arc::new(StateManager::new()), tx)
            .oneshot(Request::post("/api/end-vote").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
