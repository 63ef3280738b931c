//! Full lifecycle against an in-process backend serving both the REST
//! routes and the display stream.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        Path, RawQuery, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::{get, post},
};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use vm_session::{MemoryCredentials, SessionController, StartOutcome};
use vm_session_backend::HttpBackend;
use vm_session_core::{ClientContext, SessionConfig, SessionState, TransportKind};
use vm_session_transport::WsDisplayConnector;

#[derive(Clone, Default)]
struct Backend {
    stopped: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<Option<String>>>>,
}

async fn start() -> Json<Value> {
    Json(json!({ "VMID": "abc123", "containerId": "f00d", "running": true, "message": "vm started" }))
}

async fn stop(State(state): State<Backend>, Path(id): Path<String>) -> Json<Value> {
    state.stopped.lock().unwrap().push(id);
    Json(json!({ "message": "vm stopped" }))
}

async fn stream(
    State(state): State<Backend>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    state.queries.lock().unwrap().push(query);
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket
            .send(Message::Binary(Bytes::from_static(b"RFB 003.008\n")))
            .await;
        while let Some(Ok(msg)) = socket.recv().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
}

async fn serve(state: Backend) -> SocketAddr {
    let router = Router::new()
        .route("/vm/start", post(start))
        .route("/vm/{id}/stop", post(stop))
        .route("/vm/{id}/stream", get(stream))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A port nothing listens on, so the direct candidate is refused.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_session_lifecycle_over_http_and_websocket() {
    let state = Backend::default();
    let addr = serve(state.clone()).await;

    let context = ClientContext::new(false, "127.0.0.1").with_port(addr.port());
    let config = SessionConfig {
        backend_url: Some(format!("http://{addr}")),
        backend_port: closed_port().await,
        retry_backoff_ms: 50,
        ..SessionConfig::default()
    };
    let backend = HttpBackend::from_config(&config, &context).unwrap();
    let controller = SessionController::new(
        Arc::new(backend),
        Arc::new(WsDisplayConnector::new()),
        context,
        config,
    )
    .with_credentials(Arc::new(MemoryCredentials::new("s3cret")));

    let outcome = tokio::time::timeout(Duration::from_secs(10), controller.start())
        .await
        .unwrap()
        .unwrap();

    match outcome {
        StartOutcome::Connected { endpoint, .. } => {
            assert_eq!(endpoint.kind, TransportKind::Proxied);
            assert_eq!(
                endpoint.url,
                format!("ws://127.0.0.1:{}/vm/abc123/stream", addr.port())
            );
        }
        StartOutcome::Stopped => panic!("expected a connection"),
    }
    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(
        state.queries.lock().unwrap().clone(),
        vec![Some("token=s3cret".to_string())]
    );

    for _ in 0..50 {
        if controller.container().bytes_received() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        controller.container().frames(),
        vec![Bytes::from_static(b"RFB 003.008\n")]
    );

    controller.stop().await;
    assert_eq!(controller.state(), SessionState::Ended);
    assert_eq!(state.stopped.lock().unwrap().clone(), vec!["abc123"]);

    drop(controller);
    assert_eq!(state.stopped.lock().unwrap().len(), 1);
}
